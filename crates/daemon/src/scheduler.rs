// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-device scrape loop: jittered intervals, exponential backoff on
//! failure, deadlines, cancellation, and panic isolation.
//!
//! One task per device. Probe and act on the same device serialize through
//! the entry's operation lock; distinct devices proceed fully in parallel.
//! A retry is never issued inside a cycle — the backoff schedule is the
//! retry, so every attempt is observable as an event.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::driver::{DriverFailure, DriverResult, Payload, Reading};
use crate::health::HealthMonitor;
use crate::registry::DeviceEntry;
use crate::state::AppState;

/// Probe deadline.
pub const PROBE_DEADLINE: Duration = Duration::from_secs(10);
/// Act deadline.
pub const ACT_DEADLINE: Duration = Duration::from_secs(30);
/// How long an act waits for an in-flight probe before failing.
pub const ACT_WAIT_DEADLINE: Duration = Duration::from_secs(15);
/// Backoff ceiling.
pub const BACKOFF_CAP: Duration = Duration::from_secs(300);
/// Grace for abandoning an uninterruptible in-flight probe on cancel.
pub const CANCEL_GRACE: Duration = Duration::from_secs(5);
/// Two driver panics inside this window lock the device to max backoff.
const PANIC_WINDOW: Duration = Duration::from_secs(60);
/// Jitter band: ±20% of the computed interval.
const JITTER_FRACTION: f64 = 0.2;

/// Interval before jitter: base × 2^failures, capped.
pub fn backoff_interval(base: Duration, consecutive_failures: u32) -> Duration {
    if consecutive_failures == 0 {
        return base.min(BACKOFF_CAP);
    }
    let factor = 2f64.powi(consecutive_failures.min(16) as i32);
    Duration::from_secs_f64((base.as_secs_f64() * factor).min(BACKOFF_CAP.as_secs_f64()))
}

/// Uniform ±20% jitter, fleet-stampede insurance.
pub fn apply_jitter(interval: Duration) -> Duration {
    let factor = rand::rng().random_range(1.0 - JITTER_FRACTION..=1.0 + JITTER_FRACTION);
    Duration::from_secs_f64(interval.as_secs_f64() * factor)
}

enum ProbeOutcome {
    Reading { result: DriverResult<Payload>, panicked: bool },
    Cancelled,
}

/// Run one probe under deadline, cancellation and panic isolation. The
/// driver future runs in its own task so a panic is contained to it.
async fn run_probe(entry: &Arc<DeviceEntry>) -> ProbeOutcome {
    let driver_entry = Arc::clone(entry);
    let mut handle =
        tokio::spawn(async move { driver_entry.driver.probe(&driver_entry.cancel).await });

    tokio::select! {
        joined = &mut handle => match joined {
            Ok(result) => ProbeOutcome::Reading { result, panicked: false },
            Err(e) if e.is_panic() => ProbeOutcome::Reading {
                result: Err(DriverFailure::protocol("driver panicked during probe")),
                panicked: true,
            },
            Err(_) => ProbeOutcome::Cancelled,
        },
        _ = tokio::time::sleep(PROBE_DEADLINE) => {
            handle.abort();
            ProbeOutcome::Reading {
                result: Err(DriverFailure::timeout("probe deadline exceeded")),
                panicked: false,
            }
        }
        _ = entry.cancel.cancelled() => {
            handle.abort();
            // Give an uninterruptible probe a grace period, then abandon it.
            if tokio::time::timeout(CANCEL_GRACE, &mut handle).await.is_err() {
                tracing::warn!(
                    device_id = %entry.descriptor.id,
                    "probe did not stop within grace; driver considered leaked"
                );
            }
            ProbeOutcome::Cancelled
        }
    }
}

/// Spawn the scheduling unit for one registered device.
pub fn spawn_device_scheduler(
    state: Arc<AppState>,
    entry: Arc<DeviceEntry>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let id = entry.descriptor.id.clone();
        let mut monitor = HealthMonitor::new(
            &id,
            state.file.scheduler.failure_threshold,
            state.file.power_ceiling_for(&entry.descriptor),
        );
        let gauges = entry.driver.describe().gauges;
        let mut last_panic: Option<Instant> = None;
        let mut panic_lockdown = false;

        loop {
            let base = if panic_lockdown {
                BACKOFF_CAP
            } else {
                backoff_interval(entry.interval, monitor.consecutive_failures())
            };
            let delay = apply_jitter(base);

            tokio::select! {
                _ = entry.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            // Serialize with acts on this device.
            let guard = entry.op_lock.lock().await;
            let started = Instant::now();
            let outcome = run_probe(&entry).await;
            drop(guard);

            let (result, panicked) = match outcome {
                ProbeOutcome::Cancelled => break,
                ProbeOutcome::Reading { result, panicked } => (result, panicked),
            };

            if panicked {
                let now = Instant::now();
                if last_panic.is_some_and(|prev| now.duration_since(prev) < PANIC_WINDOW) {
                    if !panic_lockdown {
                        tracing::warn!(
                            device_id = %id,
                            "second driver panic within a minute; backing off to max interval"
                        );
                    }
                    panic_lockdown = true;
                }
                last_panic = Some(now);
            } else if result.is_ok() {
                panic_lockdown = false;
                last_panic = None;
            }

            let reading = Reading {
                device_id: id.clone(),
                at_ms: crate::device::epoch_ms(),
                outcome: result,
            };

            state.metrics.observe_probe_duration(&id, started.elapsed().as_secs_f64());
            if let Err(ref failure) = reading.outcome {
                state.metrics.record_probe_failure(&id, failure.cause.as_str());
            }

            for event in monitor.observe(&reading) {
                state.events.append(event);
            }

            {
                let mut runtime = entry.runtime.write().await;
                runtime.phase = monitor.phase();
                runtime.consecutive_failures = monitor.consecutive_failures();
                match &reading.outcome {
                    Ok(payload) => {
                        runtime.last_success_ms = Some(reading.at_ms);
                        runtime.last_error = None;
                        runtime.last_reading = serde_json::to_value(payload).ok();
                    }
                    Err(failure) => {
                        runtime.last_error = Some(failure.to_string());
                    }
                }
            }

            state.metrics.set_device_up(
                &id,
                entry.descriptor.category.as_str(),
                &entry.descriptor.driver,
                monitor.phase() == crate::device::HealthPhase::Ok,
            );
            if let Ok(ref payload) = reading.outcome {
                state.metrics.record_payload(&id, payload, &gauges);
            }
        }

        tracing::debug!(device_id = %id, "scheduler task stopped");
    })
}

/// Execute one action against a device, serialized with its probes.
///
/// Waits up to 15 s for an in-flight probe, runs the act under its own
/// deadline, and isolates driver panics exactly like the probe path.
pub async fn run_act(
    entry: &Arc<DeviceEntry>,
    action: &str,
    params: &serde_json::Value,
) -> DriverResult<serde_json::Value> {
    entry.pending_actions.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let result = run_act_inner(entry, action, params).await;
    entry.pending_actions.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
    result
}

async fn run_act_inner(
    entry: &Arc<DeviceEntry>,
    action: &str,
    params: &serde_json::Value,
) -> DriverResult<serde_json::Value> {
    let guard = tokio::time::timeout(ACT_WAIT_DEADLINE, entry.op_lock.lock())
        .await
        .map_err(|_| DriverFailure::unavailable("device busy; probe still in flight"))?;

    let driver_entry = Arc::clone(entry);
    let action_owned = action.to_owned();
    let params_owned = params.clone();
    let mut handle = tokio::spawn(async move {
        driver_entry
            .driver
            .act(&action_owned, &params_owned, &driver_entry.cancel)
            .await
    });

    let result = tokio::select! {
        joined = &mut handle => match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                Err(DriverFailure::protocol("driver panicked during action"))
            }
            Err(_) => Err(DriverFailure::unavailable("action cancelled")),
        },
        _ = tokio::time::sleep(ACT_DEADLINE) => {
            handle.abort();
            Err(DriverFailure::timeout("action deadline exceeded"))
        }
        _ = entry.cancel.cancelled() => {
            handle.abort();
            Err(DriverFailure::unavailable("device shutting down"))
        }
    };
    drop(guard);
    result
}

/// Wait for every scheduler task to stop, bounded by grace + 1 s overall.
pub async fn join_all(state: &AppState) {
    let handles: Vec<_> = std::mem::take(&mut *state.scheduler_tasks.lock());
    let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
    let joined = futures_util::future::join_all(handles);
    let deadline = CANCEL_GRACE + Duration::from_secs(1);
    if tokio::time::timeout(deadline, joined).await.is_err() {
        for abort in aborts {
            abort.abort();
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
