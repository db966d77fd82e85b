// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::{DaemonConfig, FileConfig};
use crate::device::{CapabilityFlags, DeviceDescriptor, HealthPhase};
use crate::driver::{Driver, DriverInfo, FailureCause};
use crate::events::{EventStore, Severity};
use crate::metrics::Metrics;
use crate::redact::Redactor;
use crate::registry::Registry;
use crate::secret::SecretStore;

/// Scripted driver: pops one outcome per probe, then repeats the last.
struct ScriptedDriver {
    outcomes: Mutex<VecDeque<Result<(), FailureCause>>>,
    probe_delay: Duration,
    act_delay: Duration,
    panic_on_probe: Mutex<u32>,
}

impl ScriptedDriver {
    fn new(script: &[Result<(), FailureCause>]) -> Self {
        Self {
            outcomes: Mutex::new(script.iter().copied().collect()),
            probe_delay: Duration::ZERO,
            act_delay: Duration::ZERO,
            panic_on_probe: Mutex::new(0),
        }
    }

    fn slow(script: &[Result<(), FailureCause>], probe_delay: Duration) -> Self {
        Self { probe_delay, ..Self::new(script) }
    }
}

#[async_trait::async_trait]
impl Driver for ScriptedDriver {
    async fn probe(&self, _cancel: &CancellationToken) -> crate::driver::DriverResult<Payload> {
        if self.probe_delay > Duration::ZERO {
            tokio::time::sleep(self.probe_delay).await;
        }
        {
            let mut panics = self.panic_on_probe.lock();
            if *panics > 0 {
                *panics -= 1;
                // Deliberate: exercises the scheduler's panic isolation.
                #[allow(clippy::panic)]
                {
                    panic!("scripted driver panic");
                }
            }
        }
        let outcome = {
            let mut outcomes = self.outcomes.lock();
            match outcomes.len() {
                0 => Ok(()),
                1 => *outcomes.front().unwrap_or(&Ok(())),
                _ => outcomes.pop_front().unwrap_or(Ok(())),
            }
        };
        match outcome {
            Ok(()) => Ok(Payload::Camera { online: true, firmware: None, last_frame_ms: None }),
            Err(cause) => Err(DriverFailure::new(cause, "scripted failure")),
        }
    }

    async fn act(
        &self,
        action: &str,
        _params: &serde_json::Value,
        _cancel: &CancellationToken,
    ) -> crate::driver::DriverResult<serde_json::Value> {
        if self.act_delay > Duration::ZERO {
            tokio::time::sleep(self.act_delay).await;
        }
        Ok(serde_json::json!({"action": action}))
    }

    fn describe(&self) -> DriverInfo {
        DriverInfo {
            driver: "scripted",
            capabilities: CapabilityFlags { controllable: true, ptz: false, stream: false },
            actions: vec![],
            gauges: vec![],
        }
    }

    async fn close(&self) {}
}

fn descriptor(id: &str) -> DeviceDescriptor {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "driver": "tapo_camera",
        "category": "camera",
        "label": id,
    }))
    .unwrap_or_else(|e| panic!("descriptor: {e}"))
}

fn test_state(failure_threshold: u32) -> Arc<AppState> {
    let shutdown = CancellationToken::new();
    let secrets = Arc::new(
        SecretStore::from_specs(&["env".to_owned()]).unwrap_or_else(|e| panic!("secrets: {e}")),
    );
    let metrics = Arc::new(Metrics::new().unwrap_or_else(|e| panic!("metrics: {e}")));
    let mut file = FileConfig::default();
    file.scheduler.failure_threshold = failure_threshold;
    Arc::new(AppState::new(
        DaemonConfig {
            config_path: "/dev/null".into(),
            http_listen: "127.0.0.1:0".into(),
            log_level: "info".into(),
            auth_token: None,
        },
        file,
        Registry::new(secrets, Some(Arc::clone(&metrics)), shutdown.clone()),
        EventStore::new(1000, 256, Redactor::default(), Some(Arc::clone(&metrics))),
        metrics,
        shutdown,
    ))
}

async fn register_scripted(
    state: &AppState,
    id: &str,
    driver: ScriptedDriver,
    interval: Duration,
) -> Arc<crate::registry::DeviceEntry> {
    state
        .registry
        .insert(descriptor(id), Box::new(driver), interval)
        .await
        .unwrap_or_else(|e| panic!("insert: {e}"))
}

#[yare::parameterized(
    zero_failures = { 30, 0, 30 },
    one_failure = { 30, 1, 60 },
    three_failures = { 30, 3, 240 },
    capped = { 30, 6, 300 },
    deep_capped = { 30, 16, 300 },
    small_base = { 5, 2, 20 },
)]
fn backoff_schedule(base_s: u64, failures: u32, expected_s: u64) {
    let next = backoff_interval(Duration::from_secs(base_s), failures);
    assert_eq!(next, Duration::from_secs(expected_s));
}

#[test]
fn jitter_stays_within_twenty_percent() {
    let base = Duration::from_secs(30);
    for _ in 0..500 {
        let jittered = apply_jitter(base).as_secs_f64();
        assert!((24.0..=36.0).contains(&jittered), "jittered to {jittered}");
    }
}

#[tokio::test(start_paused = true)]
async fn degradation_and_recovery_emit_connection_events() {
    let state = test_state(3);
    let entry = register_scripted(
        &state,
        "cam-1",
        ScriptedDriver::new(&[
            Ok(()),
            Err(FailureCause::Timeout),
            Err(FailureCause::Timeout),
            Err(FailureCause::Timeout),
            Ok(()),
        ]),
        Duration::from_secs(5),
    )
    .await;

    let handle = spawn_device_scheduler(Arc::clone(&state), Arc::clone(&entry));
    // Generous virtual time: backoff stretches the failing cycles.
    tokio::time::sleep(Duration::from_secs(400)).await;
    entry.cancel.cancel();
    let _ = handle.await;

    let events = state.events.query(None, None, Some("device_connection"), 100);
    let severities: Vec<Severity> = events.iter().rev().map(|e| e.severity).collect();
    assert_eq!(
        severities,
        vec![Severity::Warning, Severity::Alarm, Severity::Info],
        "events: {events:?}"
    );

    let snapshot = entry.snapshot().await;
    assert_eq!(snapshot.runtime.phase, HealthPhase::Ok);
    assert_eq!(snapshot.runtime.consecutive_failures, 0);
    assert!(snapshot.runtime.last_success_ms.is_some());
}

#[tokio::test(start_paused = true)]
async fn probe_deadline_converts_to_timeout_failure() {
    let state = test_state(1);
    let entry = register_scripted(
        &state,
        "cam-slow",
        ScriptedDriver::slow(&[Ok(())], Duration::from_secs(3600)),
        Duration::from_secs(5),
    )
    .await;

    let handle = spawn_device_scheduler(Arc::clone(&state), Arc::clone(&entry));
    tokio::time::sleep(Duration::from_secs(30)).await;
    entry.cancel.cancel();
    let _ = handle.await;

    let events = state.events.query(None, Some(Severity::Alarm), None, 10);
    assert!(!events.is_empty(), "deadline should have produced an offline alarm");
    let snapshot = entry.snapshot().await;
    assert!(snapshot
        .runtime
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("timeout")));
}

#[tokio::test(start_paused = true)]
async fn driver_panic_is_contained_as_protocol_failure() {
    let state = test_state(1);
    let driver = ScriptedDriver::new(&[Ok(())]);
    *driver.panic_on_probe.lock() = 1;
    let entry =
        register_scripted(&state, "cam-panicky", driver, Duration::from_secs(5)).await;

    let handle = spawn_device_scheduler(Arc::clone(&state), Arc::clone(&entry));
    tokio::time::sleep(Duration::from_secs(700)).await;
    entry.cancel.cancel();
    let _ = handle.await;

    // The panic became a classified failure, then the device recovered.
    let alarms = state.events.query(None, Some(Severity::Alarm), None, 10);
    assert!(!alarms.is_empty());
    assert!(alarms
        .iter()
        .any(|e| e.detail.as_ref().is_some_and(|d| d["cause"] == "protocol")));
    let snapshot = entry.snapshot().await;
    assert_eq!(snapshot.runtime.phase, HealthPhase::Ok);
}

#[tokio::test(start_paused = true)]
async fn act_waits_for_inflight_probe() {
    let state = test_state(3);
    let entry = register_scripted(
        &state,
        "plug-1",
        ScriptedDriver::slow(&[Ok(())], Duration::from_secs(3)),
        Duration::from_secs(5),
    )
    .await;

    let handle = spawn_device_scheduler(Arc::clone(&state), Arc::clone(&entry));
    // Let the first probe start (fires after ~4-6s of jittered delay).
    tokio::time::sleep(Duration::from_secs(7)).await;

    let act_entry = Arc::clone(&entry);
    let started = tokio::time::Instant::now();
    let result = run_act(&act_entry, "power_set", &serde_json::json!({"on": false})).await;
    let waited = started.elapsed();

    assert!(result.is_ok(), "act should succeed after the probe: {result:?}");
    // Serialization is observable: if a probe was in flight the act waited.
    assert!(waited <= ACT_WAIT_DEADLINE + ACT_DEADLINE);

    entry.cancel.cancel();
    let _ = handle.await;
}

#[tokio::test(start_paused = true)]
async fn act_times_out_when_probe_never_yields_the_lock() {
    let state = test_state(3);
    let entry = register_scripted(
        &state,
        "plug-stuck",
        ScriptedDriver::slow(&[Ok(())], Duration::from_secs(3600)),
        Duration::from_secs(5),
    )
    .await;

    let handle = spawn_device_scheduler(Arc::clone(&state), Arc::clone(&entry));
    tokio::time::sleep(Duration::from_secs(7)).await;

    // The probe holds the op lock until its 10 s deadline; an act arriving
    // meanwhile waits, and under a pathological hold gives up at 15 s.
    let guard = entry.op_lock.lock().await;
    let act = tokio::spawn({
        let entry = Arc::clone(&entry);
        async move { run_act(&entry, "power_set", &serde_json::json!({"on": true})).await }
    });
    tokio::time::sleep(ACT_WAIT_DEADLINE + Duration::from_secs(1)).await;
    drop(guard);
    let result = act.await.unwrap_or_else(|e| panic!("join: {e}"));
    assert!(matches!(result, Err(f) if f.cause == FailureCause::Unavailable));

    entry.cancel.cancel();
    let _ = handle.await;
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_loop_promptly() {
    let state = test_state(3);
    let entry = register_scripted(
        &state,
        "cam-bye",
        ScriptedDriver::new(&[Ok(())]),
        Duration::from_secs(30),
    )
    .await;

    let handle = spawn_device_scheduler(Arc::clone(&state), Arc::clone(&entry));
    tokio::time::sleep(Duration::from_secs(1)).await;
    entry.cancel.cancel();
    let joined = tokio::time::timeout(Duration::from_secs(10), handle).await;
    assert!(joined.is_ok(), "scheduler did not stop after cancellation");
}

#[tokio::test(start_paused = true)]
async fn pending_action_gauge_tracks_queue_depth() {
    let state = test_state(3);
    let mut driver = ScriptedDriver::new(&[Ok(())]);
    driver.act_delay = Duration::from_secs(2);
    let entry = register_scripted(&state, "plug-q", driver, Duration::from_secs(3600)).await;

    let act = tokio::spawn({
        let entry = Arc::clone(&entry);
        async move { run_act(&entry, "power_set", &serde_json::json!({"on": true})).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(entry.snapshot().await.pending_actions, 1);
    let _ = act.await;
    assert_eq!(entry.snapshot().await.pending_actions, 0);
}
