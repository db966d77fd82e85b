// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-device health state machine: ok → degraded → offline with
//! auto-recovery, plus domain overlays derived from reading payloads.
//!
//! Emission is deliberately sparse. Repeated failures inside a phase are
//! suppressed so a flapping device produces edges, not spam; domain
//! overlays use a two-sample trigger with hysteresis for the same reason.

use crate::device::HealthPhase;
use crate::driver::{Payload, Reading, SmokeAlert};
use crate::events::NewEvent;

/// Connection-health event category.
pub const CATEGORY_CONNECTION: &str = "device_connection";
/// CO₂ overlay category.
pub const CATEGORY_ENV: &str = "env_threshold";
/// Smoke/CO overlay category.
pub const CATEGORY_SMOKE: &str = "smoke_alert";
/// Plug power overlay category.
pub const CATEGORY_ENERGY: &str = "energy_alert";

/// CO₂ trigger / rearm thresholds (ppm).
const CO2_TRIGGER_PPM: f64 = 1000.0;
const CO2_REARM_PPM: f64 = 900.0;
/// Overlays fire on the Nth consecutive out-of-band sample.
const OVERLAY_SAMPLES: u32 = 2;

/// One state machine instance per device, fed by every reading that
/// device's scheduler produces.
pub struct HealthMonitor {
    device_id: String,
    failure_threshold: u32,
    power_ceiling_w: f64,

    phase: HealthPhase,
    consecutive_failures: u32,
    last_success_ms: Option<u64>,
    offline_since_ms: Option<u64>,

    co2_streak: u32,
    co2_armed: bool,
    power_streak: u32,
    power_armed: bool,
    smoke_prev: Option<SmokeAlert>,
}

impl HealthMonitor {
    pub fn new(device_id: impl Into<String>, failure_threshold: u32, power_ceiling_w: f64) -> Self {
        Self {
            device_id: device_id.into(),
            failure_threshold: failure_threshold.max(1),
            power_ceiling_w,
            phase: HealthPhase::Ok,
            consecutive_failures: 0,
            last_success_ms: None,
            offline_since_ms: None,
            co2_streak: 0,
            co2_armed: true,
            power_streak: 0,
            power_armed: true,
            smoke_prev: None,
        }
    }

    pub fn phase(&self) -> HealthPhase {
        self.phase
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Feed one reading; returns the events to append, in order.
    pub fn observe(&mut self, reading: &Reading) -> Vec<NewEvent> {
        match &reading.outcome {
            Ok(payload) => {
                let mut events = self.observe_success(reading.at_ms);
                events.extend(self.observe_payload(payload));
                events
            }
            Err(failure) => self.observe_failure(reading.at_ms, failure),
        }
    }

    fn observe_success(&mut self, at_ms: u64) -> Vec<NewEvent> {
        let mut events = Vec::new();
        let was = self.phase;
        let failures = self.consecutive_failures;

        self.phase = HealthPhase::Ok;
        self.consecutive_failures = 0;

        match was {
            HealthPhase::Ok => {}
            HealthPhase::Degraded => {
                events.push(NewEvent::info(
                    CATEGORY_CONNECTION,
                    self.device_id.clone(),
                    format!("recovered after {failures} failed probes"),
                ));
            }
            HealthPhase::Offline => {
                let downtime_s = self
                    .offline_since_ms
                    .map(|since| at_ms.saturating_sub(since) / 1000);
                events.push(
                    NewEvent::info(
                        CATEGORY_CONNECTION,
                        self.device_id.clone(),
                        format!("recovered after {failures} failed probes"),
                    )
                    .with_detail(serde_json::json!({
                        "downtime_duration_s": downtime_s,
                        "failures": failures,
                    })),
                );
            }
        }

        self.offline_since_ms = None;
        self.last_success_ms = Some(at_ms);
        events
    }

    fn observe_failure(
        &mut self,
        at_ms: u64,
        failure: &crate::driver::DriverFailure,
    ) -> Vec<NewEvent> {
        self.consecutive_failures += 1;
        let count = self.consecutive_failures;

        match self.phase {
            HealthPhase::Offline => vec![],
            _ if count >= self.failure_threshold => {
                self.phase = HealthPhase::Offline;
                self.offline_since_ms = Some(at_ms);
                let since_success_s = self
                    .last_success_ms
                    .map(|last| at_ms.saturating_sub(last) / 1000);
                vec![NewEvent::alarm(
                    CATEGORY_CONNECTION,
                    self.device_id.clone(),
                    format!("offline after {count} consecutive failures ({})", failure.cause),
                )
                .with_detail(serde_json::json!({
                    "consecutive_failures": count,
                    "duration_since_last_success_s": since_success_s,
                    "cause": failure.cause,
                    "error": failure.message,
                }))]
            }
            HealthPhase::Ok => {
                self.phase = HealthPhase::Degraded;
                vec![NewEvent::warning(
                    CATEGORY_CONNECTION,
                    self.device_id.clone(),
                    format!("probe failed ({}): {}", failure.cause, failure.message),
                )]
            }
            // Repeat failures below the threshold stay silent.
            HealthPhase::Degraded => vec![],
        }
    }

    // -- Domain overlays -------------------------------------------------------

    fn observe_payload(&mut self, payload: &Payload) -> Vec<NewEvent> {
        match payload {
            Payload::EnvSensor { modules } => {
                let peak = modules
                    .values()
                    .filter_map(|m| m.co2_ppm)
                    .fold(f64::NAN, f64::max);
                if peak.is_nan() {
                    return vec![];
                }
                self.observe_co2(peak)
            }
            Payload::Plug { power_w, .. } => self.observe_power(*power_w),
            Payload::Smoke { alert, .. } => self.observe_smoke(*alert),
            _ => vec![],
        }
    }

    fn observe_co2(&mut self, co2_ppm: f64) -> Vec<NewEvent> {
        if co2_ppm < CO2_REARM_PPM {
            self.co2_armed = true;
            self.co2_streak = 0;
            return vec![];
        }
        if co2_ppm < CO2_TRIGGER_PPM {
            // Between rearm and trigger: breaks the streak, keeps the arm state.
            self.co2_streak = 0;
            return vec![];
        }
        self.co2_streak += 1;
        if self.co2_armed && self.co2_streak >= OVERLAY_SAMPLES {
            self.co2_armed = false;
            return vec![NewEvent::warning(
                CATEGORY_ENV,
                self.device_id.clone(),
                format!("CO2 at {co2_ppm:.0} ppm for {OVERLAY_SAMPLES} consecutive probes"),
            )
            .with_detail(serde_json::json!({
                "co2_ppm": co2_ppm,
                "threshold_ppm": CO2_TRIGGER_PPM,
            }))];
        }
        vec![]
    }

    fn observe_power(&mut self, power_w: f64) -> Vec<NewEvent> {
        let rearm = self.power_ceiling_w * 0.9;
        if power_w < rearm {
            self.power_armed = true;
            self.power_streak = 0;
            return vec![];
        }
        if power_w < self.power_ceiling_w {
            self.power_streak = 0;
            return vec![];
        }
        self.power_streak += 1;
        if self.power_armed && self.power_streak >= OVERLAY_SAMPLES {
            self.power_armed = false;
            return vec![NewEvent::warning(
                CATEGORY_ENERGY,
                self.device_id.clone(),
                format!(
                    "power draw {power_w:.0} W at or above ceiling {:.0} W",
                    self.power_ceiling_w
                ),
            )
            .with_detail(serde_json::json!({
                "power_w": power_w,
                "ceiling_w": self.power_ceiling_w,
            }))];
        }
        vec![]
    }

    fn observe_smoke(&mut self, alert: SmokeAlert) -> Vec<NewEvent> {
        let prev = self.smoke_prev.unwrap_or(SmokeAlert::Clear);
        self.smoke_prev = Some(alert);
        if alert == prev {
            return vec![];
        }
        // Alert edges are the flap suppression here: one event per change.
        match alert {
            SmokeAlert::Warning => vec![NewEvent::warning(
                CATEGORY_SMOKE,
                self.device_id.clone(),
                "detector reports warning",
            )],
            SmokeAlert::Emergency => vec![NewEvent::alarm(
                CATEGORY_SMOKE,
                self.device_id.clone(),
                "detector reports EMERGENCY",
            )],
            SmokeAlert::Clear => vec![NewEvent::info(
                CATEGORY_SMOKE,
                self.device_id.clone(),
                "detector cleared",
            )],
        }
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
