// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;

use super::*;
use crate::driver::{DriverFailure, EnvMeasurement, FailureCause};
use crate::events::Severity;

fn success(at_ms: u64) -> Reading {
    Reading {
        device_id: "cam-1".to_owned(),
        at_ms,
        outcome: Ok(Payload::Camera { online: true, firmware: None, last_frame_ms: None }),
    }
}

fn failure(at_ms: u64) -> Reading {
    Reading {
        device_id: "cam-1".to_owned(),
        at_ms,
        outcome: Err(DriverFailure::new(FailureCause::Timeout, "probe deadline exceeded")),
    }
}

fn env_reading(co2: f64) -> Reading {
    let mut modules = BTreeMap::new();
    modules.insert(
        "indoor".to_owned(),
        EnvMeasurement { co2_ppm: Some(co2), ..EnvMeasurement::default() },
    );
    Reading {
        device_id: "weather-1".to_owned(),
        at_ms: 0,
        outcome: Ok(Payload::EnvSensor { modules }),
    }
}

fn plug_reading(power_w: f64) -> Reading {
    Reading {
        device_id: "plug-1".to_owned(),
        at_ms: 0,
        outcome: Ok(Payload::Plug {
            on: true,
            power_w,
            energy_wh: 0.0,
            voltage_v: 230.0,
            current_a: 0.0,
        }),
    }
}

fn smoke_reading(alert: SmokeAlert) -> Reading {
    Reading {
        device_id: "smoke-1".to_owned(),
        at_ms: 0,
        outcome: Ok(Payload::Smoke {
            battery_percent: 90,
            online: true,
            last_self_test_ms: None,
            alert,
        }),
    }
}

#[test]
fn flap_suppression_scenario() {
    // Outcomes S S F F S F F F S with K=3 must produce exactly five events:
    // warning, info, warning, alarm, info.
    let mut monitor = HealthMonitor::new("cam-1", 3, 1500.0);
    let outcomes = [true, true, false, false, true, false, false, false, true];

    let mut emitted = Vec::new();
    for (n, ok) in outcomes.iter().enumerate() {
        let at = (n as u64 + 1) * 1000;
        let reading = if *ok { success(at) } else { failure(at) };
        emitted.extend(monitor.observe(&reading));
    }

    let severities: Vec<Severity> = emitted.iter().map(|e| e.severity).collect();
    assert_eq!(
        severities,
        vec![
            Severity::Warning,
            Severity::Info,
            Severity::Warning,
            Severity::Alarm,
            Severity::Info,
        ],
        "events: {emitted:?}"
    );
    assert!(emitted.iter().all(|e| e.category == CATEGORY_CONNECTION));
    assert_eq!(monitor.phase(), HealthPhase::Ok);
}

#[test]
fn silent_while_healthy() {
    let mut monitor = HealthMonitor::new("cam-1", 3, 1500.0);
    for n in 0..10 {
        assert!(monitor.observe(&success(n * 1000)).is_empty());
    }
    assert_eq!(monitor.phase(), HealthPhase::Ok);
}

#[test]
fn offline_detail_names_failure_history() {
    let mut monitor = HealthMonitor::new("cam-1", 3, 1500.0);
    monitor.observe(&success(1_000));
    monitor.observe(&failure(2_000));
    monitor.observe(&failure(3_000));
    let events = monitor.observe(&failure(61_000));

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::Alarm);
    let detail = events[0].detail.as_ref().unwrap_or_else(|| panic!("no detail"));
    assert_eq!(detail["consecutive_failures"], 3);
    assert_eq!(detail["duration_since_last_success_s"], 60);
    assert_eq!(detail["cause"], "timeout");
}

#[test]
fn recovery_from_offline_reports_downtime() {
    let mut monitor = HealthMonitor::new("cam-1", 2, 1500.0);
    monitor.observe(&success(1_000));
    monitor.observe(&failure(2_000));
    monitor.observe(&failure(3_000)); // offline at t=3s
    monitor.observe(&failure(10_000)); // suppressed
    let events = monitor.observe(&success(33_000));

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::Info);
    let detail = events[0].detail.as_ref().unwrap_or_else(|| panic!("no detail"));
    assert_eq!(detail["downtime_duration_s"], 30);
}

#[test]
fn threshold_one_goes_straight_to_offline() {
    let mut monitor = HealthMonitor::new("cam-1", 1, 1500.0);
    let events = monitor.observe(&failure(1_000));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::Alarm);
    assert_eq!(monitor.phase(), HealthPhase::Offline);
}

#[test]
fn offline_failures_stay_silent_until_recovery() {
    let mut monitor = HealthMonitor::new("cam-1", 2, 1500.0);
    monitor.observe(&failure(1_000));
    monitor.observe(&failure(2_000));
    for n in 3..20 {
        assert!(monitor.observe(&failure(n * 1000)).is_empty());
    }
    assert_eq!(monitor.consecutive_failures(), 19);
}

// -- CO2 overlay ---------------------------------------------------------------

#[test]
fn co2_fires_on_second_consecutive_high_sample() {
    let mut monitor = HealthMonitor::new("weather-1", 3, 1500.0);
    assert!(monitor.observe(&env_reading(1100.0)).is_empty());
    let events = monitor.observe(&env_reading(1150.0));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].category, CATEGORY_ENV);
    assert_eq!(events[0].severity, Severity::Warning);

    // One-shot until hysteresis rearms.
    for _ in 0..10 {
        assert!(monitor.observe(&env_reading(1200.0)).is_empty());
    }
}

#[test]
fn co2_rearms_only_below_900() {
    let mut monitor = HealthMonitor::new("weather-1", 3, 1500.0);
    monitor.observe(&env_reading(1100.0));
    monitor.observe(&env_reading(1100.0)); // fires
    monitor.observe(&env_reading(950.0)); // below trigger but above rearm
    monitor.observe(&env_reading(1100.0));
    assert!(monitor.observe(&env_reading(1100.0)).is_empty(), "not rearmed yet");

    monitor.observe(&env_reading(850.0)); // rearm
    monitor.observe(&env_reading(1100.0));
    let events = monitor.observe(&env_reading(1100.0));
    assert_eq!(events.len(), 1, "rearmed after dropping below 900");
}

#[test]
fn co2_single_spike_does_not_fire() {
    let mut monitor = HealthMonitor::new("weather-1", 3, 1500.0);
    assert!(monitor.observe(&env_reading(1500.0)).is_empty());
    assert!(monitor.observe(&env_reading(600.0)).is_empty());
    assert!(monitor.observe(&env_reading(1500.0)).is_empty());
}

// -- Energy overlay ------------------------------------------------------------

#[test]
fn power_ceiling_fires_after_two_samples_and_rearms() {
    let mut monitor = HealthMonitor::new("plug-1", 3, 1000.0);
    assert!(monitor.observe(&plug_reading(1200.0)).is_empty());
    let events = monitor.observe(&plug_reading(1250.0));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].category, CATEGORY_ENERGY);

    // 950 W is above the 900 W rearm line: stays disarmed.
    monitor.observe(&plug_reading(950.0));
    monitor.observe(&plug_reading(1200.0));
    assert!(monitor.observe(&plug_reading(1200.0)).is_empty());

    // Dropping under 90% of the ceiling rearms.
    monitor.observe(&plug_reading(500.0));
    monitor.observe(&plug_reading(1200.0));
    assert_eq!(monitor.observe(&plug_reading(1200.0)).len(), 1);
}

// -- Smoke overlay -------------------------------------------------------------

#[test]
fn smoke_edges_emit_once_per_change() {
    let mut monitor = HealthMonitor::new("smoke-1", 3, 1500.0);
    assert!(monitor.observe(&smoke_reading(SmokeAlert::Clear)).is_empty());

    let warn = monitor.observe(&smoke_reading(SmokeAlert::Warning));
    assert_eq!(warn.len(), 1);
    assert_eq!(warn[0].severity, Severity::Warning);
    assert!(monitor.observe(&smoke_reading(SmokeAlert::Warning)).is_empty());

    let alarm = monitor.observe(&smoke_reading(SmokeAlert::Emergency));
    assert_eq!(alarm.len(), 1);
    assert_eq!(alarm[0].severity, Severity::Alarm);
    assert!(monitor.observe(&smoke_reading(SmokeAlert::Emergency)).is_empty());

    let clear = monitor.observe(&smoke_reading(SmokeAlert::Clear));
    assert_eq!(clear.len(), 1);
    assert_eq!(clear[0].severity, Severity::Info);
}

#[test]
fn smoke_first_reading_emergency_fires_immediately() {
    let mut monitor = HealthMonitor::new("smoke-1", 3, 1500.0);
    let events = monitor.observe(&smoke_reading(SmokeAlert::Emergency));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::Alarm);
}

// -- Properties ----------------------------------------------------------------

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// After K consecutive failures exactly one alarm fires, and no more
        /// connection events appear until a success.
        #[test]
        fn one_alarm_per_outage(
            threshold in 1u32..6,
            outcomes in proptest::collection::vec(any::<bool>(), 1..80),
        ) {
            let mut monitor = HealthMonitor::new("dev-1", threshold, 1500.0);
            let mut streak = 0u32;
            let mut alarmed = false;
            for (n, ok) in outcomes.iter().enumerate() {
                let at = (n as u64 + 1) * 1000;
                let reading = if *ok { success(at) } else { failure(at) };
                let events = monitor.observe(&reading);
                let alarms =
                    events.iter().filter(|e| e.severity == Severity::Alarm).count();
                if *ok {
                    streak = 0;
                    alarmed = false;
                    prop_assert_eq!(alarms, 0);
                } else {
                    streak += 1;
                    if streak == threshold {
                        prop_assert_eq!(alarms, 1, "alarm fires exactly at the threshold");
                        alarmed = true;
                    } else {
                        prop_assert_eq!(alarms, 0);
                        if alarmed {
                            prop_assert!(events.is_empty(), "offline failures are silent");
                        }
                    }
                }
            }
        }

        /// CO2 crossing the trigger upward emits exactly one warning until
        /// the rearm threshold is crossed downward.
        #[test]
        fn co2_hysteresis_one_shot(samples in proptest::collection::vec(500f64..1500f64, 2..60)) {
            let mut monitor = HealthMonitor::new("weather-1", 3, 1500.0);
            let mut armed = true;
            let mut streak = 0u32;
            for co2 in &samples {
                let events = monitor.observe(&env_reading(*co2));
                let fired = !events.is_empty();
                // Shadow model of the spec rule.
                let expect_fire;
                if *co2 < 900.0 {
                    armed = true;
                    streak = 0;
                    expect_fire = false;
                } else if *co2 < 1000.0 {
                    streak = 0;
                    expect_fire = false;
                } else {
                    streak += 1;
                    expect_fire = armed && streak >= 2;
                    if expect_fire {
                        armed = false;
                    }
                }
                prop_assert_eq!(fired, expect_fire, "co2={}", co2);
            }
        }
    }
}
