// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prometheus metric families over the registry and the event pipeline.
//!
//! All writes are non-blocking in-memory updates; a scrape renders a
//! consistent snapshot and never blocks a scheduler.

use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

use crate::driver::{FailureCause, GaugeKind, Payload};
use crate::events::Severity;

/// Probe duration buckets in seconds.
const PROBE_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0];

pub struct Metrics {
    registry: Registry,
    device_up: IntGaugeVec,
    probe_failures: IntCounterVec,
    probe_duration: HistogramVec,
    events_total: IntCounterVec,
    events_unacknowledged: IntGaugeVec,
    event_store_size: IntGauge,
    plug_power_watts: GaugeVec,
    sensor_temperature: GaugeVec,
    sensor_co2: GaugeVec,
    sensor_humidity: GaugeVec,
    robot_battery: GaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let device_up = IntGaugeVec::new(
            Opts::new("device_up", "1 iff the device health phase is ok"),
            &["id", "category", "driver"],
        )?;
        let probe_failures = IntCounterVec::new(
            Opts::new("device_probe_failures_total", "Classified probe failures"),
            &["id", "cause"],
        )?;
        let probe_duration = HistogramVec::new(
            HistogramOpts::new("device_probe_duration_seconds", "Probe wall time")
                .buckets(PROBE_BUCKETS.to_vec()),
            &["id"],
        )?;
        let events_total = IntCounterVec::new(
            Opts::new("events_total", "Events appended to the store"),
            &["severity", "category"],
        )?;
        let events_unacknowledged = IntGaugeVec::new(
            Opts::new("events_unacknowledged", "Retained unacknowledged events"),
            &["severity"],
        )?;
        let event_store_size =
            IntGauge::new("event_store_size", "Events currently retained")?;
        let plug_power_watts = GaugeVec::new(
            Opts::new("plug_power_watts", "Instantaneous plug power draw"),
            &["id"],
        )?;
        let sensor_temperature = GaugeVec::new(
            Opts::new("sensor_temperature_celsius", "Module temperature"),
            &["id", "module"],
        )?;
        let sensor_co2 = GaugeVec::new(
            Opts::new("sensor_co2_ppm", "Module CO2 concentration"),
            &["id", "module"],
        )?;
        let sensor_humidity = GaugeVec::new(
            Opts::new("sensor_humidity_percent", "Module relative humidity"),
            &["id", "module"],
        )?;
        let robot_battery = GaugeVec::new(
            Opts::new("robot_battery_percent", "Robot battery level"),
            &["id"],
        )?;

        registry.register(Box::new(device_up.clone()))?;
        registry.register(Box::new(probe_failures.clone()))?;
        registry.register(Box::new(probe_duration.clone()))?;
        registry.register(Box::new(events_total.clone()))?;
        registry.register(Box::new(events_unacknowledged.clone()))?;
        registry.register(Box::new(event_store_size.clone()))?;
        registry.register(Box::new(plug_power_watts.clone()))?;
        registry.register(Box::new(sensor_temperature.clone()))?;
        registry.register(Box::new(sensor_co2.clone()))?;
        registry.register(Box::new(sensor_humidity.clone()))?;
        registry.register(Box::new(robot_battery.clone()))?;

        Ok(Self {
            registry,
            device_up,
            probe_failures,
            probe_duration,
            events_total,
            events_unacknowledged,
            event_store_size,
            plug_power_watts,
            sensor_temperature,
            sensor_co2,
            sensor_humidity,
            robot_battery,
        })
    }

    /// Render the text exposition for a scrape.
    pub fn render(&self) -> String {
        let families = self.registry.gather();
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&families, &mut buf) {
            tracing::warn!(err = %e, "metric encoding failed");
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }

    pub fn set_device_up(&self, id: &str, category: &str, driver: &str, up: bool) {
        self.device_up
            .with_label_values(&[id, category, driver])
            .set(i64::from(up));
    }

    pub fn observe_probe_duration(&self, id: &str, seconds: f64) {
        self.probe_duration.with_label_values(&[id]).observe(seconds);
    }

    pub fn record_probe_failure(&self, id: &str, cause: &str) {
        self.probe_failures.with_label_values(&[id, cause]).inc();
    }

    pub fn record_event(&self, severity: Severity, category: &str) {
        self.events_total
            .with_label_values(&[severity.as_str(), category])
            .inc();
    }

    pub fn set_unacknowledged(&self, warning: u64, alarm: u64) {
        self.events_unacknowledged
            .with_label_values(&["warning"])
            .set(warning as i64);
        self.events_unacknowledged
            .with_label_values(&["alarm"])
            .set(alarm as i64);
    }

    pub fn set_store_size(&self, size: usize) {
        self.event_store_size.set(size as i64);
    }

    /// Populate the domain gauges a driver advertised for this payload.
    pub fn record_payload(&self, id: &str, payload: &Payload, gauges: &[GaugeKind]) {
        match payload {
            Payload::Plug { power_w, .. } => {
                if gauges.contains(&GaugeKind::PlugPowerWatts) {
                    self.plug_power_watts.with_label_values(&[id]).set(*power_w);
                }
            }
            Payload::EnvSensor { modules } => {
                for (module, m) in modules {
                    if gauges.contains(&GaugeKind::SensorTemperatureCelsius) {
                        if let Some(t) = m.temperature_c {
                            self.sensor_temperature
                                .with_label_values(&[id, module])
                                .set(t);
                        }
                    }
                    if gauges.contains(&GaugeKind::SensorCo2Ppm) {
                        if let Some(co2) = m.co2_ppm {
                            self.sensor_co2.with_label_values(&[id, module]).set(co2);
                        }
                    }
                    if gauges.contains(&GaugeKind::SensorHumidityPercent) {
                        if let Some(h) = m.humidity_percent {
                            self.sensor_humidity
                                .with_label_values(&[id, module])
                                .set(h);
                        }
                    }
                }
            }
            Payload::Robot { battery_percent, .. } => {
                if gauges.contains(&GaugeKind::RobotBatteryPercent) {
                    self.robot_battery
                        .with_label_values(&[id])
                        .set(f64::from(*battery_percent));
                }
            }
            Payload::Camera { .. } | Payload::Bulb { .. } | Payload::Smoke { .. } => {}
        }
    }

    /// Drop a removed device's per-id series so reloads don't leave ghosts.
    ///
    /// `modules` names the env-sensor modules the device last reported; the
    /// per-module gauges are keyed `{id, module}` and cannot be cleared by
    /// id alone.
    pub fn forget_device(&self, id: &str, category: &str, driver: &str, modules: &[String]) {
        let _ = self.device_up.remove_label_values(&[id, category, driver]);
        let _ = self.probe_duration.remove_label_values(&[id]);
        for cause in FailureCause::ALL {
            let _ = self.probe_failures.remove_label_values(&[id, cause.as_str()]);
        }
        let _ = self.plug_power_watts.remove_label_values(&[id]);
        let _ = self.robot_battery.remove_label_values(&[id]);
        for module in modules {
            let _ = self.sensor_temperature.remove_label_values(&[id, module]);
            let _ = self.sensor_co2.remove_label_values(&[id, module]);
            let _ = self.sensor_humidity.remove_label_values(&[id, module]);
        }
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
