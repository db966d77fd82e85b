// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device descriptors and per-device runtime state.
//!
//! Descriptors are declarative and immutable after load; a config reload
//! replaces them atomically. Runtime state is written only by the device's
//! scheduler task; everyone else reads snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of device categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    Camera,
    Plug,
    Bulb,
    SensorEnv,
    SensorSmoke,
    Robot,
    Doorbell,
}

impl DeviceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Camera => "camera",
            Self::Plug => "plug",
            Self::Bulb => "bulb",
            Self::SensorEnv => "sensor_env",
            Self::SensorSmoke => "sensor_smoke",
            Self::Robot => "robot",
            Self::Doorbell => "doorbell",
        }
    }
}

impl fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability flags declared on the descriptor.
///
/// The driver's `describe()` may report a narrower set; the narrower view
/// wins everywhere capabilities are consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityFlags {
    /// Device accepts control actions (not read-only).
    #[serde(default)]
    pub controllable: bool,
    /// Camera supports pan/tilt/zoom.
    #[serde(default)]
    pub ptz: bool,
    /// Camera exposes a live stream URL.
    #[serde(default)]
    pub stream: bool,
}

impl CapabilityFlags {
    /// Intersect declared flags with what the driver actually supports.
    pub fn narrow(&self, other: &CapabilityFlags) -> CapabilityFlags {
        CapabilityFlags {
            controllable: self.controllable && other.controllable,
            ptz: self.ptz && other.ptz,
            stream: self.stream && other.stream,
        }
    }
}

/// Declarative record for one device, parsed from the config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Stable identifier, unique across the process.
    pub id: String,
    /// Driver tag naming which adapter handles this device.
    pub driver: String,
    pub category: DeviceCategory,
    /// Human label shown on dashboards.
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub read_only: bool,
    /// Per-device probe interval override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,
    #[serde(default)]
    pub capabilities: CapabilityFlags,
    /// Driver-specific parameters. Credential values are symbolic references
    /// resolved by the secret sink; raw secrets never appear here.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl DeviceDescriptor {
    /// Fetch a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Fetch a boolean parameter, defaulting to false.
    pub fn param_bool(&self, key: &str) -> bool {
        self.params.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Fetch a numeric parameter.
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(|v| v.as_f64())
    }
}

/// Coarse health phase assigned by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthPhase {
    Ok,
    Degraded,
    Offline,
}

impl HealthPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Degraded => "degraded",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for HealthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable per-device runtime state. Owned by the device's scheduler task.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRuntime {
    pub phase: HealthPhase,
    pub consecutive_failures: u32,
    /// Epoch millis of the last successful probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_ms: Option<u64>,
    /// Last classified error, already redacted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Last successful reading payload, serialized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reading: Option<serde_json::Value>,
}

impl Default for DeviceRuntime {
    fn default() -> Self {
        Self {
            phase: HealthPhase::Ok,
            consecutive_failures: 0,
            last_success_ms: None,
            last_error: None,
            last_reading: None,
        }
    }
}

/// Read-only projection of a device for API consumers.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    #[serde(flatten)]
    pub runtime: DeviceRuntime,
    /// Depth of the action queue waiting on this device.
    pub pending_actions: u32,
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
