// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Driver capability interface and the built-in vendor adapter families.
//!
//! Every driver is polymorphic over the same four operations: `probe`,
//! `act`, `describe`, `close`. Failures are classified into a shared
//! taxonomy so the scheduler and the health state machine never need to
//! know vendor details. Drivers own their vendor auth; credential refresh
//! never leaks past this module.

pub mod bulb;
pub mod camera;
pub mod client;
pub mod disabled;
pub mod env_sensor;
pub mod mock;
pub mod plug;
pub mod robot;
pub mod smoke;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::device::{epoch_ms, CapabilityFlags, DeviceDescriptor};
use crate::secret::SecretStore;

// -- Failure taxonomy ----------------------------------------------------------

/// Classified cause shared by every driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// Deadline exceeded, no response.
    Timeout,
    /// Credential rejected or expired.
    Auth,
    /// Network unreachable, TLS failure, connection reset.
    Transport,
    /// Remote responded but the payload is unparseable or off-schema.
    Protocol,
    /// Device reachable but refuses the operation (busy, locked, read-only).
    Unavailable,
}

impl FailureCause {
    /// Every classified cause.
    pub const ALL: [FailureCause; 5] = [
        Self::Timeout,
        Self::Auth,
        Self::Transport,
        Self::Protocol,
        Self::Unavailable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Auth => "auth",
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified driver failure: cause plus a short, already-redacted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{cause}: {message}")]
pub struct DriverFailure {
    pub cause: FailureCause,
    pub message: String,
}

impl DriverFailure {
    pub fn new(cause: FailureCause, message: impl Into<String>) -> Self {
        Self { cause, message: message.into() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureCause::Timeout, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(FailureCause::Auth, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureCause::Transport, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(FailureCause::Protocol, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FailureCause::Unavailable, message)
    }
}

pub type DriverResult<T> = Result<T, DriverFailure>;

// -- Probe payloads ------------------------------------------------------------

/// Color of a light: RGB triplet or color temperature in kelvin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightColor {
    Rgb { r: u8, g: u8, b: u8 },
    TemperatureK { kelvin: u32 },
}

/// Smoke/CO detector alert state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmokeAlert {
    Clear,
    Warning,
    Emergency,
}

impl SmokeAlert {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::Warning => "warning",
            Self::Emergency => "emergency",
        }
    }
}

/// Robot motion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    Idle,
    Moving,
    Docking,
    Patrolling,
    Charging,
    Error,
}

/// Robot pose in the house frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobotPose {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

/// One environmental module's measurements. Fields absent when the module
/// does not report them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvMeasurement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub co2_ppm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure_hpa: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_db: Option<f64>,
}

/// Normalized success payload of one probe, tagged per driver family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Camera {
        online: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        firmware: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_frame_ms: Option<u64>,
    },
    Plug {
        on: bool,
        power_w: f64,
        energy_wh: f64,
        voltage_v: f64,
        current_a: f64,
    },
    Bulb {
        reachable: bool,
        on: bool,
        /// 0–100.
        brightness: u8,
        color: LightColor,
    },
    EnvSensor {
        modules: BTreeMap<String, EnvMeasurement>,
    },
    Smoke {
        battery_percent: u8,
        online: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_self_test_ms: Option<u64>,
        alert: SmokeAlert,
    },
    Robot {
        position: RobotPose,
        battery_percent: u8,
        motion: MotionState,
    },
}

/// The normalized output of one probe cycle.
#[derive(Debug, Clone)]
pub struct Reading {
    pub device_id: String,
    /// Epoch millis when the probe concluded.
    pub at_ms: u64,
    pub outcome: DriverResult<Payload>,
}

impl Reading {
    pub fn success(device_id: impl Into<String>, payload: Payload) -> Self {
        Self { device_id: device_id.into(), at_ms: epoch_ms(), outcome: Ok(payload) }
    }

    pub fn failure(device_id: impl Into<String>, failure: DriverFailure) -> Self {
        Self { device_id: device_id.into(), at_ms: epoch_ms(), outcome: Err(failure) }
    }
}

// -- Capability description ----------------------------------------------------

/// Domain gauges a driver's payload can populate on the metrics surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GaugeKind {
    PlugPowerWatts,
    SensorTemperatureCelsius,
    SensorCo2Ppm,
    SensorHumidityPercent,
    RobotBatteryPercent,
}

/// One parameter in an action's declared schema.
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    /// `string`, `number`, `integer`, or `boolean`.
    pub kind: &'static str,
    pub required: bool,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: &'static str) -> Self {
        Self { name, kind, required: true }
    }

    pub const fn optional(name: &'static str, kind: &'static str) -> Self {
        Self { name, kind, required: false }
    }
}

/// One action a driver supports, with its parameter schema.
#[derive(Debug, Clone, Serialize)]
pub struct ActionSpec {
    pub name: &'static str,
    pub params: Vec<ParamSpec>,
}

/// What a driver actually supports. May be narrower than the descriptor's
/// declared capabilities; the narrower view wins.
#[derive(Debug, Clone, Serialize)]
pub struct DriverInfo {
    pub driver: &'static str,
    pub capabilities: CapabilityFlags,
    pub actions: Vec<ActionSpec>,
    pub gauges: Vec<GaugeKind>,
}

// -- The capability trait ------------------------------------------------------

/// The capability interface every vendor adapter satisfies.
///
/// `probe` and `act` must be safe to call concurrently on the same driver;
/// drivers that cannot serialize vendor sessions internally rely on the
/// scheduler's per-device operation lock, which already serializes callers.
/// Both honor the supplied cancellation token; deadlines are enforced by the
/// caller.
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// One read cycle. Classified failure on any problem; never panics.
    async fn probe(&self, cancel: &CancellationToken) -> DriverResult<Payload>;

    /// Execute a side-effecting command. Action names are stable per driver.
    /// Read-only devices fail every action with `unavailable`.
    async fn act(
        &self,
        action: &str,
        params: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> DriverResult<serde_json::Value>;

    /// The capability set the driver actually supports.
    fn describe(&self) -> DriverInfo;

    /// Release sockets, tokens, background loops. Idempotent.
    async fn close(&self);
}

// -- Construction --------------------------------------------------------------

/// Why a driver could not be constructed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    #[error("unknown driver: {0}")]
    UnknownDriver(String),
    #[error("bad driver config: {0}")]
    BadConfig(String),
    #[error("unresolved credential reference: {0}")]
    UnresolvedSecret(String),
}

/// Construct the driver named by the descriptor's driver tag.
///
/// Secret references in `params` are resolved here, once, at construction
/// time. An unresolvable reference fails the build; the registry then falls
/// back to the `disabled` driver so operators see the device rather than
/// having it silently vanish.
pub async fn build(
    descriptor: &DeviceDescriptor,
    secrets: &SecretStore,
) -> Result<Box<dyn Driver>, BuildError> {
    match descriptor.driver.as_str() {
        "tapo_camera" | "onvif_camera" | "ring_camera" | "usb_webcam" | "pet_camera" => {
            Ok(Box::new(camera::CameraDriver::build(descriptor, secrets).await?))
        }
        "tapo_plug" => Ok(Box::new(plug::PlugDriver::build(descriptor, secrets).await?)),
        "hue_bulb" | "tapo_bulb" => {
            Ok(Box::new(bulb::BulbDriver::build(descriptor, secrets).await?))
        }
        "netatmo_station" => {
            Ok(Box::new(env_sensor::EnvSensorDriver::build(descriptor, secrets).await?))
        }
        "nest_protect" => Ok(Box::new(smoke::SmokeDriver::build(descriptor, secrets).await?)),
        "rover_robot" => Ok(Box::new(robot::RobotDriver::build(descriptor, secrets).await?)),
        "disabled" => Ok(Box::new(disabled::DisabledDriver::new("disabled by configuration"))),
        other => Err(BuildError::UnknownDriver(other.to_owned())),
    }
}

/// All driver tags `build` accepts, for config validation and docs.
pub const KNOWN_DRIVERS: &[&str] = &[
    "tapo_camera",
    "onvif_camera",
    "ring_camera",
    "usb_webcam",
    "pet_camera",
    "tapo_plug",
    "hue_bulb",
    "tapo_bulb",
    "netatmo_station",
    "nest_protect",
    "rover_robot",
    "disabled",
];

/// Resolve a credential parameter: the param value is a symbolic reference
/// looked up through the secret sink.
pub(crate) async fn resolve_credential(
    descriptor: &DeviceDescriptor,
    secrets: &SecretStore,
    param: &str,
) -> Result<Option<String>, BuildError> {
    match descriptor.param_str(param) {
        None => Ok(None),
        Some(reference) => match secrets.resolve(reference).await {
            Some(value) => Ok(Some(value)),
            None => Err(BuildError::UnresolvedSecret(reference.to_owned())),
        },
    }
}

/// Shared parse of the `mock` / `mock_fail` params every driver honors.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockMode {
    pub enabled: bool,
    /// Force every probe/act to fail with this cause (demo and test rigs).
    pub fail: Option<FailureCause>,
}

impl MockMode {
    pub fn from_descriptor(descriptor: &DeviceDescriptor) -> Result<Self, BuildError> {
        let enabled = descriptor.param_bool("mock");
        let fail = match descriptor.param_str("mock_fail") {
            None => None,
            Some(cause) => Some(
                serde_json::from_value::<FailureCause>(serde_json::Value::String(
                    cause.to_owned(),
                ))
                .map_err(|_| BuildError::BadConfig(format!("unknown mock_fail cause: {cause}")))?,
            ),
        };
        if fail.is_some() && !enabled {
            return Err(BuildError::BadConfig("mock_fail requires mock: true".to_owned()));
        }
        Ok(Self { enabled, fail })
    }
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
