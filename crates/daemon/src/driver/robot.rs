// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Patrol robot driver.
//!
//! `estop` always succeeds locally: the stop is latched in the driver even
//! when the robot is unreachable, and delivery is retried on every probe
//! until the robot confirms. While the latch is engaged, motion commands
//! fail `unavailable` until a successful `dock` or an explicit `estop_clear`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::device::{CapabilityFlags, DeviceDescriptor};
use crate::secret::SecretStore;

use super::client::VendorClient;
use super::mock::{draining_percent, wave, MockRecorder, MockTicker};
use super::{
    resolve_credential, ActionSpec, BuildError, Driver, DriverFailure, DriverInfo, DriverResult,
    GaugeKind, MockMode, MotionState, ParamSpec, Payload, RobotPose,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);
const MAX_MOVE_DURATION_S: f64 = 10.0;

pub struct RobotDriver {
    id: String,
    read_only: bool,
    declared: CapabilityFlags,
    mock: MockMode,
    ticker: MockTicker,
    recorder: MockRecorder,
    client: Option<VendorClient>,
    token: Option<String>,
    /// E-stop latch: engaged locally, cleared by dock/estop_clear.
    estopped: AtomicBool,
    /// E-stop accepted locally but not yet confirmed by the robot.
    estop_pending: AtomicBool,
    /// Cached motion state, authoritative while the robot is unreachable.
    cached_motion: Mutex<MotionState>,
}

impl RobotDriver {
    pub async fn build(
        descriptor: &DeviceDescriptor,
        secrets: &SecretStore,
    ) -> Result<Self, BuildError> {
        let mock = MockMode::from_descriptor(descriptor)?;
        let (client, token) = if mock.enabled {
            (None, None)
        } else {
            let host = descriptor
                .param_str("host")
                .ok_or_else(|| BuildError::BadConfig("robot requires params.host".to_owned()))?;
            let port = descriptor.param_f64("port").unwrap_or(8080.0) as u16;
            let client = VendorClient::new(format!("http://{host}:{port}"), REQUEST_TIMEOUT);
            let token = resolve_credential(descriptor, secrets, "credential").await?;
            (Some(client), token)
        };

        Ok(Self {
            id: descriptor.id.clone(),
            read_only: descriptor.read_only,
            declared: descriptor.capabilities,
            mock,
            ticker: MockTicker::new(),
            recorder: MockRecorder::new(),
            client,
            token,
            estopped: AtomicBool::new(false),
            estop_pending: AtomicBool::new(false),
            cached_motion: Mutex::new(MotionState::Idle),
        })
    }

    pub fn recorded_actions(&self) -> Vec<(String, serde_json::Value)> {
        self.recorder.recorded()
    }

    fn client(&self) -> DriverResult<&VendorClient> {
        self.client
            .as_ref()
            .ok_or_else(|| DriverFailure::protocol("robot driver has no transport"))
    }

    /// Deliver a latched, unconfirmed e-stop to the robot.
    async fn flush_pending_estop(&self) {
        if !self.estop_pending.load(Ordering::Relaxed) {
            return;
        }
        let delivered = if self.mock.enabled {
            true
        } else {
            match self.client() {
                Ok(client) => client
                    .post_json("/api/estop", &serde_json::json!({}), self.token.as_deref())
                    .await
                    .is_ok(),
                Err(_) => false,
            }
        };
        if delivered {
            self.estop_pending.store(false, Ordering::Relaxed);
            tracing::info!(device_id = %self.id, "deferred e-stop confirmed by robot");
        }
    }

    fn mock_probe(&self) -> DriverResult<Payload> {
        if let Some(cause) = self.mock.fail {
            return Err(DriverFailure::new(cause, "mock-injected failure"));
        }
        let tick = self.ticker.next();
        let motion = *self.cached_motion.lock();
        Ok(Payload::Robot {
            position: RobotPose {
                x: wave(&self.id, tick, -6.0, 6.0),
                y: wave(&self.id, tick.wrapping_add(9), -4.0, 4.0),
                heading: wave(&self.id, tick, 0.0, 359.0),
            },
            battery_percent: draining_percent(&self.id, tick),
            motion,
        })
    }

    async fn real_probe(&self) -> DriverResult<Payload> {
        let status = self.client()?.get_json("/api/state", self.token.as_deref()).await?;
        let motion = match status.get("motion").and_then(|v| v.as_str()) {
            Some(raw) => serde_json::from_value(serde_json::Value::String(raw.to_owned()))
                .map_err(|_| DriverFailure::protocol(format!("unknown motion state: {raw}")))?,
            None => return Err(DriverFailure::protocol("robot state missing motion")),
        };
        *self.cached_motion.lock() = motion;
        let pose = |axis: &str| status.get("position").and_then(|p| p.get(axis)).and_then(|v| v.as_f64());
        Ok(Payload::Robot {
            position: RobotPose {
                x: pose("x").unwrap_or(0.0),
                y: pose("y").unwrap_or(0.0),
                heading: pose("heading").unwrap_or(0.0),
            },
            battery_percent: status
                .get("battery_percent")
                .and_then(|v| v.as_u64())
                .unwrap_or(0)
                .min(100) as u8,
            motion,
        })
    }

    async fn act_move(&self, params: &serde_json::Value) -> DriverResult<serde_json::Value> {
        let linear = params.get("linear").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let angular = params.get("angular").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let raw_duration = params.get("duration").and_then(|v| v.as_f64()).unwrap_or(1.0);
        let linear_clamped = linear.clamp(-1.0, 1.0);
        let angular_clamped = angular.clamp(-1.0, 1.0);
        let duration = raw_duration.clamp(0.0, MAX_MOVE_DURATION_S);
        let clamped = (linear - linear_clamped).abs() > f64::EPSILON
            || (angular - angular_clamped).abs() > f64::EPSILON
            || (raw_duration - duration).abs() > f64::EPSILON;

        let body = serde_json::json!({
            "linear": linear_clamped,
            "angular": angular_clamped,
            "duration_s": duration,
        });
        if self.mock.enabled {
            self.recorder.record("move", &body);
            *self.cached_motion.lock() = MotionState::Moving;
        } else {
            self.client()?.post_json("/api/move", &body, self.token.as_deref()).await?;
        }
        Ok(serde_json::json!({
            "linear": linear_clamped,
            "angular": angular_clamped,
            "duration": duration,
            "clamped": clamped,
        }))
    }

    async fn act_patrol(&self, params: &serde_json::Value) -> DriverResult<serde_json::Value> {
        let route = params
            .get("route_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DriverFailure::protocol("patrol requires route_name"))?;
        let body = serde_json::json!({"route": route});
        if self.mock.enabled {
            self.recorder.record("patrol", &body);
            *self.cached_motion.lock() = MotionState::Patrolling;
        } else {
            self.client()?.post_json("/api/patrol", &body, self.token.as_deref()).await?;
        }
        Ok(serde_json::json!({"route_name": route}))
    }

    async fn act_dock(&self) -> DriverResult<serde_json::Value> {
        if self.mock.enabled {
            self.recorder.record("dock", &serde_json::Value::Null);
            *self.cached_motion.lock() = MotionState::Docking;
        } else {
            self.client()?
                .post_json("/api/dock", &serde_json::json!({}), self.token.as_deref())
                .await?;
        }
        // A successful dock releases the e-stop latch.
        self.estopped.store(false, Ordering::Relaxed);
        self.estop_pending.store(false, Ordering::Relaxed);
        Ok(serde_json::json!({"docking": true}))
    }

    /// Latch locally, then try to reach the robot. Never fails.
    async fn act_estop(&self) -> DriverResult<serde_json::Value> {
        self.estopped.store(true, Ordering::Relaxed);
        self.estop_pending.store(true, Ordering::Relaxed);
        *self.cached_motion.lock() = MotionState::Idle;
        if self.mock.enabled {
            self.recorder.record("estop", &serde_json::Value::Null);
            self.estop_pending.store(false, Ordering::Relaxed);
        } else if let Ok(client) = self.client() {
            if client
                .post_json("/api/estop", &serde_json::json!({}), self.token.as_deref())
                .await
                .is_ok()
            {
                self.estop_pending.store(false, Ordering::Relaxed);
            }
        }
        Ok(serde_json::json!({
            "stopped": true,
            "confirmed": !self.estop_pending.load(Ordering::Relaxed),
        }))
    }

    fn act_estop_clear(&self) -> DriverResult<serde_json::Value> {
        self.estopped.store(false, Ordering::Relaxed);
        self.estop_pending.store(false, Ordering::Relaxed);
        if self.mock.enabled {
            self.recorder.record("estop_clear", &serde_json::Value::Null);
        }
        Ok(serde_json::json!({"cleared": true}))
    }
}

#[async_trait::async_trait]
impl Driver for RobotDriver {
    async fn probe(&self, _cancel: &CancellationToken) -> DriverResult<Payload> {
        self.flush_pending_estop().await;
        if self.mock.enabled {
            self.mock_probe()
        } else {
            self.real_probe().await
        }
    }

    async fn act(
        &self,
        action: &str,
        params: &serde_json::Value,
        _cancel: &CancellationToken,
    ) -> DriverResult<serde_json::Value> {
        if self.read_only && action != "estop" {
            return Err(DriverFailure::unavailable(
                "device is configured read-only; control actions are disabled",
            ));
        }
        // E-stop must stay reachable even under mock-injected failures.
        if action == "estop" {
            return self.act_estop().await;
        }
        if let Some(cause) = self.mock.fail {
            return Err(DriverFailure::new(cause, "mock-injected failure"));
        }
        match action {
            "move" | "patrol" if self.estopped.load(Ordering::Relaxed) => {
                Err(DriverFailure::unavailable(
                    "e-stop latch engaged; dock or estop_clear first",
                ))
            }
            "move" => self.act_move(params).await,
            "patrol" => self.act_patrol(params).await,
            "dock" => self.act_dock().await,
            "estop_clear" => self.act_estop_clear(),
            other => Err(DriverFailure::unavailable(format!("unsupported action: {other}"))),
        }
    }

    fn describe(&self) -> DriverInfo {
        let supported = CapabilityFlags {
            controllable: !self.read_only,
            ptz: false,
            stream: false,
        };
        DriverInfo {
            driver: "rover_robot",
            capabilities: self.declared.narrow(&supported),
            actions: vec![
                ActionSpec {
                    name: "move",
                    params: vec![
                        ParamSpec::optional("linear", "number"),
                        ParamSpec::optional("angular", "number"),
                        ParamSpec::optional("duration", "number"),
                    ],
                },
                ActionSpec {
                    name: "patrol",
                    params: vec![ParamSpec::required("route_name", "string")],
                },
                ActionSpec { name: "dock", params: vec![] },
                ActionSpec { name: "estop", params: vec![] },
                ActionSpec { name: "estop_clear", params: vec![] },
            ],
            gauges: vec![GaugeKind::RobotBatteryPercent],
        }
    }

    async fn close(&self) {}
}

#[cfg(test)]
#[path = "robot_tests.rs"]
mod tests;
