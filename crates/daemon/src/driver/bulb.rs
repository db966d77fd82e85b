// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bulb / lighting driver. `light_set` merges the caller's partial state
//! onto the device's current state so unsupplied fields survive.

use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::device::{CapabilityFlags, DeviceDescriptor};
use crate::secret::SecretStore;

use super::client::VendorClient;
use super::mock::{MockRecorder, MockTicker};
use super::{
    resolve_credential, ActionSpec, BuildError, Driver, DriverFailure, DriverInfo, DriverResult,
    LightColor, MockMode, ParamSpec, Payload,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy)]
struct LightState {
    on: bool,
    brightness: u8,
    color: LightColor,
}

impl Default for LightState {
    fn default() -> Self {
        Self { on: true, brightness: 80, color: LightColor::TemperatureK { kelvin: 2700 } }
    }
}

pub struct BulbDriver {
    read_only: bool,
    declared: CapabilityFlags,
    mock: MockMode,
    ticker: MockTicker,
    recorder: MockRecorder,
    client: Option<VendorClient>,
    token: Option<String>,
    /// Last known light state, the merge base for partial `light_set` calls.
    state: Mutex<LightState>,
}

impl BulbDriver {
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
                .ok_or_else(|| BuildError::BadConfig("bulb requires params.host".to_owned()))?;
            let port = descriptor.param_f64("port").unwrap_or(80.0) as u16;
            let client = VendorClient::new(format!("http://{host}:{port}"), REQUEST_TIMEOUT);
            let token = resolve_credential(descriptor, secrets, "credential").await?;
            (Some(client), token)
        };

        Ok(Self {
            read_only: descriptor.read_only,
            declared: descriptor.capabilities,
            mock,
            ticker: MockTicker::new(),
            recorder: MockRecorder::new(),
            client,
            token,
            state: Mutex::new(LightState::default()),
        })
    }

    pub fn recorded_actions(&self) -> Vec<(String, serde_json::Value)> {
        self.recorder.recorded()
    }

    fn client(&self) -> DriverResult<&VendorClient> {
        self.client
            .as_ref()
            .ok_or_else(|| DriverFailure::protocol("bulb driver has no transport"))
    }

    fn mock_probe(&self) -> DriverResult<Payload> {
        if let Some(cause) = self.mock.fail {
            return Err(DriverFailure::new(cause, "mock-injected failure"));
        }
        self.ticker.next();
        let state = *self.state.lock();
        Ok(Payload::Bulb {
            reachable: true,
            on: state.on,
            brightness: state.brightness,
            color: state.color,
        })
    }

    async fn real_probe(&self) -> DriverResult<Payload> {
        let status = self.client()?.get_json("/api/light", self.token.as_deref()).await?;
        let state = parse_light_state(&status)?;
        *self.state.lock() = state;
        Ok(Payload::Bulb {
            reachable: status.get("reachable").and_then(|v| v.as_bool()).unwrap_or(true),
            on: state.on,
            brightness: state.brightness,
            color: state.color,
        })
    }

    /// Merge the caller's partial fields onto the last known state.
    async fn act_light_set(&self, params: &serde_json::Value) -> DriverResult<serde_json::Value> {
        let mut target = *self.state.lock();
        let mut clamped = false;

        if let Some(on) = params.get("on").and_then(|v| v.as_bool()) {
            target.on = on;
        }
        if let Some(raw) = params.get("brightness").and_then(|v| v.as_f64()) {
            let clamped_val = raw.clamp(0.0, 100.0);
            clamped |= (raw - clamped_val).abs() > f64::EPSILON;
            target.brightness = clamped_val.round() as u8;
        }
        if let Some(color) = params.get("color") {
            target.color = parse_color(color)?;
        }

        let body = serde_json::json!({
            "on": target.on,
            "brightness": target.brightness,
            "color": target.color,
        });
        if self.mock.enabled {
            self.recorder.record("light_set", &body);
        } else {
            self.client()?.post_json("/api/light", &body, self.token.as_deref()).await?;
        }
        *self.state.lock() = target;

        Ok(serde_json::json!({
            "on": target.on,
            "brightness": target.brightness,
            "color": target.color,
            "clamped": clamped,
        }))
    }

    async fn act_scene_recall(&self, params: &serde_json::Value) -> DriverResult<serde_json::Value> {
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DriverFailure::protocol("scene_recall requires name"))?;
        let body = serde_json::json!({"scene": name});
        if self.mock.enabled {
            self.recorder.record("scene_recall", &body);
        } else {
            self.client()?.post_json("/api/scene", &body, self.token.as_deref()).await?;
        }
        Ok(serde_json::json!({"scene": name}))
    }

    async fn act_group_set(&self, params: &serde_json::Value) -> DriverResult<serde_json::Value> {
        let group_id = params
            .get("group_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DriverFailure::protocol("group_set requires group_id"))?;
        let mut body = params.clone();
        if let Some(map) = body.as_object_mut() {
            map.remove("group_id");
        }
        let frame = serde_json::json!({"group": group_id, "state": body});
        if self.mock.enabled {
            self.recorder.record("group_set", &frame);
        } else {
            self.client()?.post_json("/api/group", &frame, self.token.as_deref()).await?;
        }
        Ok(serde_json::json!({"group_id": group_id}))
    }
}

#[async_trait::async_trait]
impl Driver for BulbDriver {
    async fn probe(&self, _cancel: &CancellationToken) -> DriverResult<Payload> {
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
        if self.read_only {
            return Err(DriverFailure::unavailable(
                "device is configured read-only; control actions are disabled",
            ));
        }
        if let Some(cause) = self.mock.fail {
            return Err(DriverFailure::new(cause, "mock-injected failure"));
        }
        match action {
            "light_set" => self.act_light_set(params).await,
            "scene_recall" => self.act_scene_recall(params).await,
            "group_set" => self.act_group_set(params).await,
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
            driver: "hue_bulb",
            capabilities: self.declared.narrow(&supported),
            actions: vec![
                ActionSpec {
                    name: "light_set",
                    params: vec![
                        ParamSpec::optional("on", "boolean"),
                        ParamSpec::optional("brightness", "number"),
                        ParamSpec::optional("color", "object"),
                    ],
                },
                ActionSpec {
                    name: "scene_recall",
                    params: vec![ParamSpec::required("name", "string")],
                },
                ActionSpec {
                    name: "group_set",
                    params: vec![ParamSpec::required("group_id", "string")],
                },
            ],
            gauges: vec![],
        }
    }

    async fn close(&self) {}
}

fn parse_light_state(status: &serde_json::Value) -> DriverResult<LightState> {
    let on = status
        .get("on")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| DriverFailure::protocol("light state missing on"))?;
    let brightness = status
        .get("brightness")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| DriverFailure::protocol("light state missing brightness"))?
        .min(100) as u8;
    let color = match status.get("color") {
        Some(color) => parse_color(color)?,
        None => LightColor::TemperatureK { kelvin: 2700 },
    };
    Ok(LightState { on, brightness, color })
}

fn parse_color(color: &serde_json::Value) -> DriverResult<LightColor> {
    if let Some(kelvin) = color.get("kelvin").and_then(|v| v.as_u64()) {
        return Ok(LightColor::TemperatureK { kelvin: kelvin.clamp(1500, 6500) as u32 });
    }
    let channel = |name: &str| -> DriverResult<u8> {
        color
            .get(name)
            .and_then(|v| v.as_u64())
            .map(|v| v.min(255) as u8)
            .ok_or_else(|| DriverFailure::protocol("color requires kelvin or r/g/b"))
    };
    Ok(LightColor::Rgb { r: channel("r")?, g: channel("g")?, b: channel("b")? })
}

#[cfg(test)]
#[path = "bulb_tests.rs"]
mod tests;
