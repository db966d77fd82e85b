// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Smart-plug driver: on/off state plus the energy-monitoring quartet
//! (instantaneous watts, cumulative watt-hours, voltage, current).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::device::{CapabilityFlags, DeviceDescriptor};
use crate::secret::SecretStore;

use super::client::VendorClient;
use super::mock::{wave, MockRecorder, MockTicker};
use super::{
    resolve_credential, ActionSpec, BuildError, Driver, DriverFailure, DriverInfo, DriverResult,
    GaugeKind, MockMode, ParamSpec, Payload,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

pub struct PlugDriver {
    id: String,
    read_only: bool,
    declared: CapabilityFlags,
    mock: MockMode,
    ticker: MockTicker,
    recorder: MockRecorder,
    client: Option<VendorClient>,
    token: Option<String>,
    /// Cached relay state for mock mode.
    mock_on: AtomicBool,
}

impl PlugDriver {
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
                .ok_or_else(|| BuildError::BadConfig("plug requires params.host".to_owned()))?;
            let port = descriptor.param_f64("port").unwrap_or(80.0) as u16;
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
            mock_on: AtomicBool::new(true),
        })
    }

    pub fn recorded_actions(&self) -> Vec<(String, serde_json::Value)> {
        self.recorder.recorded()
    }

    fn client(&self) -> DriverResult<&VendorClient> {
        self.client
            .as_ref()
            .ok_or_else(|| DriverFailure::protocol("plug driver has no transport"))
    }

    fn mock_probe(&self) -> DriverResult<Payload> {
        if let Some(cause) = self.mock.fail {
            return Err(DriverFailure::new(cause, "mock-injected failure"));
        }
        let tick = self.ticker.next();
        let on = self.mock_on.load(Ordering::Relaxed);
        let power_w = if on { wave(&self.id, tick, 40.0, 180.0) } else { 0.0 };
        let voltage_v = wave(&self.id, tick, 228.0, 236.0);
        Ok(Payload::Plug {
            on,
            power_w,
            energy_wh: 1500.0 + tick as f64 * 1.2,
            voltage_v,
            current_a: if voltage_v > 0.0 { power_w / voltage_v } else { 0.0 },
        })
    }

    async fn real_probe(&self) -> DriverResult<Payload> {
        let status = self.client()?.get_json("/api/energy", self.token.as_deref()).await?;
        let field = |name: &str| -> DriverResult<f64> {
            status
                .get(name)
                .and_then(|v| v.as_f64())
                .ok_or_else(|| DriverFailure::protocol(format!("energy report missing {name}")))
        };
        Ok(Payload::Plug {
            on: status.get("on").and_then(|v| v.as_bool()).unwrap_or(false),
            power_w: field("power_w")?,
            energy_wh: field("energy_wh")?,
            voltage_v: field("voltage_v")?,
            current_a: field("current_a")?,
        })
    }
}

#[async_trait::async_trait]
impl Driver for PlugDriver {
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
        if action != "power_set" {
            return Err(DriverFailure::unavailable(format!("unsupported action: {action}")));
        }
        if self.read_only {
            return Err(DriverFailure::unavailable(
                "device is configured read-only; power_set is disabled",
            ));
        }
        if let Some(cause) = self.mock.fail {
            return Err(DriverFailure::new(cause, "mock-injected failure"));
        }
        let on = params
            .get("on")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| DriverFailure::protocol("power_set requires on: bool"))?;

        let body = serde_json::json!({"on": on});
        if self.mock.enabled {
            self.recorder.record("power_set", &body);
            self.mock_on.store(on, Ordering::Relaxed);
        } else {
            self.client()?.post_json("/api/power", &body, self.token.as_deref()).await?;
        }
        Ok(serde_json::json!({"on": on}))
    }

    fn describe(&self) -> DriverInfo {
        let supported = CapabilityFlags {
            controllable: !self.read_only,
            ptz: false,
            stream: false,
        };
        DriverInfo {
            driver: "tapo_plug",
            capabilities: self.declared.narrow(&supported),
            actions: if self.read_only {
                vec![]
            } else {
                vec![ActionSpec {
                    name: "power_set",
                    params: vec![ParamSpec::required("on", "boolean")],
                }]
            },
            gauges: vec![GaugeKind::PlugPowerWatts],
        }
    }

    async fn close(&self) {}
}

#[cfg(test)]
#[path = "plug_tests.rs"]
mod tests;
