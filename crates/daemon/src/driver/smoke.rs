// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Smoke/CO detector driver. Probe reports battery, liveness, the last
//! self-test, and the current alert state; the only action is `self_test`.

use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::device::{epoch_ms, CapabilityFlags, DeviceDescriptor};
use crate::secret::SecretStore;

use super::client::VendorClient;
use super::mock::{draining_percent, MockRecorder, MockTicker};
use super::{
    resolve_credential, ActionSpec, BuildError, Driver, DriverFailure, DriverInfo, DriverResult,
    MockMode, Payload, SmokeAlert,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SmokeDriver {
    id: String,
    mock: MockMode,
    mock_alert: Mutex<SmokeAlert>,
    ticker: MockTicker,
    recorder: MockRecorder,
    client: Option<VendorClient>,
    token: Option<String>,
    last_self_test_ms: Mutex<Option<u64>>,
}

impl SmokeDriver {
    pub async fn build(
        descriptor: &DeviceDescriptor,
        secrets: &SecretStore,
    ) -> Result<Self, BuildError> {
        let mock = MockMode::from_descriptor(descriptor)?;
        let mock_alert = match descriptor.param_str("mock_alert") {
            None => SmokeAlert::Clear,
            Some(raw) => serde_json::from_value(serde_json::Value::String(raw.to_owned()))
                .map_err(|_| BuildError::BadConfig(format!("unknown mock_alert: {raw}")))?,
        };
        let (client, token) = if mock.enabled {
            (None, None)
        } else {
            let api_url = descriptor
                .param_str("api_url")
                .ok_or_else(|| {
                    BuildError::BadConfig("smoke detector requires params.api_url".to_owned())
                })?
                .trim_end_matches('/')
                .to_owned();
            let client = VendorClient::new(api_url, REQUEST_TIMEOUT);
            let token = resolve_credential(descriptor, secrets, "credential").await?;
            (Some(client), token)
        };

        Ok(Self {
            id: descriptor.id.clone(),
            mock,
            mock_alert: Mutex::new(mock_alert),
            ticker: MockTicker::new(),
            recorder: MockRecorder::new(),
            client,
            token,
            last_self_test_ms: Mutex::new(None),
        })
    }

    pub fn recorded_actions(&self) -> Vec<(String, serde_json::Value)> {
        self.recorder.recorded()
    }

    /// Test hook: drive the mock alert state through a scenario.
    pub fn set_mock_alert(&self, alert: SmokeAlert) {
        *self.mock_alert.lock() = alert;
    }

    fn client(&self) -> DriverResult<&VendorClient> {
        self.client
            .as_ref()
            .ok_or_else(|| DriverFailure::protocol("smoke driver has no transport"))
    }

    fn mock_probe(&self) -> DriverResult<Payload> {
        if let Some(cause) = self.mock.fail {
            return Err(DriverFailure::new(cause, "mock-injected failure"));
        }
        let tick = self.ticker.next();
        Ok(Payload::Smoke {
            battery_percent: draining_percent(&self.id, tick),
            online: true,
            last_self_test_ms: *self.last_self_test_ms.lock(),
            alert: *self.mock_alert.lock(),
        })
    }

    async fn real_probe(&self) -> DriverResult<Payload> {
        let status = self.client()?.get_json("/api/detector", self.token.as_deref()).await?;
        let alert = match status.get("alert_state").and_then(|v| v.as_str()) {
            Some(raw) => serde_json::from_value(serde_json::Value::String(raw.to_owned()))
                .map_err(|_| DriverFailure::protocol(format!("unknown alert_state: {raw}")))?,
            None => return Err(DriverFailure::protocol("detector report missing alert_state")),
        };
        Ok(Payload::Smoke {
            battery_percent: status
                .get("battery_percent")
                .and_then(|v| v.as_u64())
                .unwrap_or(0)
                .min(100) as u8,
            online: status.get("online").and_then(|v| v.as_bool()).unwrap_or(true),
            last_self_test_ms: status.get("last_self_test_ms").and_then(|v| v.as_u64()),
            alert,
        })
    }
}

#[async_trait::async_trait]
impl Driver for SmokeDriver {
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
        _params: &serde_json::Value,
        _cancel: &CancellationToken,
    ) -> DriverResult<serde_json::Value> {
        if action != "self_test" {
            return Err(DriverFailure::unavailable(format!("unsupported action: {action}")));
        }
        if let Some(cause) = self.mock.fail {
            return Err(DriverFailure::new(cause, "mock-injected failure"));
        }
        if self.mock.enabled {
            self.recorder.record("self_test", &serde_json::Value::Null);
        } else {
            self.client()?
                .post_json("/api/detector/self_test", &serde_json::json!({}), self.token.as_deref())
                .await?;
        }
        let now = epoch_ms();
        *self.last_self_test_ms.lock() = Some(now);
        Ok(serde_json::json!({"started_ms": now}))
    }

    fn describe(&self) -> DriverInfo {
        DriverInfo {
            driver: "nest_protect",
            capabilities: CapabilityFlags { controllable: true, ptz: false, stream: false },
            actions: vec![ActionSpec { name: "self_test", params: vec![] }],
            gauges: vec![],
        }
    }

    async fn close(&self) {}
}

#[cfg(test)]
#[path = "smoke_tests.rs"]
mod tests;
