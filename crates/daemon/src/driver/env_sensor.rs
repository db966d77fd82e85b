// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environmental sensor driver (weather-station family). Read-only: the
//! probe returns a module → measurement map; there are no actions.
//!
//! Cloud auth: the station API uses a refresh token resolved through the
//! secret sink. Access-token refresh happens inside the driver and shows
//! up to the scheduler only as `auth`-cause failures when it breaks.

use std::time::Duration;

use std::collections::BTreeMap;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::device::{CapabilityFlags, DeviceDescriptor};
use crate::secret::SecretStore;

use super::client::VendorClient;
use super::mock::{wave, MockTicker};
use super::{
    resolve_credential, BuildError, Driver, DriverFailure, DriverInfo, DriverResult, EnvMeasurement,
    FailureCause, GaugeKind, MockMode, Payload,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct EnvSensorDriver {
    id: String,
    mock: MockMode,
    mock_co2: Option<f64>,
    ticker: MockTicker,
    client: Option<VendorClient>,
    refresh_token: Option<String>,
    access_token: RwLock<Option<String>>,
}

impl EnvSensorDriver {
    pub async fn build(
        descriptor: &DeviceDescriptor,
        secrets: &SecretStore,
    ) -> Result<Self, BuildError> {
        let mock = MockMode::from_descriptor(descriptor)?;
        let (client, refresh_token) = if mock.enabled {
            (None, None)
        } else {
            let api_url = descriptor
                .param_str("api_url")
                .ok_or_else(|| {
                    BuildError::BadConfig("weather station requires params.api_url".to_owned())
                })?
                .trim_end_matches('/')
                .to_owned();
            let client = VendorClient::new(api_url, REQUEST_TIMEOUT);
            let refresh_token = resolve_credential(descriptor, secrets, "credential").await?;
            (Some(client), refresh_token)
        };

        Ok(Self {
            id: descriptor.id.clone(),
            mock_co2: descriptor.param_f64("mock_co2_ppm"),
            mock,
            ticker: MockTicker::new(),
            client,
            refresh_token,
            access_token: RwLock::new(None),
        })
    }

    fn client(&self) -> DriverResult<&VendorClient> {
        self.client
            .as_ref()
            .ok_or_else(|| DriverFailure::protocol("sensor driver has no transport"))
    }

    /// Exchange the refresh token for a fresh access token.
    async fn refresh_access(&self) -> DriverResult<String> {
        let refresh = self
            .refresh_token
            .as_deref()
            .ok_or_else(|| DriverFailure::auth("no refresh token configured"))?;
        let body = serde_json::json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh,
        });
        let resp = self.client()?.post_json("/oauth2/token", &body, None).await?;
        let token = resp
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DriverFailure::auth("token endpoint returned no access_token"))?
            .to_owned();
        *self.access_token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn access_token(&self) -> DriverResult<String> {
        if let Some(token) = self.access_token.read().await.clone() {
            return Ok(token);
        }
        self.refresh_access().await
    }

    fn mock_probe(&self) -> DriverResult<Payload> {
        if let Some(cause) = self.mock.fail {
            return Err(DriverFailure::new(cause, "mock-injected failure"));
        }
        let tick = self.ticker.next();
        let mut modules = BTreeMap::new();
        modules.insert(
            "indoor".to_owned(),
            EnvMeasurement {
                temperature_c: Some(wave(&self.id, tick, 19.0, 23.5)),
                humidity_percent: Some(wave(&self.id, tick.wrapping_add(5), 38.0, 55.0)),
                co2_ppm: Some(self.mock_co2.unwrap_or_else(|| wave(&self.id, tick, 420.0, 780.0))),
                pressure_hpa: Some(wave(&self.id, tick, 1005.0, 1023.0)),
                noise_db: Some(wave(&self.id, tick, 32.0, 48.0)),
            },
        );
        modules.insert(
            "outdoor".to_owned(),
            EnvMeasurement {
                temperature_c: Some(wave(&self.id, tick.wrapping_add(11), 4.0, 18.0)),
                humidity_percent: Some(wave(&self.id, tick.wrapping_add(17), 50.0, 85.0)),
                ..EnvMeasurement::default()
            },
        );
        Ok(Payload::EnvSensor { modules })
    }

    async fn real_probe(&self) -> DriverResult<Payload> {
        let token = self.access_token().await?;
        let resp = match self.client()?.get_json("/api/stationdata", Some(&token)).await {
            Err(failure) if failure.cause == FailureCause::Auth => {
                // Stale access token: refresh once, then retry.
                let token = self.refresh_access().await?;
                self.client()?.get_json("/api/stationdata", Some(&token)).await?
            }
            other => other?,
        };

        let raw_modules = resp
            .get("modules")
            .and_then(|v| v.as_object())
            .ok_or_else(|| DriverFailure::protocol("station data missing modules"))?;

        let mut modules = BTreeMap::new();
        for (name, readings) in raw_modules {
            let measurement: EnvMeasurement = serde_json::from_value(readings.clone())
                .map_err(|e| DriverFailure::protocol(format!("module {name}: {e}")))?;
            modules.insert(name.clone(), measurement);
        }
        Ok(Payload::EnvSensor { modules })
    }
}

#[async_trait::async_trait]
impl Driver for EnvSensorDriver {
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
        Err(DriverFailure::unavailable(format!(
            "weather station is read-only; no action {action}"
        )))
    }

    fn describe(&self) -> DriverInfo {
        DriverInfo {
            driver: "netatmo_station",
            capabilities: CapabilityFlags::default(),
            actions: vec![],
            gauges: vec![
                GaugeKind::SensorTemperatureCelsius,
                GaugeKind::SensorCo2Ppm,
                GaugeKind::SensorHumidityPercent,
            ],
        }
    }

    async fn close(&self) {
        *self.access_token.write().await = None;
    }
}

#[cfg(test)]
#[path = "env_sensor_tests.rs"]
mod tests;
