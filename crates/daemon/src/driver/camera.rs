// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Camera driver family: Tapo-style LAN cameras, generic ONVIF, Ring,
//! USB webcams, and the pet-camera variant share one adapter with
//! per-vendor capability narrowing.
//!
//! Session auth: the driver logs in lazily, caches the session token, and
//! on an `auth` failure re-authenticates at most once per probe. A second
//! consecutive auth failure in the same cycle propagates to the scheduler.

use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::device::{epoch_ms, CapabilityFlags, DeviceDescriptor};
use crate::secret::SecretStore;

use super::client::VendorClient;
use super::mock::{MockRecorder, MockTicker};
use super::{
    resolve_credential, ActionSpec, BuildError, Driver, DriverFailure, DriverInfo, DriverResult,
    MockMode, ParamSpec, Payload,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);
const MAX_PTZ_DURATION_S: f64 = 10.0;
const MAX_PRESET_SLOT: u64 = 7;

/// PTZ directions accepted by `ptz_move`.
const PTZ_DIRECTIONS: &[&str] = &["up", "down", "left", "right", "home"];

pub struct CameraDriver {
    id: String,
    vendor: &'static str,
    read_only: bool,
    declared: CapabilityFlags,
    mock: MockMode,
    ticker: MockTicker,
    recorder: MockRecorder,
    client: Option<VendorClient>,
    username: Option<String>,
    password: Option<String>,
    session: RwLock<Option<String>>,
    /// Mock-mode privacy shutter state.
    privacy: std::sync::atomic::AtomicBool,
}

impl CameraDriver {
    pub async fn build(
        descriptor: &DeviceDescriptor,
        secrets: &SecretStore,
    ) -> Result<Self, BuildError> {
        let mock = MockMode::from_descriptor(descriptor)?;
        let vendor = vendor_tag(&descriptor.driver)?;

        let (client, username, password) = if mock.enabled {
            (None, None, None)
        } else {
            let host = descriptor
                .param_str("host")
                .ok_or_else(|| BuildError::BadConfig("camera requires params.host".to_owned()))?;
            let port = descriptor.param_f64("port").unwrap_or(443.0) as u16;
            let scheme = if descriptor.param_bool("tls") { "https" } else { "http" };
            let client = VendorClient::new(format!("{scheme}://{host}:{port}"), REQUEST_TIMEOUT);
            let username = descriptor.param_str("username").map(str::to_owned);
            let password = resolve_credential(descriptor, secrets, "credential").await?;
            (Some(client), username, password)
        };

        Ok(Self {
            id: descriptor.id.clone(),
            vendor,
            read_only: descriptor.read_only,
            declared: descriptor.capabilities,
            mock,
            ticker: MockTicker::new(),
            recorder: MockRecorder::new(),
            client,
            username,
            password,
            session: RwLock::new(None),
            privacy: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Expose recorded mock actions to tests and demo tooling.
    pub fn recorded_actions(&self) -> Vec<(String, serde_json::Value)> {
        self.recorder.recorded()
    }

    fn client(&self) -> DriverResult<&VendorClient> {
        self.client
            .as_ref()
            .ok_or_else(|| DriverFailure::protocol("camera driver has no transport"))
    }

    /// Log in and cache the session token.
    async fn login(&self) -> DriverResult<String> {
        let client = self.client()?;
        let body = serde_json::json!({
            "username": self.username.as_deref().unwrap_or("admin"),
            "password": self.password.as_deref().unwrap_or_default(),
        });
        let resp = client.post_json("/auth/login", &body, None).await?;
        let token = resp
            .get("token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DriverFailure::protocol("login response missing token"))?
            .to_owned();
        *self.session.write().await = Some(token.clone());
        Ok(token)
    }

    async fn session_token(&self) -> DriverResult<String> {
        if let Some(token) = self.session.read().await.clone() {
            return Ok(token);
        }
        self.login().await
    }

    /// GET with the cached session; one automatic re-auth on `auth` failure.
    async fn get_with_reauth(&self, path: &str) -> DriverResult<serde_json::Value> {
        let token = self.session_token().await?;
        match self.client()?.get_json(path, Some(&token)).await {
            Err(failure) if failure.cause == super::FailureCause::Auth => {
                let token = self.login().await?;
                self.client()?.get_json(path, Some(&token)).await
            }
            other => other,
        }
    }

    async fn post_with_reauth(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> DriverResult<serde_json::Value> {
        let token = self.session_token().await?;
        match self.client()?.post_json(path, body, Some(&token)).await {
            Err(failure) if failure.cause == super::FailureCause::Auth => {
                let token = self.login().await?;
                self.client()?.post_json(path, body, Some(&token)).await
            }
            other => other,
        }
    }

    fn mock_probe(&self) -> DriverResult<Payload> {
        if let Some(cause) = self.mock.fail {
            return Err(DriverFailure::new(cause, "mock-injected failure"));
        }
        let tick = self.ticker.next();
        let shuttered = self.privacy.load(std::sync::atomic::Ordering::Relaxed);
        Ok(Payload::Camera {
            online: true,
            firmware: Some(format!("{}-fw-1.3.{}", self.vendor, tick % 4)),
            // Privacy shutter closed: no frames are produced.
            last_frame_ms: if shuttered {
                None
            } else {
                Some(epoch_ms().saturating_sub(200 + (tick % 50) * 10))
            },
        })
    }

    async fn real_probe(&self) -> DriverResult<Payload> {
        let status = self.get_with_reauth("/api/status").await?;
        Ok(Payload::Camera {
            online: status.get("online").and_then(|v| v.as_bool()).unwrap_or(true),
            firmware: status.get("firmware").and_then(|v| v.as_str()).map(str::to_owned),
            last_frame_ms: status.get("last_frame_ms").and_then(|v| v.as_u64()),
        })
    }

    async fn act_ptz_move(&self, params: &serde_json::Value) -> DriverResult<serde_json::Value> {
        let direction = params
            .get("direction")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DriverFailure::protocol("ptz_move requires direction"))?;
        if !PTZ_DIRECTIONS.contains(&direction) {
            return Err(DriverFailure::protocol(format!(
                "unknown ptz direction: {direction}"
            )));
        }
        let raw_speed = params.get("speed").and_then(|v| v.as_f64()).unwrap_or(0.5);
        let raw_duration = params.get("duration").and_then(|v| v.as_f64()).unwrap_or(1.0);
        let speed = raw_speed.clamp(0.0, 1.0);
        let duration = raw_duration.clamp(0.0, MAX_PTZ_DURATION_S);
        let clamped = (raw_speed - speed).abs() > f64::EPSILON
            || (raw_duration - duration).abs() > f64::EPSILON;

        let body = serde_json::json!({
            "direction": direction,
            "speed": speed,
            "duration_s": duration,
        });
        if self.mock.enabled {
            self.recorder.record("ptz_move", &body);
        } else {
            self.post_with_reauth("/api/ptz/move", &body).await?;
        }
        Ok(serde_json::json!({
            "direction": direction,
            "speed": speed,
            "duration": duration,
            "clamped": clamped,
        }))
    }

    async fn act_preset_recall(
        &self,
        params: &serde_json::Value,
    ) -> DriverResult<serde_json::Value> {
        let slot = params
            .get("slot")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| DriverFailure::protocol("ptz_preset_recall requires slot"))?;
        if slot > MAX_PRESET_SLOT {
            return Err(DriverFailure::protocol(format!(
                "preset slot {slot} out of range 0..={MAX_PRESET_SLOT}"
            )));
        }
        let body = serde_json::json!({"slot": slot});
        if self.mock.enabled {
            self.recorder.record("ptz_preset_recall", &body);
        } else {
            self.post_with_reauth("/api/ptz/preset_recall", &body).await?;
        }
        Ok(serde_json::json!({"slot": slot}))
    }

    async fn act_snapshot(&self) -> DriverResult<serde_json::Value> {
        if self.mock.enabled {
            self.recorder.record("snapshot", &serde_json::Value::Null);
            // 1x1 JPEG placeholder, deterministic.
            let bytes = vec![0xFF, 0xD8, 0xFF, 0xD9];
            return Ok(snapshot_response(&bytes, "image/jpeg"));
        }
        let token = self.session_token().await?;
        let (bytes, media_type) = self.client()?.get_bytes("/api/snapshot", Some(&token)).await?;
        Ok(snapshot_response(&bytes, &media_type))
    }

    async fn act_stream_url(&self) -> DriverResult<serde_json::Value> {
        let url = if self.mock.enabled {
            format!("rtsp://{}.local:554/stream1", self.id)
        } else {
            let resp = self.get_with_reauth("/api/stream_url").await?;
            resp.get("url")
                .and_then(|v| v.as_str())
                .ok_or_else(|| DriverFailure::protocol("stream_url response missing url"))?
                .to_owned()
        };
        Ok(serde_json::json!({"url": strip_userinfo(&url)}))
    }

    async fn act_privacy(&self, params: &serde_json::Value) -> DriverResult<serde_json::Value> {
        let on = params
            .get("on")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| DriverFailure::protocol("privacy_set requires on: bool"))?;
        let body = serde_json::json!({"on": on});
        if self.mock.enabled {
            self.recorder.record("privacy_set", &body);
            self.privacy.store(on, std::sync::atomic::Ordering::Relaxed);
        } else {
            self.post_with_reauth("/api/privacy", &body).await?;
        }
        Ok(serde_json::json!({"on": on}))
    }
}

#[async_trait::async_trait]
impl Driver for CameraDriver {
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
        let caps = self.describe().capabilities;
        match action {
            "ptz_move" if caps.ptz => self.act_ptz_move(params).await,
            "ptz_preset_recall" if caps.ptz => self.act_preset_recall(params).await,
            "snapshot" => self.act_snapshot().await,
            "stream_url_get" if caps.stream => self.act_stream_url().await,
            "privacy_set" => self.act_privacy(params).await,
            "ptz_move" | "ptz_preset_recall" | "stream_url_get" => Err(
                DriverFailure::unavailable(format!("{} does not support {action}", self.vendor)),
            ),
            other => Err(DriverFailure::unavailable(format!("unsupported action: {other}"))),
        }
    }

    fn describe(&self) -> DriverInfo {
        let supported = match self.vendor {
            // Fixed-mount and battery cameras cannot pan.
            "usb_webcam" => CapabilityFlags { controllable: true, ptz: false, stream: true },
            "ring_camera" => CapabilityFlags { controllable: true, ptz: false, stream: true },
            _ => CapabilityFlags { controllable: true, ptz: true, stream: true },
        };
        let capabilities = self.declared.narrow(&supported);

        let mut actions = vec![
            ActionSpec { name: "snapshot", params: vec![] },
            ActionSpec {
                name: "privacy_set",
                params: vec![ParamSpec::required("on", "boolean")],
            },
        ];
        if capabilities.ptz {
            actions.push(ActionSpec {
                name: "ptz_move",
                params: vec![
                    ParamSpec::required("direction", "string"),
                    ParamSpec::optional("speed", "number"),
                    ParamSpec::optional("duration", "number"),
                ],
            });
            actions.push(ActionSpec {
                name: "ptz_preset_recall",
                params: vec![ParamSpec::required("slot", "integer")],
            });
        }
        if capabilities.stream {
            actions.push(ActionSpec { name: "stream_url_get", params: vec![] });
        }

        DriverInfo { driver: self.vendor, capabilities, actions, gauges: vec![] }
    }

    async fn close(&self) {
        *self.session.write().await = None;
    }
}

fn vendor_tag(driver: &str) -> Result<&'static str, BuildError> {
    match driver {
        "tapo_camera" => Ok("tapo_camera"),
        "onvif_camera" => Ok("onvif_camera"),
        "ring_camera" => Ok("ring_camera"),
        "usb_webcam" => Ok("usb_webcam"),
        "pet_camera" => Ok("pet_camera"),
        other => Err(BuildError::UnknownDriver(other.to_owned())),
    }
}

fn snapshot_response(bytes: &[u8], media_type: &str) -> serde_json::Value {
    use base64::Engine;
    serde_json::json!({
        "media_type": media_type,
        "bytes_b64": base64::engine::general_purpose::STANDARD.encode(bytes),
    })
}

/// Strip `user:pass@` userinfo from a stream URL before it leaves the driver.
fn strip_userinfo(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => match rest.split_once('@') {
            Some((userinfo, host)) if !userinfo.contains('/') => {
                format!("{scheme}://{host}")
            }
            _ => url.to_owned(),
        },
        None => url.to_owned(),
    }
}

#[cfg(test)]
#[path = "camera_tests.rs"]
mod tests;
