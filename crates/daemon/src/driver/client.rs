// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for talking to one LAN or cloud device endpoint.
//!
//! Maps transport-level and status-level failures onto the shared driver
//! taxonomy so individual drivers only deal in `DriverFailure`.

use std::time::Duration;

use reqwest::{Client, StatusCode};

use super::{DriverFailure, DriverResult};

/// HTTP client wrapper for one device endpoint.
pub struct VendorClient {
    base_url: String,
    client: Client,
}

impl VendorClient {
    /// Build a client for `http(s)://host:port` with a per-request timeout.
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET a JSON document, with an optional bearer token.
    pub async fn get_json(
        &self,
        path: &str,
        token: Option<&str>,
    ) -> DriverResult<serde_json::Value> {
        let mut req = self.client.get(self.url(path));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(classify_request_error)?;
        decode_json(resp).await
    }

    /// POST a JSON body, with an optional bearer token.
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
        token: Option<&str>,
    ) -> DriverResult<serde_json::Value> {
        let mut req = self.client.post(self.url(path)).json(body);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(classify_request_error)?;
        decode_json(resp).await
    }

    /// GET a raw byte body (camera snapshots) plus its media type.
    pub async fn get_bytes(
        &self,
        path: &str,
        token: Option<&str>,
    ) -> DriverResult<(Vec<u8>, String)> {
        let mut req = self.client.get(self.url(path));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(classify_request_error)?;
        let status = resp.status();
        if let Err(failure) = classify_status(status) {
            return Err(failure);
        }
        let media_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_owned();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| DriverFailure::transport(format!("body read failed: {e}")))?;
        Ok((bytes.to_vec(), media_type))
    }
}

async fn decode_json(resp: reqwest::Response) -> DriverResult<serde_json::Value> {
    let status = resp.status();
    classify_status(status)?;
    resp.json::<serde_json::Value>()
        .await
        .map_err(|e| DriverFailure::protocol(format!("unparseable response: {e}")))
}

/// Map an HTTP status onto the failure taxonomy. 2xx passes.
pub fn classify_status(status: StatusCode) -> DriverResult<()> {
    if status.is_success() {
        return Ok(());
    }
    let failure = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            DriverFailure::auth(format!("device rejected credentials ({status})"))
        }
        StatusCode::CONFLICT
        | StatusCode::LOCKED
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::SERVICE_UNAVAILABLE => {
            DriverFailure::unavailable(format!("device refused operation ({status})"))
        }
        _ => DriverFailure::protocol(format!("unexpected status {status}")),
    };
    Err(failure)
}

/// Map a reqwest error onto the failure taxonomy.
pub fn classify_request_error(e: reqwest::Error) -> DriverFailure {
    if e.is_timeout() {
        DriverFailure::timeout("request deadline exceeded")
    } else if e.is_connect() {
        DriverFailure::transport(format!("connect failed: {e}"))
    } else if e.is_decode() {
        DriverFailure::protocol(format!("decode failed: {e}"))
    } else {
        DriverFailure::transport(format!("request failed: {e}"))
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
