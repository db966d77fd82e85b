// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fallback driver for devices that could not be constructed (unknown
//! driver tag, unresolved credential). The device stays visible in the
//! registry as permanently offline with a clear error instead of silently
//! vanishing.

use tokio_util::sync::CancellationToken;

use crate::device::CapabilityFlags;

use super::{Driver, DriverFailure, DriverInfo, DriverResult, Payload};

pub struct DisabledDriver {
    reason: String,
}

impl DisabledDriver {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait::async_trait]
impl Driver for DisabledDriver {
    async fn probe(&self, _cancel: &CancellationToken) -> DriverResult<Payload> {
        Err(DriverFailure::unavailable(format!("device disabled: {}", self.reason)))
    }

    async fn act(
        &self,
        _action: &str,
        _params: &serde_json::Value,
        _cancel: &CancellationToken,
    ) -> DriverResult<serde_json::Value> {
        Err(DriverFailure::unavailable(format!("device disabled: {}", self.reason)))
    }

    fn describe(&self) -> DriverInfo {
        DriverInfo {
            driver: "disabled",
            capabilities: CapabilityFlags::default(),
            actions: vec![],
            gauges: vec![],
        }
    }

    async fn close(&self) {}
}
