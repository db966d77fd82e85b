// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for workspace-level end-to-end scenarios: boots a full
//! daemon (state + HTTP/WS transport) on an ephemeral port against
//! mock-mode drivers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use hearth::config::{DaemonConfig, FileConfig};
use hearth::state::AppState;
use hearth::transport::build_router;

/// A daemon instance running on an ephemeral local port.
pub struct TestDaemon {
    pub state: Arc<AppState>,
    pub base_url: String,
    pub ws_url: String,
    pub shutdown: CancellationToken,
    server: Option<tokio::task::JoinHandle<()>>,
}

impl TestDaemon {
    /// Boot a daemon for the given declarative config document (JSON value).
    pub async fn start(file: serde_json::Value) -> anyhow::Result<Self> {
        let file: FileConfig = serde_json::from_value(file)?;
        let daemon = DaemonConfig {
            config_path: "/dev/null".into(),
            http_listen: "127.0.0.1:0".into(),
            log_level: "info".into(),
            auth_token: None,
        };
        let shutdown = CancellationToken::new();
        let state = hearth::build_state(daemon, file, shutdown.clone())
            .await
            .map_err(|e| anyhow::anyhow!("build_state: {e}"))?;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = build_router(Arc::clone(&state));
        let server_shutdown = shutdown.clone();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await;
        });

        Ok(Self {
            state,
            base_url: format!("http://{addr}"),
            ws_url: format!("ws://{addr}/ws/events"),
            shutdown,
            server: Some(server),
        })
    }

    /// Graceful stop, mirroring the production shutdown order.
    pub async fn stop(mut self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        self.state.stop_accepting_tools();
        if let Some(server) = self.server.take() {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(6), server).await;
        }
        self.state.registry.close_all().await;
        Ok(())
    }
}

/// Device entry helper for config documents.
pub fn mock_device(id: &str, driver: &str, category: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "driver": driver,
        "category": category,
        "label": id,
        "capabilities": {"controllable": true, "ptz": true, "stream": true},
        "interval_seconds": 5,
        "params": {"mock": true},
    })
}
