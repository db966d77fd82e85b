// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hearth: home-surveillance and smart-home supervision daemon.
//!
//! The composition root lives here: `run` wires the config loader, secret
//! sink, registry, event store, metrics, per-device schedulers, and the
//! HTTP/WebSocket transport, then serves until shutdown. There are no
//! hidden globals — every component is constructed once and passed down.

pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod events;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod redact;
pub mod registry;
pub mod scheduler;
pub mod secret;
pub mod state;
pub mod tools;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::{DaemonConfig, FileConfig};
use crate::device::HealthPhase;
use crate::events::{EventStore, NewEvent};
use crate::metrics::Metrics;
use crate::redact::Redactor;
use crate::registry::{Registry, RegistryError};
use crate::secret::SecretStore;
use crate::state::AppState;
use crate::transport::build_router;

/// Why the daemon exited abnormally. The variant decides the exit code:
/// 1 invalid config, 2 bind failure, 3 internal error.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("invalid secrets configuration: {0}")]
    Secrets(#[from] secret::SecretError),
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Secrets(_) => 1,
            Self::Bind { .. } => 2,
            Self::Internal(_) => 3,
        }
    }
}

/// Build the full application state from configuration. Shared by `run`
/// and the end-to-end test rigs.
pub async fn build_state(
    daemon: DaemonConfig,
    file: FileConfig,
    shutdown: CancellationToken,
) -> Result<Arc<AppState>, RunError> {
    let warnings = file.startup_warnings();

    let secrets = Arc::new(SecretStore::from_specs(&file.secrets.backends)?);
    let redactor = Redactor::new(&file.logging.redaction_terms);
    let metrics = Arc::new(
        Metrics::new().map_err(|e| RunError::Internal(anyhow::anyhow!("metrics: {e}")))?,
    );
    let events = EventStore::new(
        file.event_store.capacity,
        file.event_store.subscription_buffer,
        redactor,
        Some(Arc::clone(&metrics)),
    );
    let registry = Registry::new(secrets, Some(Arc::clone(&metrics)), shutdown.clone());

    let state = Arc::new(AppState::new(daemon, file, registry, events, metrics, shutdown));

    for warning in warnings {
        state.events.append(NewEvent::warning("config", "system", warning));
    }

    // Register every configured device. A driver that cannot be built is
    // downgraded to `disabled` and shown as permanently offline instead of
    // silently vanishing.
    for descriptor in state.file.devices.clone() {
        let interval = state.file.effective_interval(&descriptor);
        match state.registry.register(descriptor.clone(), interval).await {
            Ok(entry) => {
                let handle =
                    scheduler::spawn_device_scheduler(Arc::clone(&state), entry);
                state.scheduler_tasks.lock().push(handle);
            }
            Err(RegistryError::Build(reason)) => {
                let id = descriptor.id.clone();
                state.events.append(
                    NewEvent::alarm(
                        "device_config",
                        id.clone(),
                        format!("device disabled: {reason}"),
                    )
                    .with_detail(serde_json::json!({"driver": descriptor.driver})),
                );
                let entry = state
                    .registry
                    .register_disabled(descriptor, interval, &reason.to_string())
                    .await
                    .map_err(|e| RunError::Internal(anyhow::anyhow!(e)))?;
                // No scheduler: the device sits offline with a clear error.
                let mut runtime = entry.runtime.write().await;
                runtime.phase = HealthPhase::Offline;
                runtime.last_error = Some(reason.to_string());
                state.metrics.set_device_up(
                    &entry.descriptor.id,
                    entry.descriptor.category.as_str(),
                    &entry.descriptor.driver,
                    false,
                );
            }
            Err(e) => return Err(RunError::Internal(anyhow::anyhow!(e))),
        }
    }

    Ok(state)
}

/// Run the daemon until shutdown.
pub async fn run(daemon: DaemonConfig) -> Result<(), RunError> {
    let file = FileConfig::load(&daemon.config_path)?;
    let shutdown = CancellationToken::new();
    let state = build_state(daemon, file, shutdown.clone()).await?;

    let addr = state.daemon.http_listen.clone();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| RunError::Bind { addr: addr.clone(), source })?;

    // Shutdown begins by refusing new tool calls; schedulers and
    // subscriptions observe the same token.
    tokio::spawn({
        let state = Arc::clone(&state);
        async move {
            state.shutdown.cancelled().await;
            state.stop_accepting_tools();
        }
    });
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        }
    });

    tracing::info!(devices = state.registry.len().await, "hearthd listening on {addr}");
    state.events.append(NewEvent::info("system", "system", "daemon started"));

    let router = build_router(Arc::clone(&state));
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .map_err(|e| RunError::Internal(anyhow::anyhow!("serve: {e}")))?;

    // Orderly teardown: schedulers first, then drivers, then the log flush
    // implicit in process exit. WS subscribers drain on the same token.
    shutdown.cancel();
    scheduler::join_all(&state).await;
    state.registry.close_all().await;
    tracing::info!("shutdown complete");

    if state.fatal() {
        return Err(RunError::Internal(anyhow::anyhow!("internal invariant violation")));
    }
    Ok(())
}
