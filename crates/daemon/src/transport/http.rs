// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST handlers for the dashboard and observability surfaces.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::events::{AckError, Severity};
use crate::state::AppState;
use crate::tools::{self, ToolCall};

// -- Request/Response types ----------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub devices: usize,
    pub event_store_size: usize,
    pub uptime_s: u64,
}

#[derive(Debug, Serialize)]
pub struct DeviceView {
    pub descriptor: crate::device::DeviceDescriptor,
    pub state: crate::device::DeviceSnapshot,
}

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    /// Return events with seq greater than this.
    #[serde(default)]
    pub since: Option<u64>,
    /// Severity floor: info, warning, alarm.
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

// -- Handlers ------------------------------------------------------------------

/// `GET /healthz` — 200 iff the scheduler fabric is running and the event
/// store accepts writes.
pub async fn healthz(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    if s.shutdown.is_cancelled() || s.fatal() {
        return ApiError::Unavailable.to_http_response("shutting down").into_response();
    }
    Json(HealthResponse {
        status: "running".to_owned(),
        devices: s.registry.len().await,
        event_store_size: s.events.len(),
        uptime_s: s.uptime_secs(),
    })
    .into_response()
}

/// `GET /metrics` — Prometheus text exposition.
pub async fn metrics(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        s.metrics.render(),
    )
}

/// `GET /api/devices` — descriptors plus runtime snapshots.
pub async fn list_devices(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let list: Vec<DeviceView> = s
        .registry
        .list()
        .await
        .into_iter()
        .map(|(descriptor, state)| DeviceView { descriptor, state })
        .collect();
    Json(list)
}

/// `GET /api/devices/{id}` — one device.
pub async fn get_device(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.registry.lookup(&id).await {
        Ok(entry) => {
            let snapshot = entry.snapshot().await;
            Json(DeviceView { descriptor: entry.descriptor.clone(), state: snapshot })
                .into_response()
        }
        Err(_) => ApiError::NotFound
            .to_http_response(format!("no such device: {id}"))
            .into_response(),
    }
}

/// `GET /api/events?since=&severity=&category=&limit=` — event query.
pub async fn query_events(
    State(s): State<Arc<AppState>>,
    Query(query): Query<EventQuery>,
) -> impl IntoResponse {
    let severity = match query.severity.as_deref() {
        None => None,
        Some(raw) => {
            match serde_json::from_value::<Severity>(serde_json::Value::String(raw.to_owned())) {
                Ok(severity) => Some(severity),
                Err(_) => {
                    return ApiError::BadRequest
                        .to_http_response(format!("unknown severity: {raw}"))
                        .into_response()
                }
            }
        }
    };
    let events =
        s.events.query(query.since, severity, query.category.as_deref(), query.limit);
    Json(events).into_response()
}

/// `POST /api/events/{seq}/acknowledge` — 200, 404 unknown, 409 already.
pub async fn acknowledge_event(
    State(s): State<Arc<AppState>>,
    Path(seq): Path<u64>,
) -> impl IntoResponse {
    match s.events.acknowledge(seq) {
        Ok(()) => Json(serde_json::json!({"seq": seq, "acknowledged": true})).into_response(),
        Err(AckError::NotFound) => ApiError::NotFound
            .to_http_response(format!("no event with seq {seq}"))
            .into_response(),
        Err(AckError::AlreadyAcknowledged) => ApiError::Conflict
            .to_http_response(format!("event {seq} already acknowledged"))
            .into_response(),
    }
}

/// `GET /api/tools` — advertised tool inventory with parameter schemas.
pub async fn list_tools(State(_s): State<Arc<AppState>>) -> impl IntoResponse {
    let call = ToolCall { action: "describe".to_owned(), params: serde_json::Value::Null };
    Json(crate::tools::system::handle_describe(&call))
}

/// `POST /api/tools/{name}` — one tool invocation. Tool-level failures are
/// in-band (`success: false`); HTTP errors are reserved for transport
/// problems.
pub async fn call_tool(
    State(s): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(call): Json<ToolCall>,
) -> impl IntoResponse {
    Json(tools::dispatch(&s, &name, call).await)
}
