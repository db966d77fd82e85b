// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the supervision daemon.

pub mod auth;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Build the axum `Router` with all daemon routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Observability (no auth)
        .route("/healthz", get(http::healthz))
        .route("/metrics", get(http::metrics))
        // Dashboard API
        .route("/api/devices", get(http::list_devices))
        .route("/api/devices/{id}", get(http::get_device))
        .route("/api/events", get(http::query_events))
        .route("/api/events/{seq}/acknowledge", post(http::acknowledge_event))
        // Tool-call surface
        .route("/api/tools", get(http::list_tools))
        .route("/api/tools/{name}", post(http::call_tool))
        // Live event stream
        .route("/ws/events", get(ws::ws_events_handler))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
