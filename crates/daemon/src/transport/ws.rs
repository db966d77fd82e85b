// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket notifier — long-lived event stream for dashboard clients.
//!
//! On connect the client's first frame is a JSON filter
//! `{severity_floor, categories}`; the handler then opens an event-store
//! subscription and forwards each delivered event as one JSON frame.
//! Heartbeat: server ping every 30 s, close after three missed pongs.
//! Backpressure is the store's problem: a slow client sees one
//! `subscription_lagging` event per gap, never reorders.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{RawQuery, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use crate::events::EventFilter;
use crate::state::AppState;
use crate::transport::auth;

/// Heartbeat interval.
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Connection closes after this many unanswered pings.
const MAX_MISSED_PONGS: u32 = 3;
/// How long to wait for the client's initial filter frame.
const FILTER_DEADLINE: Duration = Duration::from_secs(10);

/// `GET /ws/events` — WebSocket upgrade for the filtered event stream.
pub async fn ws_events_handler(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let query = query.unwrap_or_default();
    if auth::validate_ws_query(&query, state.daemon.auth_token.as_deref()).is_err() {
        return axum::http::Response::builder()
            .status(401)
            .body(axum::body::Body::from("unauthorized"))
            .unwrap_or_default()
            .into_response();
    }
    ws.on_upgrade(move |socket| handle_connection(state, socket))
        .into_response()
}

/// Read the initial filter frame; a missing or malformed frame falls back
/// to the unfiltered stream.
async fn read_filter(socket: &mut WebSocket) -> EventFilter {
    let frame = tokio::time::timeout(FILTER_DEADLINE, socket.recv()).await;
    match frame {
        Ok(Some(Ok(Message::Text(text)))) => {
            serde_json::from_str::<EventFilter>(&text).unwrap_or_default()
        }
        _ => EventFilter::default(),
    }
}

async fn handle_connection(state: Arc<AppState>, mut socket: WebSocket) {
    let filter = read_filter(&mut socket).await;
    let mut subscription = state.events.subscribe(filter);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut ping_timer = tokio::time::interval(PING_INTERVAL);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping_timer.reset(); // first tick should fire after one interval, not at once
    let mut missed_pongs = 0u32;

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                // Final flush: drain whatever is already queued, then close.
                while let Some(event) = subscription.try_recv() {
                    let Ok(json) = serde_json::to_string(&event) else { continue };
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let Ok(json) = serde_json::to_string(&event) else { continue };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            _ = ping_timer.tick() => {
                missed_pongs += 1;
                if missed_pongs > MAX_MISSED_PONGS {
                    tracing::debug!("closing ws client after {MAX_MISSED_PONGS} missed pongs");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => missed_pongs = 0,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
    // Dropping the subscription unsubscribes from the store.
}
