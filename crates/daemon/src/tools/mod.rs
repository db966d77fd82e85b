// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool-call dispatcher: the RPC surface AI assistants drive.
//!
//! Tools are coarse-grained portmanteaus — one per device family plus a few
//! cross-cutting ones — so the inventory stays small enough for clients to
//! enumerate reliably. The dispatcher is stateless: all state lives in the
//! registry, the event store, and the drivers. Every invocation, success or
//! failure, appends one `action_invoked` event with redacted parameters so
//! manual actions audit exactly like automatic probes.

pub mod devices;
pub mod system;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::driver::{DriverFailure, FailureCause};
use crate::events::NewEvent;
use crate::state::AppState;

/// Audit category for tool invocations.
pub const CATEGORY_ACTION: &str = "action_invoked";
/// Warning category for clamped action parameters.
pub const CATEGORY_CLAMPED: &str = "action_clamped";

/// One tool invocation: `{action, params}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub cause: FailureCause,
    pub message: String,
}

/// Structured result of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub success: bool,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ToolResponse {
    pub fn ok(action: &str, data: serde_json::Value) -> Self {
        Self { success: true, action: action.to_owned(), data: Some(data), error: None }
    }

    pub fn fail(action: &str, failure: DriverFailure) -> Self {
        Self {
            success: false,
            action: action.to_owned(),
            data: None,
            error: Some(ToolError { cause: failure.cause, message: failure.message }),
        }
    }
}

/// The advertised tool inventory.
pub const TOOL_NAMES: &[&str] = &[
    "camera", "plug", "light", "sensor", "smoke", "robot", "system", "events", "config",
    "analytics", "describe",
];

/// Route one call to its handler, then append the audit event.
pub async fn dispatch(state: &Arc<AppState>, tool: &str, call: ToolCall) -> ToolResponse {
    if !state.accepting_tools() {
        return ToolResponse::fail(
            &call.action,
            DriverFailure::unavailable("daemon is shutting down"),
        );
    }

    let action = call.action.clone();
    let params = call.params.clone();

    let response = match tool {
        "camera" | "plug" | "light" | "sensor" | "smoke" | "robot" => {
            devices::handle(state, tool, call).await
        }
        "system" => system::handle_system(state, call).await,
        "events" => system::handle_events(state, call),
        "config" => system::handle_config(state, call).await,
        "analytics" => system::handle_analytics(state, call).await,
        "describe" => system::handle_describe(&call),
        other => ToolResponse::fail(
            &action,
            DriverFailure::unavailable(format!("unknown tool: {other}")),
        ),
    };

    audit(state, tool, &action, &params, &response);
    response
}

/// One audit event per invocation. The store scrubs credentials from the
/// echoed parameters before anything persists or fans out.
fn audit(
    state: &Arc<AppState>,
    tool: &str,
    action: &str,
    params: &serde_json::Value,
    response: &ToolResponse,
) {
    let mut detail = serde_json::json!({
        "action": action,
        "params": params,
    });
    let draft = if response.success {
        NewEvent::info(CATEGORY_ACTION, tool, format!("{tool}.{action} succeeded"))
    } else {
        if let Some(ref error) = response.error {
            detail["cause"] = serde_json::json!(error.cause);
            detail["error"] = serde_json::json!(error.message);
        }
        NewEvent::warning(CATEGORY_ACTION, tool, format!("{tool}.{action} failed"))
    };
    state.events.append(draft.with_detail(detail));
}

/// Fetch a required string parameter or fail with a `protocol` cause.
pub(crate) fn require_str<'p>(
    params: &'p serde_json::Value,
    key: &str,
) -> Result<&'p str, DriverFailure> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| DriverFailure::protocol(format!("missing required parameter: {key}")))
}

#[cfg(test)]
#[path = "tools_tests.rs"]
mod tests;
