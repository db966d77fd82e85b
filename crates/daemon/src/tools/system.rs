// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-cutting tools: system status, event queries and acknowledgement,
//! configuration reload, analytics over the retained event window, and the
//! `describe` meta-tool advertising the whole inventory.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::FileConfig;
use crate::driver::DriverFailure;
use crate::events::{NewEvent, Severity};
use crate::scheduler;
use crate::state::AppState;

use super::devices::FAMILIES;
use super::{ToolCall, ToolResponse};

// -- system --------------------------------------------------------------------

pub async fn handle_system(state: &Arc<AppState>, call: ToolCall) -> ToolResponse {
    match call.action.as_str() {
        "status" => {
            let mut phases: BTreeMap<&'static str, u32> = BTreeMap::new();
            for (_, snapshot) in state.registry.list().await {
                *phases.entry(snapshot.runtime.phase.as_str()).or_default() += 1;
            }
            ToolResponse::ok(
                &call.action,
                serde_json::json!({
                    "uptime_s": state.uptime_secs(),
                    "devices": state.registry.len().await,
                    "phases": phases,
                    "event_store_size": state.events.len(),
                    "last_event_seq": state.events.last_seq(),
                }),
            )
        }
        "health" => ToolResponse::ok(
            &call.action,
            serde_json::json!({"healthy": !state.shutdown.is_cancelled()}),
        ),
        "version" => ToolResponse::ok(
            &call.action,
            serde_json::json!({"version": env!("CARGO_PKG_VERSION")}),
        ),
        other => unknown_action("system", other),
    }
}

// -- events --------------------------------------------------------------------

pub fn handle_events(state: &Arc<AppState>, call: ToolCall) -> ToolResponse {
    match call.action.as_str() {
        "query" => {
            let since = call.params.get("since").and_then(|v| v.as_u64());
            let severity = match parse_severity(&call.params, "severity") {
                Ok(severity) => severity,
                Err(failure) => return ToolResponse::fail(&call.action, failure),
            };
            let category = call.params.get("category").and_then(|v| v.as_str());
            let limit =
                call.params.get("limit").and_then(|v| v.as_u64()).unwrap_or(50) as usize;
            let events = state.events.query(since, severity, category, limit);
            ToolResponse::ok(&call.action, serde_json::json!({"events": events}))
        }
        "acknowledge" => {
            let Some(seq) = call.params.get("seq").and_then(|v| v.as_u64()) else {
                return ToolResponse::fail(
                    &call.action,
                    DriverFailure::protocol("missing required parameter: seq"),
                );
            };
            match state.events.acknowledge(seq) {
                Ok(()) => ToolResponse::ok(&call.action, serde_json::json!({"seq": seq})),
                Err(e) => ToolResponse::fail(
                    &call.action,
                    DriverFailure::unavailable(e.to_string()),
                ),
            }
        }
        other => unknown_action("events", other),
    }
}

// -- config --------------------------------------------------------------------

pub async fn handle_config(state: &Arc<AppState>, call: ToolCall) -> ToolResponse {
    match call.action.as_str() {
        "show" => ToolResponse::ok(
            &call.action,
            serde_json::json!({
                "config_path": state.daemon.config_path,
                "devices": state.registry.len().await,
                "scheduler": {
                    "default_interval_seconds": state.file.scheduler.default_interval_seconds,
                    "failure_threshold": state.file.scheduler.failure_threshold,
                },
                "event_store": {
                    "capacity": state.file.event_store.capacity,
                    "subscription_buffer": state.file.event_store.subscription_buffer,
                },
            }),
        ),
        "reload" => reload(state, &call).await,
        other => unknown_action("config", other),
    }
}

/// Re-read the config document and reload the registry transactionally.
/// On any failure the running set is untouched.
async fn reload(state: &Arc<AppState>, call: &ToolCall) -> ToolResponse {
    let file = match FileConfig::load(&state.daemon.config_path) {
        Ok(file) => file,
        Err(e) => {
            return ToolResponse::fail(
                &call.action,
                DriverFailure::protocol(format!("config rejected: {e}")),
            )
        }
    };

    let descriptors: Vec<_> = file
        .devices
        .iter()
        .map(|d| (d.clone(), file.effective_interval(d)))
        .collect();

    match state.registry.reload(descriptors).await {
        Ok((diff, fresh)) => {
            for entry in fresh {
                let handle = scheduler::spawn_device_scheduler(Arc::clone(state), entry);
                state.scheduler_tasks.lock().push(handle);
            }
            state.events.append(
                NewEvent::info("config_reload", "system", "configuration reloaded")
                    .with_detail(serde_json::json!({
                        "added": diff.added,
                        "removed": diff.removed,
                        "replaced": diff.replaced,
                    })),
            );
            ToolResponse::ok(&call.action, serde_json::json!({"diff": diff}))
        }
        Err(e) => ToolResponse::fail(
            &call.action,
            DriverFailure::unavailable(format!("reload aborted: {e}")),
        ),
    }
}

// -- analytics -----------------------------------------------------------------

pub async fn handle_analytics(state: &Arc<AppState>, call: ToolCall) -> ToolResponse {
    match call.action.as_str() {
        "summary" => {
            let events = state.events.query(None, None, None, usize::MAX);
            let mut by_severity: BTreeMap<&'static str, u64> = BTreeMap::new();
            let mut by_category: BTreeMap<String, u64> = BTreeMap::new();
            for event in &events {
                *by_severity.entry(event.severity.as_str()).or_default() += 1;
                *by_category.entry(event.category.clone()).or_default() += 1;
            }
            let (unacked_warning, unacked_alarm) = state.events.unacked_counts();
            ToolResponse::ok(
                &call.action,
                serde_json::json!({
                    "retained": events.len(),
                    "by_severity": by_severity,
                    "by_category": by_category,
                    "unacknowledged": {
                        "warning": unacked_warning,
                        "alarm": unacked_alarm,
                    },
                }),
            )
        }
        "top_failures" => {
            let mut rows: Vec<_> = state
                .registry
                .list()
                .await
                .into_iter()
                .filter(|(_, s)| s.runtime.consecutive_failures > 0 || s.runtime.last_error.is_some())
                .map(|(d, s)| {
                    serde_json::json!({
                        "device": d.id,
                        "phase": s.runtime.phase,
                        "consecutive_failures": s.runtime.consecutive_failures,
                        "last_error": s.runtime.last_error,
                    })
                })
                .collect();
            rows.sort_by_key(|r| {
                std::cmp::Reverse(r["consecutive_failures"].as_u64().unwrap_or(0))
            });
            rows.truncate(10);
            ToolResponse::ok(&call.action, serde_json::json!({"devices": rows}))
        }
        other => unknown_action("analytics", other),
    }
}

// -- describe ------------------------------------------------------------------

pub fn handle_describe(call: &ToolCall) -> ToolResponse {
    let mut tools = Vec::new();

    for spec in FAMILIES {
        let mut actions = vec![
            serde_json::json!({"name": "list", "params": []}),
            serde_json::json!({
                "name": "status",
                "params": [param("device", "string", true)],
            }),
        ];
        for action in spec.control_actions {
            actions.push(serde_json::json!({
                "name": action,
                "params": control_params(action),
            }));
        }
        tools.push(serde_json::json!({
            "tool": spec.tool,
            "categories": spec.categories,
            "actions": actions,
        }));
    }

    tools.push(serde_json::json!({
        "tool": "system",
        "actions": [
            {"name": "status", "params": []},
            {"name": "health", "params": []},
            {"name": "version", "params": []},
        ],
    }));
    tools.push(serde_json::json!({
        "tool": "events",
        "actions": [
            {"name": "query", "params": [
                param("since", "integer", false),
                param("severity", "string", false),
                param("category", "string", false),
                param("limit", "integer", false),
            ]},
            {"name": "acknowledge", "params": [param("seq", "integer", true)]},
        ],
    }));
    tools.push(serde_json::json!({
        "tool": "config",
        "actions": [
            {"name": "show", "params": []},
            {"name": "reload", "params": []},
        ],
    }));
    tools.push(serde_json::json!({
        "tool": "analytics",
        "actions": [
            {"name": "summary", "params": []},
            {"name": "top_failures", "params": []},
        ],
    }));
    tools.push(serde_json::json!({
        "tool": "describe",
        "actions": [{"name": "describe", "params": []}],
    }));

    ToolResponse::ok(&call.action, serde_json::json!({"tools": tools}))
}

/// Per-action parameter schemas for the family control actions. These stay
/// in lockstep with the drivers' declared `ActionSpec`s.
fn control_params(action: &str) -> Vec<serde_json::Value> {
    let mut params = vec![param("device", "string", true)];
    match action {
        "ptz_move" => {
            params.push(param("direction", "string", true));
            params.push(param("speed", "number", false));
            params.push(param("duration", "number", false));
        }
        "ptz_preset_recall" => params.push(param("slot", "integer", true)),
        "privacy_set" | "power_set" => params.push(param("on", "boolean", true)),
        "light_set" => {
            params.push(param("on", "boolean", false));
            params.push(param("brightness", "number", false));
            params.push(param("color", "object", false));
        }
        "scene_recall" => params.push(param("name", "string", true)),
        "group_set" => params.push(param("group_id", "string", true)),
        "move" => {
            params.push(param("linear", "number", false));
            params.push(param("angular", "number", false));
            params.push(param("duration", "number", false));
        }
        "patrol" => params.push(param("route_name", "string", true)),
        // snapshot, stream_url_get, self_test, dock, estop, estop_clear
        _ => {}
    }
    params
}

fn param(name: &str, kind: &str, required: bool) -> serde_json::Value {
    serde_json::json!({"name": name, "kind": kind, "required": required})
}

// -- shared helpers ------------------------------------------------------------

fn unknown_action(tool: &str, action: &str) -> ToolResponse {
    ToolResponse::fail(
        action,
        DriverFailure::protocol(format!("unknown action for {tool}: {action}")),
    )
}

fn parse_severity(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<Severity>, DriverFailure> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => {
            let raw = value
                .as_str()
                .ok_or_else(|| DriverFailure::protocol(format!("{key} must be a string")))?;
            serde_json::from_value(serde_json::Value::String(raw.to_owned()))
                .map(Some)
                .map_err(|_| DriverFailure::protocol(format!("unknown severity: {raw}")))
        }
    }
}
