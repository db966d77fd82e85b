// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device-family portmanteau tools. Each family tool exposes the shared
//! query actions (`list`, `status`) plus the control actions of its driver
//! family, routed through the scheduler's serialization point.

use std::sync::Arc;

use crate::device::DeviceCategory;
use crate::driver::DriverFailure;
use crate::events::NewEvent;
use crate::registry::DeviceEntry;
use crate::scheduler;
use crate::state::AppState;

use super::{require_str, ToolCall, ToolResponse, CATEGORY_CLAMPED};

/// Static shape of one family tool.
pub struct FamilySpec {
    pub tool: &'static str,
    pub categories: &'static [DeviceCategory],
    pub control_actions: &'static [&'static str],
}

pub const FAMILIES: &[FamilySpec] = &[
    FamilySpec {
        tool: "camera",
        categories: &[DeviceCategory::Camera, DeviceCategory::Doorbell],
        control_actions: &[
            "ptz_move",
            "ptz_preset_recall",
            "snapshot",
            "stream_url_get",
            "privacy_set",
        ],
    },
    FamilySpec {
        tool: "plug",
        categories: &[DeviceCategory::Plug],
        control_actions: &["power_set"],
    },
    FamilySpec {
        tool: "light",
        categories: &[DeviceCategory::Bulb],
        control_actions: &["light_set", "scene_recall", "group_set"],
    },
    FamilySpec {
        tool: "sensor",
        categories: &[DeviceCategory::SensorEnv],
        control_actions: &[],
    },
    FamilySpec {
        tool: "smoke",
        categories: &[DeviceCategory::SensorSmoke],
        control_actions: &["self_test"],
    },
    FamilySpec {
        tool: "robot",
        categories: &[DeviceCategory::Robot],
        control_actions: &["move", "patrol", "dock", "estop", "estop_clear"],
    },
];

fn family(tool: &str) -> Option<&'static FamilySpec> {
    FAMILIES.iter().find(|f| f.tool == tool)
}

pub async fn handle(state: &Arc<AppState>, tool: &str, call: ToolCall) -> ToolResponse {
    let Some(spec) = family(tool) else {
        return ToolResponse::fail(
            &call.action,
            DriverFailure::unavailable(format!("unknown family tool: {tool}")),
        );
    };

    let action = call.action.clone();
    match action.as_str() {
        "list" => list(state, spec, &call).await,
        "status" => status(state, spec, &call).await,
        action if spec.control_actions.contains(&action) => control(state, spec, call).await,
        other => ToolResponse::fail(
            other,
            DriverFailure::protocol(format!("unknown action for {tool}: {other}")),
        ),
    }
}

/// `list`: all devices in the family, descriptor + runtime snapshot.
async fn list(state: &Arc<AppState>, spec: &FamilySpec, call: &ToolCall) -> ToolResponse {
    let mut out = Vec::new();
    for (descriptor, snapshot) in state.registry.list().await {
        if spec.categories.contains(&descriptor.category) {
            out.push(serde_json::json!({
                "descriptor": descriptor,
                "state": snapshot,
            }));
        }
    }
    ToolResponse::ok(&call.action, serde_json::json!({"devices": out}))
}

/// `status`: one device's runtime snapshot.
async fn status(state: &Arc<AppState>, spec: &FamilySpec, call: &ToolCall) -> ToolResponse {
    let entry = match resolve_device(state, spec, &call.params).await {
        Ok(entry) => entry,
        Err(failure) => return ToolResponse::fail(&call.action, failure),
    };
    let snapshot = entry.snapshot().await;
    ToolResponse::ok(
        &call.action,
        serde_json::json!({
            "descriptor": entry.descriptor,
            "state": snapshot,
            "capabilities": entry.driver.describe().capabilities,
        }),
    )
}

/// Control actions route to the driver through the per-device serialization
/// point; a clamped parameter additionally produces a warning event.
async fn control(state: &Arc<AppState>, spec: &FamilySpec, call: ToolCall) -> ToolResponse {
    let entry = match resolve_device(state, spec, &call.params).await {
        Ok(entry) => entry,
        Err(failure) => return ToolResponse::fail(&call.action, failure),
    };

    match scheduler::run_act(&entry, &call.action, &call.params).await {
        Ok(data) => {
            if data.get("clamped").and_then(|v| v.as_bool()) == Some(true) {
                state.events.append(
                    NewEvent::warning(
                        CATEGORY_CLAMPED,
                        entry.descriptor.id.clone(),
                        format!("{} parameters out of range; clamped", call.action),
                    )
                    .with_detail(serde_json::json!({"action": call.action})),
                );
            }
            ToolResponse::ok(&call.action, data)
        }
        Err(failure) => ToolResponse::fail(&call.action, failure),
    }
}

/// Look up the `device` parameter and enforce family membership.
async fn resolve_device(
    state: &Arc<AppState>,
    spec: &FamilySpec,
    params: &serde_json::Value,
) -> Result<Arc<DeviceEntry>, DriverFailure> {
    let id = require_str(params, "device")?;
    let entry = state
        .registry
        .lookup(id)
        .await
        .map_err(|_| DriverFailure::unavailable(format!("no such device: {id}")))?;
    if !spec.categories.contains(&entry.descriptor.category) {
        return Err(DriverFailure::unavailable(format!(
            "device {id} is a {}, not handled by the {} tool",
            entry.descriptor.category, spec.tool
        )));
    }
    Ok(entry)
}
