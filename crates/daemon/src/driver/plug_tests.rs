// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio_util::sync::CancellationToken;

use super::*;
use crate::driver::FailureCause;

async fn mock_plug(read_only: bool) -> PlugDriver {
    let descriptor: DeviceDescriptor = serde_json::from_value(serde_json::json!({
        "id": "plug-test",
        "driver": "tapo_plug",
        "category": "plug",
        "label": "Test plug",
        "read_only": read_only,
        "capabilities": {"controllable": true},
        "params": {"mock": true},
    }))
    .unwrap_or_else(|e| panic!("descriptor: {e}"));
    let secrets = SecretStore::from_specs(&["env".to_owned()])
        .unwrap_or_else(|e| panic!("secrets: {e}"));
    PlugDriver::build(&descriptor, &secrets).await.unwrap_or_else(|e| panic!("build: {e}"))
}

#[tokio::test]
async fn mock_probe_reports_energy_quartet() -> anyhow::Result<()> {
    let plug = mock_plug(false).await;
    let cancel = CancellationToken::new();
    match plug.probe(&cancel).await? {
        Payload::Plug { on, power_w, voltage_v, current_a, energy_wh } => {
            assert!(on);
            assert!(power_w > 0.0);
            assert!((220.0..240.0).contains(&voltage_v));
            assert!(current_a > 0.0);
            assert!(energy_wh > 0.0);
        }
        other => anyhow::bail!("wrong payload family: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn power_set_toggles_mock_relay() -> anyhow::Result<()> {
    let plug = mock_plug(false).await;
    let cancel = CancellationToken::new();
    plug.act("power_set", &serde_json::json!({"on": false}), &cancel).await?;
    match plug.probe(&cancel).await? {
        Payload::Plug { on, power_w, .. } => {
            assert!(!on);
            assert_eq!(power_w, 0.0);
        }
        other => anyhow::bail!("wrong payload family: {other:?}"),
    }
    assert_eq!(plug.recorded_actions().len(), 1);
    Ok(())
}

#[tokio::test]
async fn read_only_plug_fails_power_set_as_unavailable() {
    let plug = mock_plug(true).await;
    let cancel = CancellationToken::new();
    let err = plug.act("power_set", &serde_json::json!({"on": false}), &cancel).await;
    match err {
        Err(f) => {
            assert_eq!(f.cause, FailureCause::Unavailable);
            assert!(f.message.contains("read-only"));
        }
        Ok(v) => panic!("expected failure, got {v}"),
    }
}

#[tokio::test]
async fn read_only_plug_advertises_no_actions() {
    let plug = mock_plug(true).await;
    let info = plug.describe();
    assert!(info.actions.is_empty());
    assert!(!info.capabilities.controllable);
    assert_eq!(info.gauges, vec![GaugeKind::PlugPowerWatts]);
}

#[tokio::test]
async fn power_set_requires_boolean() {
    let plug = mock_plug(false).await;
    let cancel = CancellationToken::new();
    let err = plug.act("power_set", &serde_json::json!({"on": "yes"}), &cancel).await;
    assert!(matches!(err, Err(f) if f.cause == FailureCause::Protocol));
}
