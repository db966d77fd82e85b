// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio_util::sync::CancellationToken;

use super::*;
use crate::driver::FailureCause;

async fn mock_bulb() -> BulbDriver {
    let descriptor: DeviceDescriptor = serde_json::from_value(serde_json::json!({
        "id": "bulb-test",
        "driver": "hue_bulb",
        "category": "bulb",
        "label": "Test bulb",
        "capabilities": {"controllable": true},
        "params": {"mock": true},
    }))
    .unwrap_or_else(|e| panic!("descriptor: {e}"));
    let secrets = SecretStore::from_specs(&["env".to_owned()])
        .unwrap_or_else(|e| panic!("secrets: {e}"));
    BulbDriver::build(&descriptor, &secrets).await.unwrap_or_else(|e| panic!("build: {e}"))
}

#[tokio::test]
async fn light_set_preserves_unsupplied_fields() -> anyhow::Result<()> {
    let bulb = mock_bulb().await;
    let cancel = CancellationToken::new();

    // Set a full state first.
    bulb.act(
        "light_set",
        &serde_json::json!({"on": true, "brightness": 42, "color": {"r": 255, "g": 100, "b": 0}}),
        &cancel,
    )
    .await?;

    // Partial update: only brightness. on and color must survive.
    bulb.act("light_set", &serde_json::json!({"brightness": 60}), &cancel).await?;

    match bulb.probe(&cancel).await? {
        Payload::Bulb { on, brightness, color, .. } => {
            assert!(on);
            assert_eq!(brightness, 60);
            assert_eq!(color, LightColor::Rgb { r: 255, g: 100, b: 0 });
        }
        other => anyhow::bail!("wrong payload family: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn brightness_clamps_with_flag() -> anyhow::Result<()> {
    let bulb = mock_bulb().await;
    let cancel = CancellationToken::new();
    let data = bulb
        .act("light_set", &serde_json::json!({"brightness": 250}), &cancel)
        .await?;
    assert_eq!(data["brightness"], 100);
    assert_eq!(data["clamped"], true);
    Ok(())
}

#[tokio::test]
async fn color_temperature_clamps_to_supported_band() -> anyhow::Result<()> {
    let bulb = mock_bulb().await;
    let cancel = CancellationToken::new();
    bulb.act("light_set", &serde_json::json!({"color": {"kelvin": 9000}}), &cancel).await?;
    match bulb.probe(&cancel).await? {
        Payload::Bulb { color, .. } => {
            assert_eq!(color, LightColor::TemperatureK { kelvin: 6500 });
        }
        other => anyhow::bail!("wrong payload family: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn bad_color_is_a_protocol_failure() {
    let bulb = mock_bulb().await;
    let cancel = CancellationToken::new();
    let err = bulb
        .act("light_set", &serde_json::json!({"color": {"hue": 12}}), &cancel)
        .await;
    assert!(matches!(err, Err(f) if f.cause == FailureCause::Protocol));
}

#[tokio::test]
async fn scene_and_group_actions_record_in_mock() -> anyhow::Result<()> {
    let bulb = mock_bulb().await;
    let cancel = CancellationToken::new();
    bulb.act("scene_recall", &serde_json::json!({"name": "movie_night"}), &cancel).await?;
    bulb.act(
        "group_set",
        &serde_json::json!({"group_id": "living_room", "on": false}),
        &cancel,
    )
    .await?;
    let recorded = bulb.recorded_actions();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].0, "scene_recall");
    assert_eq!(recorded[1].0, "group_set");
    Ok(())
}
