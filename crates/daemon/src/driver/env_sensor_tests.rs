// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio_util::sync::CancellationToken;

use super::*;

async fn mock_station(extra: serde_json::Value) -> EnvSensorDriver {
    let mut params = serde_json::json!({"mock": true});
    if let (Some(base), Some(extra)) = (params.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    let descriptor: DeviceDescriptor = serde_json::from_value(serde_json::json!({
        "id": "weather-test",
        "driver": "netatmo_station",
        "category": "sensor_env",
        "label": "Test station",
        "params": params,
    }))
    .unwrap_or_else(|e| panic!("descriptor: {e}"));
    let secrets = SecretStore::from_specs(&["env".to_owned()])
        .unwrap_or_else(|e| panic!("secrets: {e}"));
    EnvSensorDriver::build(&descriptor, &secrets)
        .await
        .unwrap_or_else(|e| panic!("build: {e}"))
}

#[tokio::test]
async fn mock_probe_reports_indoor_and_outdoor_modules() -> anyhow::Result<()> {
    let station = mock_station(serde_json::json!({})).await;
    let cancel = CancellationToken::new();
    match station.probe(&cancel).await? {
        Payload::EnvSensor { modules } => {
            let indoor = modules.get("indoor").ok_or_else(|| anyhow::anyhow!("no indoor"))?;
            assert!(indoor.temperature_c.is_some());
            assert!(indoor.co2_ppm.is_some());
            assert!(indoor.noise_db.is_some());
            let outdoor = modules.get("outdoor").ok_or_else(|| anyhow::anyhow!("no outdoor"))?;
            assert!(outdoor.temperature_c.is_some());
            assert!(outdoor.co2_ppm.is_none());
        }
        other => anyhow::bail!("wrong payload family: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn mock_co2_override_pins_the_reading() -> anyhow::Result<()> {
    let station = mock_station(serde_json::json!({"mock_co2_ppm": 1250.0})).await;
    let cancel = CancellationToken::new();
    match station.probe(&cancel).await? {
        Payload::EnvSensor { modules } => {
            let indoor = modules.get("indoor").ok_or_else(|| anyhow::anyhow!("no indoor"))?;
            assert_eq!(indoor.co2_ppm, Some(1250.0));
        }
        other => anyhow::bail!("wrong payload family: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn all_actions_fail_unavailable() {
    let station = mock_station(serde_json::json!({})).await;
    let cancel = CancellationToken::new();
    let err = station.act("self_test", &serde_json::Value::Null, &cancel).await;
    assert!(matches!(err, Err(f) if f.cause == FailureCause::Unavailable));
}

#[tokio::test]
async fn describe_advertises_env_gauges() {
    let station = mock_station(serde_json::json!({})).await;
    let info = station.describe();
    assert!(info.gauges.contains(&GaugeKind::SensorCo2Ppm));
    assert!(info.gauges.contains(&GaugeKind::SensorTemperatureCelsius));
    assert!(info.gauges.contains(&GaugeKind::SensorHumidityPercent));
    assert!(info.actions.is_empty());
}
