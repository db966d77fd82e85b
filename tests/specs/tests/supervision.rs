// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios: full daemon over real TCP with mock drivers.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use hearth_specs::{mock_device, TestDaemon};

#[tokio::test]
async fn parallel_fleet_probes_every_device() -> anyhow::Result<()> {
    // A fleet at the 5 s minimum interval: within ~12 s wall time every
    // device must have completed at least one probe cycle. With serial
    // probing this would still pass (mock probes are fast), so the stronger
    // signal is that the whole fleet shows up healthy at once.
    let devices: Vec<serde_json::Value> = (0..30)
        .map(|n| mock_device(&format!("plug-{n:02}"), "tapo_plug", "plug"))
        .collect();
    let daemon = TestDaemon::start(serde_json::json!({"devices": devices})).await?;

    tokio::time::sleep(std::time::Duration::from_secs(12)).await;

    let metrics = reqwest::get(format!("{}/metrics", daemon.base_url)).await?.text().await?;
    for n in 0..30 {
        let id = format!("plug-{n:02}");
        assert!(
            metrics.contains(&format!("device_up{{category=\"plug\",driver=\"tapo_plug\",id=\"{id}\"}} 1")),
            "device {id} never reported up:\n{metrics}"
        );
    }

    // Every device probed at least once, and the histogram saw it.
    let count_lines = metrics
        .lines()
        .filter(|l| l.starts_with("device_probe_duration_seconds_count"))
        .count();
    assert_eq!(count_lines, 30);

    daemon.stop().await
}

#[tokio::test]
async fn websocket_clients_receive_filtered_events() -> anyhow::Result<()> {
    let daemon = TestDaemon::start(serde_json::json!({
        "devices": [mock_device("cam-1", "tapo_camera", "camera")],
    }))
    .await?;

    let (mut socket, _) = tokio_tungstenite::connect_async(&daemon.ws_url).await?;
    socket
        .send(Message::Text(
            r#"{"severity_floor": "warning", "categories": ["smoke_alert"]}"#.into(),
        ))
        .await?;
    // Give the server a beat to install the subscription.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    // Filtered out: wrong category / too low severity.
    daemon.state.events.append(hearth::events::NewEvent::info(
        "device_connection",
        "cam-1",
        "noise",
    ));
    daemon.state.events.append(hearth::events::NewEvent::warning(
        "energy_alert",
        "plug-1",
        "noise",
    ));
    // Matches the filter.
    daemon.state.events.append(hearth::events::NewEvent::alarm(
        "smoke_alert",
        "smoke-1",
        "fire drill",
    ));

    let frame = tokio::time::timeout(std::time::Duration::from_secs(5), socket.next())
        .await
        .map_err(|_| anyhow::anyhow!("no ws frame within deadline"))?
        .ok_or_else(|| anyhow::anyhow!("ws stream ended"))??;

    let text = match frame {
        Message::Text(text) => text.to_string(),
        other => anyhow::bail!("unexpected frame: {other:?}"),
    };
    let event: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(event["category"], "smoke_alert");
    assert_eq!(event["severity"], "alarm");
    assert_eq!(event["source"], "smoke-1");

    daemon.stop().await
}

#[tokio::test]
async fn tool_call_round_trip_with_redaction() -> anyhow::Result<()> {
    let daemon = TestDaemon::start(serde_json::json!({
        "devices": [mock_device("cam-1", "tapo_camera", "camera")],
    }))
    .await?;
    let client = reqwest::Client::new();

    // Invoke with a credential-looking parameter; the driver ignores it but
    // the audit trail must scrub it.
    let resp: serde_json::Value = client
        .post(format!("{}/api/tools/camera", daemon.base_url))
        .json(&serde_json::json!({
            "action": "privacy_set",
            "params": {"device": "cam-1", "on": true, "password": "hunter2"},
        }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["success"], true, "{resp}");

    // Nothing the API returns may contain the raw secret.
    let events_body = client
        .get(format!("{}/api/events?category=action_invoked", daemon.base_url))
        .send()
        .await?
        .text()
        .await?;
    assert!(!events_body.contains("hunter2"), "secret leaked: {events_body}");
    assert!(events_body.contains("<redacted>"));

    daemon.stop().await
}

#[tokio::test]
async fn smoke_emergency_reaches_alarm_stream_end_to_end() -> anyhow::Result<()> {
    let mut detector = mock_device("smoke-1", "nest_protect", "sensor_smoke");
    detector["interval_seconds"] = serde_json::json!(5);
    detector["params"]["mock_alert"] = serde_json::json!("emergency");
    let daemon = TestDaemon::start(serde_json::json!({"devices": [detector]})).await?;

    // First probe fires within ~6 s (5 s interval ±20% jitter).
    tokio::time::sleep(std::time::Duration::from_secs(8)).await;

    let events: Vec<serde_json::Value> = reqwest::get(format!(
        "{}/api/events?severity=alarm&category=smoke_alert",
        daemon.base_url
    ))
    .await?
    .json()
    .await?;
    assert_eq!(events.len(), 1, "exactly one emergency alarm: {events:?}");
    assert_eq!(events[0]["source"], "smoke-1");
    assert_eq!(events[0]["acknowledged"], false);

    daemon.stop().await
}

#[tokio::test]
async fn unreachable_device_escalates_to_offline() -> anyhow::Result<()> {
    // A real (non-mock) plug pointing at a closed port: transport failures
    // walk it through degraded to offline.
    let daemon = TestDaemon::start(serde_json::json!({
        "scheduler": {"failure_threshold": 2},
        "devices": [{
            "id": "plug-dead",
            "driver": "tapo_plug",
            "category": "plug",
            "label": "Dead plug",
            "interval_seconds": 5,
            "params": {"host": "127.0.0.1", "port": 1},
        }],
    }))
    .await?;

    // Two failing cycles: first at ~5 s, second after ~10 s backoff.
    tokio::time::sleep(std::time::Duration::from_secs(22)).await;

    let device: serde_json::Value =
        reqwest::get(format!("{}/api/devices/plug-dead", daemon.base_url))
            .await?
            .json()
            .await?;
    assert_eq!(device["state"]["phase"], "offline", "{device}");

    let alarms: Vec<serde_json::Value> = reqwest::get(format!(
        "{}/api/events?severity=alarm&category=device_connection",
        daemon.base_url
    ))
    .await?
    .json()
    .await?;
    assert_eq!(alarms.len(), 1);
    let detail = &alarms[0]["detail"];
    assert_eq!(detail["consecutive_failures"], 2);

    daemon.stop().await
}

#[tokio::test]
async fn startup_config_errors_exit_with_code_one_semantics() -> anyhow::Result<()> {
    let missing = hearth::run(hearth::config::DaemonConfig {
        config_path: "/nonexistent/hearth.yaml".into(),
        http_listen: "127.0.0.1:0".into(),
        log_level: "info".into(),
        auth_token: None,
    })
    .await;
    match missing {
        Err(e) => assert_eq!(e.exit_code(), 1),
        Ok(()) => anyhow::bail!("run() should fail on a missing config"),
    }
    Ok(())
}

#[tokio::test]
async fn bind_conflicts_exit_with_code_two_semantics() -> anyhow::Result<()> {
    let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = blocker.local_addr()?;

    let dir = tempfile_dir()?;
    let config_path = dir.join("hearth.json");
    std::fs::write(&config_path, br#"{"devices": []}"#)?;

    let result = hearth::run(hearth::config::DaemonConfig {
        config_path,
        http_listen: addr.to_string(),
        log_level: "info".into(),
        auth_token: None,
    })
    .await;
    match result {
        Err(e) => assert_eq!(e.exit_code(), 2),
        Ok(()) => anyhow::bail!("run() should fail when the port is taken"),
    }
    Ok(())
}

fn tempfile_dir() -> anyhow::Result<std::path::PathBuf> {
    let dir = std::env::temp_dir().join(format!("hearth-specs-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
