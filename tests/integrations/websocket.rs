//! End-to-end tests over a real socket.

use incidentcast::filter::FilterCriteria;
use incidentcast::profile::ProfileRecord;
use incidentcast::registry::Topic;
use incidentcast::time_window::TimeSlot;
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Error as WsError};

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::app::{recv, send, TestApp};
use helpers::fixtures::{monday_at, new_alert, TOKEN};

fn status_of(err: WsError) -> u16 {
    match err {
        WsError::Http(response) => response.status().as_u16(),
        other => panic!("expected an HTTP rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let app = TestApp::spawn().await;

    let err = connect_async(app.url("/active/")).await.unwrap_err();
    assert_eq!(status_of(err), 401);
    let err = connect_async(app.url("/active/?token=wrong")).await.unwrap_err();
    assert_eq!(status_of(err), 401);

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let app = TestApp::spawn().await;
    let err = connect_async(app.url(&format!("/elsewhere/?token={TOKEN}")))
        .await
        .unwrap_err();
    assert_eq!(status_of(err), 404);
    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_query_token_is_accepted() {
    let app = TestApp::spawn().await;
    let (mut client, _) = connect_async(app.url(&format!("/active/?token={TOKEN}")))
        .await
        .unwrap();
    send(&mut client, json!({"action": "list"})).await;
    assert_eq!(recv(&mut client).await, json!({"type": "incidents", "incidents": []}));
    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_subscribe_then_receive_events() {
    let app = TestApp::spawn().await;
    let existing = app.alerts.create(new_alert(monday_at(7, 0, 0), 1, 1, None, 1));

    let mut client = app.connect().await;
    send(&mut client, json!({"action": "subscribe"})).await;
    let ack = recv(&mut client).await;
    assert_eq!(ack["type"], "subscribed");
    assert_eq!(ack["start_incidents"][0]["pk"], existing.pk);
    app.wait_for(|app| app.registry.member_count(&Topic::active_incidents()) == 1)
        .await;

    let alert = app.alerts.create(new_alert(monday_at(8, 0, 0), 2, 1, Some(3), 4));
    app.alerts.resolve(alert.pk).unwrap();

    let created = recv(&mut client).await;
    assert_eq!(created["type"], "created");
    assert_eq!(created["payload"], serde_json::to_value(&alert).unwrap());
    let modified = recv(&mut client).await;
    assert_eq!(modified["type"], "modified");
    assert_eq!(modified["payload"]["active_state"], false);

    drop(client);
    app.wait_for(|app| app.registry.member_count(&Topic::active_incidents()) == 0)
        .await;
    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_unknown_action_keeps_connection_open() {
    let app = TestApp::spawn().await;
    let mut client = app.connect().await;

    send(&mut client, json!({"action": "unsubscribe_everything"})).await;
    assert_eq!(
        recv(&mut client).await,
        json!({"type": "error", "error": "unknown_action"})
    );

    send(&mut client, json!({"action": "list"})).await;
    assert_eq!(recv(&mut client).await["type"], "incidents");
    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_profile_incidents_and_preview() {
    let app = TestApp::spawn().await;
    app.preferences
        .save_time_slot(TimeSlot::always(1, 1, "always"))
        .unwrap();
    app.preferences
        .save_filter(
            1,
            1,
            "source one",
            r#"{"sourceIds":[1],"objectTypeIds":[],"parentObjectIds":[],"problemTypeIds":[]}"#,
        )
        .unwrap();
    app.preferences
        .save_profile(ProfileRecord::new(5, 1, 1).with_filter(1))
        .unwrap();
    let a1 = app.alerts.create(new_alert(monday_at(8, 0, 0), 1, 1, None, 1));
    let a2 = app.alerts.create(new_alert(monday_at(9, 0, 0), 2, 1, None, 1));

    let mut client = app.connect().await;
    send(&mut client, json!({"action": "profile_incidents", "profile": 5})).await;
    let reply = recv(&mut client).await;
    assert_eq!(reply["type"], "profile_incidents");
    assert_eq!(reply["profile"], 5);
    assert_eq!(reply["incidents"], json!([serde_json::to_value(&a1).unwrap()]));

    send(
        &mut client,
        json!({"action": "preview_filter", "filter": FilterCriteria::any().to_value()}),
    )
    .await;
    let reply = recv(&mut client).await;
    assert_eq!(reply["type"], "filter_preview");
    assert_eq!(
        reply["incidents"],
        json!([serde_json::to_value(&a2).unwrap(), serde_json::to_value(&a1).unwrap()])
    );

    send(&mut client, json!({"action": "profile_incidents", "profile": 6})).await;
    assert_eq!(
        recv(&mut client).await,
        json!({"type": "error", "error": "not_found"})
    );
    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_with_connected_clients() {
    let app = TestApp::spawn().await;
    let mut client = app.connect().await;
    send(&mut client, json!({"action": "subscribe"})).await;
    recv(&mut client).await;

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_idle_connection_is_dropped_after_handshake_timeout() {
    let app = TestApp::spawn_with(|config| config.server.handshake_timeout_ms = 100).await;

    let mut idle = TcpStream::connect(app.addr).await.unwrap();
    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(2), idle.read(&mut buf))
        .await
        .expect("server should drop the idle connection");
    assert!(matches!(read, Ok(0) | Err(_)));

    // The listener keeps serving.
    let mut client = app.connect().await;
    send(&mut client, json!({"action": "list"})).await;
    assert_eq!(recv(&mut client).await["type"], "incidents");
    app.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_metrics_endpoint_reports_sessions() {
    let app = TestApp::spawn_with(|config| {
        config.metrics.enabled = true;
        config.metrics.listen_address = "127.0.0.1:0".parse().unwrap();
    })
    .await;
    let metrics_addr = app.metrics_addr.expect("metrics should be served");

    let mut client = app.connect().await;
    send(&mut client, json!({"action": "list"})).await;
    recv(&mut client).await;

    let mut stream = TcpStream::connect(metrics_addr).await.unwrap();
    stream
        .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut body = String::new();
    stream.read_to_string(&mut body).await.unwrap();
    assert!(body.starts_with("HTTP/1.1 200"));
    assert!(body.contains("sessions_opened_total"));

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}
