//! HTTP heartbeat sink against a mock dashboard.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use relay_core::{HeartbeatError, HeartbeatPayload, HeartbeatSink, ReportKind};
use relay_supervisor::HttpHeartbeatSink;
use relay_supervisor::heartbeat::{API_KEY_HEADER, HEARTBEAT_PATH};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn payload(kind: ReportKind) -> HeartbeatPayload {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    HeartbeatPayload::new("kord", "1.0.0", 12, 360, at, kind)
}

fn sink(server: &MockServer) -> HttpHeartbeatSink {
    HttpHeartbeatSink::new(&server.uri(), "secret", Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn posts_report_with_api_key_and_parses_ack() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(HEARTBEAT_PATH))
        .and(header(API_KEY_HEADER, "secret"))
        .and(body_json(json!({
            "botId": "kord",
            "metadata": {
                "version": "1.0.0",
                "messagesSent": 12,
                "uptime": 360,
                "lastActive": "2024-05-01T10:00:00.000Z"
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": { "lastHeartbeat": "2024-05-01T10:00:01.000Z" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ack = sink(&server).send(&payload(ReportKind::Alive)).await.unwrap();
    assert_eq!(ack.last_heartbeat.as_deref(), Some("2024-05-01T10:00:01.000Z"));
}

#[tokio::test]
async fn offline_report_carries_status_and_bot_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(HEARTBEAT_PATH))
        .and(wiremock::matchers::body_partial_json(json!({
            "botId": "kord",
            "metadata": { "status": "offline" }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let ack = sink(&server).send(&payload(ReportKind::Offline)).await.unwrap();
    assert!(ack.last_heartbeat.is_none());
}

#[tokio::test]
async fn rejection_maps_to_status_with_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(HEARTBEAT_PATH))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "message": "invalid api key" })),
        )
        .mount(&server)
        .await;

    let err = sink(&server).send(&payload(ReportKind::Alive)).await.unwrap_err();
    assert!(
        matches!(&err, HeartbeatError::Status { status: 401, message } if message == "invalid api key"),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn server_error_keeps_raw_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = sink(&server).send(&payload(ReportKind::Alive)).await.unwrap_err();
    assert!(
        matches!(&err, HeartbeatError::Status { status: 503, message } if message == "maintenance"),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn slow_server_is_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let sink = HttpHeartbeatSink::new(&server.uri(), "secret", Duration::from_millis(100)).unwrap();
    let err = sink.send(&payload(ReportKind::Alive)).await.unwrap_err();
    assert!(matches!(err, HeartbeatError::Unreachable(_)), "unexpected error: {err:?}");
}

#[test]
fn url_joins_dashboard_and_path() {
    let sink = HttpHeartbeatSink::new("https://dash.example/", "k", Duration::from_secs(1)).unwrap();
    assert_eq!(sink.url(), "https://dash.example/api/status/heartbeat");
}
