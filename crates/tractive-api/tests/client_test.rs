#![allow(clippy::unwrap_used)]
// Integration tests for the typed facade using wiremock.

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tractive_api::{ApiErrorKind, ClientConfig, Credentials, Error, TractiveClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, TractiveClient) {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user_id": "u1",
            "access_token": "tok",
            "expires_at": 4_102_444_800_i64,
        })))
        .mount(&server)
        .await;

    let base = Url::parse(&server.uri()).unwrap();
    let config = ClientConfig {
        api_base: base.clone(),
        aps_base: base,
        client_id: "test-client".into(),
        ..ClientConfig::default()
    };
    let client =
        TractiveClient::new(config, Credentials::new("pet@example.com", "hunter2")).unwrap();
    (server, client)
}

// ── Trackers ────────────────────────────────────────────────────────

#[tokio::test]
async fn list_trackers() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/user/u1/trackers"))
        .and(header("authorization", "Bearer tok"))
        .and(header("x-tractive-user", "u1"))
        .and(header("x-tractive-client", "test-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "_id": "TRACKER1", "_type": "tracker" },
            { "_id": "TRACKER2", "_type": "tracker" }
        ])))
        .mount(&server)
        .await;

    let trackers = client.trackers().await.unwrap();

    assert_eq!(trackers.len(), 2);
    assert_eq!(trackers[0].id, "TRACKER1");
    assert_eq!(trackers[1].id, "TRACKER2");
}

#[tokio::test]
async fn tracker_detail() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/tracker/TRACKER1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_id": "TRACKER1",
            "hw_edition": "TRNJA4",
            "model_number": "TRNJAWHITE",
            "fw_version": "4.42.1",
            "state": "operational",
            "battery_save_mode": false,
            "capabilities": ["buzzer", "led", "live_tracking"]
        })))
        .mount(&server)
        .await;

    let tracker = client.tracker("TRACKER1").await.unwrap();

    assert_eq!(tracker.id, "TRACKER1");
    assert_eq!(tracker.model_number.as_deref(), Some("TRNJAWHITE"));
    assert_eq!(tracker.capabilities.len(), 3);
}

#[tokio::test]
async fn hardware_report() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/device_hw_report/TRACKER1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "battery_level": 78,
            "clip_mounted_state": true,
            "time": 1_719_000_000
        })))
        .mount(&server)
        .await;

    let report = client.hardware_report("TRACKER1").await.unwrap();

    assert_eq!(report.battery_level, Some(78));
    assert_eq!(report.clip_mounted_state, Some(true));
}

#[tokio::test]
async fn position_report() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/device_pos_report/TRACKER1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "time": 1_719_000_000,
            "latlong": [48.2082, 16.3738],
            "sensor_used": "GPS"
        })))
        .mount(&server)
        .await;

    let position = client.position_report("TRACKER1").await.unwrap();

    assert_eq!(position.time, Some(1_719_000_000));
    assert_eq!(position.sensor_used.as_deref(), Some("GPS"));
}

#[tokio::test]
async fn position_history_passes_range_and_format() {
    let (server, client) = setup().await;

    let from = Utc.timestamp_opt(1_719_000_000, 0).unwrap();
    let to = Utc.timestamp_opt(1_719_003_600, 0).unwrap();

    Mock::given(method("GET"))
        .and(path("/tracker/TRACKER1/positions"))
        .and(query_param("time_from", "1719000000"))
        .and(query_param("time_to", "1719003600"))
        .and(query_param("format", "json_segments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([[
            { "time": 1_719_000_100, "latlong": [48.20, 16.37] },
            { "time": 1_719_000_400, "latlong": [48.21, 16.38] }
        ]])))
        .mount(&server)
        .await;

    let segments = client.positions("TRACKER1", from, to).await.unwrap();

    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].len(), 2);
    assert_eq!(segments[0][1].time, Some(1_719_000_400));
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn buzzer_command_hits_the_on_endpoint() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/tracker/TRACKER1/command/buzzer_control/on"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "pending": true })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client.set_buzzer("TRACKER1", true).await.unwrap();
    assert_eq!(response.pending, Some(true));
}

#[tokio::test]
async fn live_tracking_off() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/tracker/TRACKER1/command/live_tracking/off"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "pending": false })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client.set_live_tracking("TRACKER1", false).await.unwrap();
    assert_eq!(response.pending, Some(false));
}

// ── Trackable objects ───────────────────────────────────────────────

#[tokio::test]
async fn trackable_objects_and_detail() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/user/u1/trackable_objects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "_id": "PET1", "_type": "pet" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/trackable_object/PET1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_id": "PET1",
            "device_id": "TRACKER1",
            "details": { "name": "Rex" }
        })))
        .mount(&server)
        .await;

    let pets = client.trackable_objects().await.unwrap();
    assert_eq!(pets.len(), 1);

    let pet = client.trackable_object("PET1").await.unwrap();
    assert_eq!(pet.device_id.as_deref(), Some("TRACKER1"));
    assert_eq!(pet.details["name"], "Rex");
}

#[tokio::test]
async fn health_overview_uses_wellness_base() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/pet/PET1/health/overview"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pet_id": "PET1",
            "activity": { "minutes_goal": 60 }
        })))
        .mount(&server)
        .await;

    let overview = client.health_overview("PET1").await.unwrap();
    assert_eq!(overview.pet_id.as_deref(), Some("PET1"));
    assert_eq!(overview.extra["activity"]["minutes_goal"], 60);
}

// ── Errors ──────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_tracker_is_not_found() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/tracker/MISSING"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such tracker"))
        .mount(&server)
        .await;

    let result = client.tracker("MISSING").await;
    assert!(result.as_ref().is_err_and(Error::is_not_found), "got: {result:?}");
}

#[tokio::test]
async fn rate_limit_and_server_errors_are_kinded() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/tracker/BUSY"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tracker/BROKEN"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    assert!(matches!(
        client.tracker("BUSY").await,
        Err(Error::Api {
            kind: ApiErrorKind::RateLimited,
            ..
        })
    ));
    assert!(matches!(
        client.tracker("BROKEN").await,
        Err(Error::Api {
            kind: ApiErrorKind::Server,
            status: 503,
            ..
        })
    ));
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/tracker/TRACKER1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let result = client.tracker("TRACKER1").await;
    assert!(matches!(result, Err(Error::Decode { .. })));
}
