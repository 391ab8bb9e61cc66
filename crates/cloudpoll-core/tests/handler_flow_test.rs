#![allow(clippy::unwrap_used)]
// End-to-end handler tests against a wiremock vendor, using the built-in
// GoodWe and Efergy profiles with the base URL pointed at the mock server.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cloudpoll_api::Credentials;
use cloudpoll_core::vendors::goodwe::AUTHORIZATION_EXPIRED;
use cloudpoll_core::{
    BroadcastSink, HttpBinding, SinkEvent, ThingConfig, ThingHandler, ThingStatus, TypedValue,
};

// ── Helpers ─────────────────────────────────────────────────────────

const LOGIN: &str = "/v1/Common/CrossLogin";
const DETAIL: &str = "/v1/PowerStation/GetMonitorDetailByPowerstationId";
const STATIONS: &str = "/PowerStationMonitor/QueryPowerStationMonitor";

fn goodwe_config(server: &MockServer) -> ThingConfig {
    let mut config = ThingConfig::new(
        "goodwe-1",
        "goodwe",
        Credentials::password("owner@example.com", "secret"),
    );
    config.base_url = Some(Url::parse(&server.uri()).unwrap());
    config.device_id = Some("ps-42".into());
    config.timeout = Duration::from_secs(1);
    // Polling is driven by `refresh()` in these tests.
    config.initial_delay = Duration::from_secs(3600);
    config.refresh_interval = Duration::from_secs(3600);
    config
}

fn handler_for(config: ThingConfig, sink: &BroadcastSink) -> ThingHandler<HttpBinding> {
    let binding = HttpBinding::new(&config).unwrap();
    ThingHandler::new(config, binding, Arc::new(sink.clone()))
}

async fn mount_login(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(LOGIN))
        .and(body_partial_json(json!({"account": "owner@example.com", "pwd": "secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "msg": "",
            "data": {"token": "tok-1", "uid": "uid-1", "timestamp": 1_717_243_190}
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn detail(status: i64) -> serde_json::Value {
    json!({
        "code": 0,
        "msg": "",
        "data": {
            "info": {"capacity": 9.9, "battery_capacity": 0, "status": status},
            "kpi": {"pac": 1520.0, "power": 12.4, "total_power": 8311.2,
                    "day_income": 24.8, "total_income": 16622.4}
        }
    })
}

fn states(rx: &mut tokio::sync::broadcast::Receiver<Arc<SinkEvent>>) -> Vec<(String, TypedValue)> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SinkEvent::State { update, .. } = &*event {
            out.push((update.channel_id.clone(), update.value.clone()));
        }
    }
    out
}

// ── Poll cycle ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_then_poll_publishes_states() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(DETAIL))
        .and(header_exists("token"))
        .and(body_partial_json(json!({"PowerStationId": "ps-42"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(detail(1)))
        .expect(1)
        .mount(&server)
        .await;

    let sink = BroadcastSink::new();
    let mut rx = sink.subscribe();
    let handler = handler_for(goodwe_config(&server), &sink);

    handler.initialize().await.unwrap();
    assert_eq!(handler.current_status(), ThingStatus::Online);
    handler.refresh().await.unwrap();

    let states = states(&mut rx);
    assert!(states.contains(&("pac".to_owned(), TypedValue::Number(1520.0))));
    assert!(states.contains(&("total_income".to_owned(), TypedValue::Number(16622.4))));
    assert!(sink.has_channel("goodwe-1", "capacity"));
    handler.dispose().await;
}

#[tokio::test]
async fn test_expired_session_reauthenticates_once() {
    let server = MockServer::start().await;
    mount_login(&server, 2).await;
    Mock::given(method("POST"))
        .and(path(DETAIL))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 100_002,
            "msg": AUTHORIZATION_EXPIRED,
            "data": null
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(DETAIL))
        .respond_with(ResponseTemplate::new(200).set_body_json(detail(1)))
        .expect(1)
        .mount(&server)
        .await;

    let sink = BroadcastSink::new();
    let handler = handler_for(goodwe_config(&server), &sink);
    handler.initialize().await.unwrap();
    handler.refresh().await.unwrap();

    assert_eq!(handler.current_status(), ThingStatus::Online);
    handler.dispose().await;
}

#[tokio::test]
async fn test_vendor_offline_marker_sets_offline_reason() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(DETAIL))
        .respond_with(ResponseTemplate::new(200).set_body_json(detail(-1)))
        .mount(&server)
        .await;

    let sink = BroadcastSink::new();
    let mut rx = sink.subscribe();
    let handler = handler_for(goodwe_config(&server), &sink);
    handler.initialize().await.unwrap();
    handler.refresh().await.unwrap();

    assert_eq!(handler.current_status(), ThingStatus::Offline("Status: -1".into()));
    assert!(states(&mut rx).is_empty());
    handler.dispose().await;
}

#[tokio::test]
async fn test_slow_vendor_times_out_and_recovers() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(DETAIL))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(detail(1))
                .set_delay(Duration::from_secs(3)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(DETAIL))
        .respond_with(ResponseTemplate::new(200).set_body_json(detail(1)))
        .mount(&server)
        .await;

    let sink = BroadcastSink::new();
    let handler = handler_for(goodwe_config(&server), &sink);
    handler.initialize().await.unwrap();

    handler.refresh().await.unwrap();
    assert_eq!(handler.current_status(), ThingStatus::Offline("Timeout".into()));

    handler.refresh().await.unwrap();
    assert_eq!(handler.current_status(), ThingStatus::Online);
    handler.dispose().await;
}

#[tokio::test]
async fn test_refused_login_is_a_configuration_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LOGIN))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let sink = BroadcastSink::new();
    let handler = handler_for(goodwe_config(&server), &sink);
    handler.initialize().await.unwrap();

    assert!(matches!(
        handler.current_status(),
        ThingStatus::ConfigurationError(_)
    ));
    handler.dispose().await;
}

// ── Discovery ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_discovery_reports_each_station_once() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(STATIONS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "msg": "",
            "data": {"list": [
                {"powerstation_id": "ps-1", "stationname": "Roof"},
                {"powerstation_id": "ps-2", "stationname": "Barn"},
                {"powerstation_id": "", "stationname": "Broken"}
            ]}
        })))
        .expect(2)
        .mount(&server)
        .await;

    let sink = BroadcastSink::new();
    let handler = handler_for(goodwe_config(&server), &sink);
    handler.initialize().await.unwrap();

    let first = handler.discover().await.unwrap();
    let names: Vec<&str> = first.iter().map(|d| d.display_name.as_str()).collect();
    assert_eq!(names, vec!["Roof", "Barn"]);
    assert_eq!(first[0].properties.get("id").map(String::as_str), Some("ps-1"));
    assert_eq!(first[0].device_type, "powerstation");

    assert!(handler.discover().await.unwrap().is_empty());
    handler.dispose().await;
}

// ── Static token vendor ─────────────────────────────────────────────

#[tokio::test]
async fn test_efergy_token_travels_as_query_parameter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/getCurrentValuesSummary"))
        .and(query_param("token", "app-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"cid": "PWER", "sid": "728386", "data": [{"1717243190000": 512}], "age": 4}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("token", "app-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sum": 1.5})))
        .mount(&server)
        .await;

    let mut config = ThingConfig::new("efergy-1", "efergy", Credentials::token("app-token"));
    config.base_url = Some(Url::parse(&server.uri()).unwrap());
    config.initial_delay = Duration::from_secs(3600);

    let sink = BroadcastSink::new();
    let mut rx = sink.subscribe();
    let handler = handler_for(config, &sink);
    handler.initialize().await.unwrap();
    handler.refresh().await.unwrap();

    let states = states(&mut rx);
    assert!(states.contains(&("instant_728386".to_owned(), TypedValue::Number(512.0))));
    assert!(states.contains(&("daytotal".to_owned(), TypedValue::Number(1.5))));
    handler.dispose().await;
}
