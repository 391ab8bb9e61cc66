#![allow(clippy::unwrap_used)]
// Integration tests for authenticated `VendorClient::fetch` using wiremock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cloudpoll_api::envelope::{Expected, FieldMatch, StatusCheck};
use cloudpoll_api::session::{ExpiryHint, SessionGrant};
use cloudpoll_api::{
    AuthScheme, Credentials, FetchError, Request, Session, TokenPlacement, VendorClient,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn client_for(server: &MockServer, scheme: AuthScheme) -> VendorClient {
    VendorClient::with_client(
        reqwest::Client::new(),
        Url::parse(&server.uri()).unwrap(),
        Arc::new(scheme),
        10,
    )
}

fn valid_session(token: &str) -> Session {
    let mut session = Session::new("acct");
    session.establish(SessionGrant {
        access_token: Some(SecretString::from(token.to_owned())),
        refresh_token: None,
        extras: BTreeMap::from([("uid".to_owned(), "u-9".to_owned())]),
        expiry: ExpiryHint::Never,
    });
    session
}

fn jablotron_like() -> AuthScheme {
    AuthScheme {
        expired_markers: vec![FieldMatch::new("status", Expected::Int(800))],
        envelope: Some(StatusCheck {
            path: "status",
            ok: vec![Expected::Int(200)],
            rejected: Vec::new(),
            message_path: None,
        }),
        ..AuthScheme::static_token(TokenPlacement::CookieJar)
    }
}

// ── Session gate ────────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_requires_valid_session() {
    let server = MockServer::start().await;
    let client = client_for(&server, jablotron_like());

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let session = Session::new("acct");
    let result = client.fetch(&session, &Request::get("status")).await;
    assert_eq!(result.unwrap_err(), FetchError::Unauthorized);
}

// ── Token placement ─────────────────────────────────────────────────

#[tokio::test]
async fn test_bearer_placement() {
    let server = MockServer::start().await;
    let client = client_for(&server, AuthScheme::static_token(TokenPlacement::Bearer));

    Mock::given(method("GET"))
        .and(path("/users/me/wallet"))
        .and(header("Authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"balance": 12.5})))
        .mount(&server)
        .await;

    let body = client
        .fetch(&valid_session("tok-1"), &Request::get("users/me/wallet"))
        .await
        .unwrap();
    assert_eq!(body, json!({"balance": 12.5}));
}

#[tokio::test]
async fn test_query_placement_from_static_token() {
    let server = MockServer::start().await;
    let client = client_for(&server, AuthScheme::static_token(TokenPlacement::Query("token")));

    Mock::given(method("GET"))
        .and(path("/getCurrentValuesSummary"))
        .and(query_param("token", "app-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let session = client.login(&Credentials::token("app-token")).await.unwrap();
    let body = client
        .fetch(&session, &Request::get("getCurrentValuesSummary"))
        .await
        .unwrap();
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_header_template_placement() {
    let server = MockServer::start().await;
    let client = client_for(
        &server,
        AuthScheme::static_token(TokenPlacement::HeaderTemplate {
            name: "token",
            template: r#"{"uid":"{uid}","token":"{token}"}"#,
        }),
    );

    Mock::given(method("POST"))
        .and(path("/v1/PowerStation/GetMonitorDetailByPowerstationId"))
        .and(header("token", r#"{"uid":"u-9","token":"tok-7"}"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
        .expect(1)
        .mount(&server)
        .await;

    client
        .fetch(
            &valid_session("tok-7"),
            &Request::post_json(
                "v1/PowerStation/GetMonitorDetailByPowerstationId",
                json!({"PowerStationId": "ps-1"}),
            ),
        )
        .await
        .unwrap();
}

// ── Expiry and envelope ─────────────────────────────────────────────

#[tokio::test]
async fn test_http_401_is_unauthorized() {
    let server = MockServer::start().await;
    let client = client_for(&server, AuthScheme::static_token(TokenPlacement::Bearer));

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = client.fetch(&valid_session("old"), &Request::get("x")).await;
    assert_eq!(result.unwrap_err(), FetchError::Unauthorized);
}

#[tokio::test]
async fn test_expired_marker_is_unauthorized() {
    let server = MockServer::start().await;
    let client = client_for(&server, jablotron_like());

    Mock::given(method("POST"))
        .and(path("/app/ja100/ajax/stav.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 800})))
        .mount(&server)
        .await;

    let request = Request::post_form("app/ja100/ajax/stav.php", Vec::new());
    let result = client.fetch(&valid_session("c"), &request).await;
    assert_eq!(result.unwrap_err(), FetchError::Unauthorized);
}

#[tokio::test]
async fn test_busy_envelope_is_invalid_response() {
    let server = MockServer::start().await;
    let client = client_for(&server, jablotron_like());

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 201})))
        .mount(&server)
        .await;

    let request = Request::post_form("app/ja100/ajax/stav.php", Vec::new());
    let result = client.fetch(&valid_session("c"), &request).await;
    assert!(matches!(result, Err(FetchError::InvalidResponse(_))));
}

#[tokio::test]
async fn test_server_error_is_communication_error() {
    let server = MockServer::start().await;
    let client = client_for(&server, jablotron_like());

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let result = client.fetch(&valid_session("c"), &Request::get("x")).await;
    assert_eq!(
        result.unwrap_err(),
        FetchError::CommunicationError("HTTP 503 Service Unavailable".into())
    );
}

#[tokio::test]
async fn test_fetch_timeout() {
    let server = MockServer::start().await;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let client = VendorClient::with_client(
        http,
        Url::parse(&server.uri()).unwrap(),
        Arc::new(jablotron_like()),
        1,
    );

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": 200}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let result = client.fetch(&valid_session("c"), &Request::get("x")).await;
    assert_eq!(result.unwrap_err(), FetchError::Timeout);
}

#[tokio::test]
async fn test_text_format_returns_raw_page() {
    let server = MockServer::start().await;
    let client = client_for(&server, jablotron_like());

    Mock::given(method("GET"))
        .and(path("/en/overview"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<div class=\"value\">1</div>"))
        .mount(&server)
        .await;

    let body = client
        .fetch(&valid_session("c"), &Request::get("en/overview").as_text())
        .await
        .unwrap();
    assert_eq!(body, json!("<div class=\"value\">1</div>"));
}
