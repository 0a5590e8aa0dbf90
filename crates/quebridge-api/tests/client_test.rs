// Integration tests for `CloudClient` and `ResilientTransport` using wiremock.
#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quebridge_api::{
    CircuitPosition, CloudApi, CloudClient, Error, PairingRequest, TokenSource, TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

/// Token source that hands out `old` until forced, then `new`.
#[derive(Default)]
struct RotatingToken {
    refreshes: AtomicU32,
}

#[async_trait]
impl TokenSource for RotatingToken {
    async fn bearer(&self) -> Option<SecretString> {
        let token = if self.refreshes.load(Ordering::SeqCst) == 0 {
            "old"
        } else {
            "new"
        };
        Some(SecretString::from(token))
    }

    async fn force_refresh(&self) -> Option<SecretString> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Some(SecretString::from("new"))
    }
}

fn fast_transport() -> TransportConfig {
    TransportConfig {
        timeout: Duration::from_secs(5),
        max_transient_retries: 3,
        retry_delays: vec![Duration::from_millis(5)],
        breaker_threshold: 5,
        breaker_cooldown: Duration::from_secs(30),
        ..TransportConfig::default()
    }
}

async fn setup_with(config: TransportConfig) -> (MockServer, CloudClient) {
    let server = MockServer::start().await;
    let client = CloudClient::from_reqwest(&server.uri(), reqwest::Client::new(), config).unwrap();
    (server, client)
}

async fn setup() -> (MockServer, CloudClient) {
    setup_with(fast_transport()).await
}

fn status_body() -> serde_json::Value {
    json!({ "lastKnownState": { "UserAirconSettings": { "isOn": true } } })
}

// ── Authentication exchanges ────────────────────────────────────────

#[tokio::test]
async fn test_exchange_pairing_posts_form_and_reads_token() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v0/client/user-devices"))
        .and(body_string_contains("username=alice"))
        .and(body_string_contains("client=ios"))
        .and(body_string_contains("deviceUniqueIdentifier=1234"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "pairingToken": "pt-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let token = client
        .exchange_pairing(&PairingRequest {
            username: "alice".into(),
            password: SecretString::from("hunter2"),
            device_name: "quebridge".into(),
            device_id: "1234".into(),
        })
        .await
        .unwrap();

    assert_eq!(token.expose_secret(), "pt-1");
}

#[tokio::test]
async fn test_exchange_bearer_accepts_string_expiry() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v0/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=pt-1"))
        .and(body_string_contains("client_id=app"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "bearer-1", "expires_in": "1800" })),
        )
        .mount(&server)
        .await;

    let grant = client
        .exchange_bearer(&SecretString::from("pt-1"))
        .await
        .unwrap();

    assert_eq!(grant.access_token.expose_secret(), "bearer-1");
    assert_eq!(grant.expires_in_secs, 1800);
}

#[tokio::test]
async fn test_exchange_bearer_defaults_expiry() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v0/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "b" })))
        .mount(&server)
        .await;

    let grant = client
        .exchange_bearer(&SecretString::from("pt"))
        .await
        .unwrap();
    assert_eq!(grant.expires_in_secs, 3600);
}

#[tokio::test]
async fn test_exchange_bearer_maps_400_and_401() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v0/oauth/token"))
        .and(body_string_contains("refresh_token=revoked"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v0/oauth/token"))
        .and(body_string_contains("refresh_token=garbled"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
        .mount(&server)
        .await;

    let revoked = client
        .exchange_bearer(&SecretString::from("revoked"))
        .await
        .unwrap_err();
    assert!(revoked.is_unauthorized());

    let garbled = client
        .exchange_bearer(&SecretString::from("garbled"))
        .await
        .unwrap_err();
    assert!(garbled.is_bad_request());
}

// ── Authorized reads ────────────────────────────────────────────────

#[tokio::test]
async fn test_list_units_reads_embedded_systems() {
    let (server, client) = setup().await;
    let token = RotatingToken::default();

    Mock::given(method("GET"))
        .and(path("/api/v0/client/ac-systems"))
        .and(query_param("includeAcms", "true"))
        .and(header("Authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_embedded": { "ac-system": [
                { "serial": "S1", "description": "Upstairs ", "type": "que" },
                { "serial": "S2", "description": "Downstairs", "type": "que" }
            ]}
        })))
        .mount(&server)
        .await;

    let units = client.list_units(&token).await.unwrap();
    assert_eq!(units.len(), 2);
    assert_eq!(units[0].serial, "S1");
    assert_eq!(units[1].description, "Downstairs");
}

#[tokio::test]
async fn test_fetch_events_orders_oldest_first_and_strips_cursor() {
    let (server, client) = setup().await;
    let token = RotatingToken::default();

    Mock::given(method("GET"))
        .and(path("/api/v0/client/ac-systems/events/latest"))
        .and(query_param("serial", "S1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_links": { "ac-newer-events": { "href": "/api/v0/client/ac-systems/events/newer?serial=S1&newerThanEventId=9" } },
            "events": [
                { "type": "status-change-broadcast", "data": { "UserAirconSettings.Mode": "HEAT" } },
                { "type": "status-change-broadcast", "data": { "UserAirconSettings.Mode": "COOL" } }
            ]
        })))
        .mount(&server)
        .await;

    let page = client.fetch_events(&token, "S1", None).await.unwrap();

    assert_eq!(
        page.next_cursor.as_deref(),
        Some("api/v0/client/ac-systems/events/newer?serial=S1&newerThanEventId=9")
    );
    assert_eq!(page.events[0].data["UserAirconSettings.Mode"], json!("COOL"));
    assert_eq!(page.events[1].data["UserAirconSettings.Mode"], json!("HEAT"));
    assert!(page.events[0].is_status_change());
}

#[tokio::test]
async fn test_send_command_wraps_fields() {
    let (server, client) = setup().await;
    let token = RotatingToken::default();

    Mock::given(method("POST"))
        .and(path("/api/v0/client/ac-systems/cmds/send"))
        .and(query_param("serial", "S1"))
        .and(body_json(json!({
            "command": { "UserAirconSettings.AwayMode": true, "type": "set-settings" }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut fields = IndexMap::new();
    fields.insert("UserAirconSettings.AwayMode".to_string(), json!(true));
    client.send_command(&token, "S1", &fields).await.unwrap();
}

// ── Resilience ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_401_refreshes_once_and_retries_with_new_token() {
    let (server, client) = setup().await;
    let token = RotatingToken::default();

    Mock::given(method("GET"))
        .and(path("/api/v0/client/ac-systems/status/latest"))
        .and(header("Authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v0/client/ac-systems/status/latest"))
        .and(header("Authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body()))
        .expect(1)
        .mount(&server)
        .await;

    let state = client.fetch_status(&token, "S1").await.unwrap();
    assert_eq!(state["UserAirconSettings"]["isOn"], json!(true));
    assert_eq!(token.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_401_fails_without_third_attempt() {
    let (server, client) = setup().await;
    let token = RotatingToken::default();

    Mock::given(method("GET"))
        .and(path("/api/v0/client/ac-systems/status/latest"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let err = client.fetch_status(&token, "S1").await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized));
    assert_eq!(token.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transient_5xx_is_retried() {
    let (server, client) = setup().await;
    let token = RotatingToken::default();

    Mock::given(method("GET"))
        .and(path("/api/v0/client/ac-systems/status/latest"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v0/client/ac-systems/status/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body()))
        .expect(1)
        .mount(&server)
        .await;

    let state = client.fetch_status(&token, "S1").await.unwrap();
    assert_eq!(state["UserAirconSettings"]["isOn"], json!(true));
    assert_eq!(token.refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let (server, client) = setup().await;
    let token = RotatingToken::default();

    Mock::given(method("GET"))
        .and(path("/api/v0/client/ac-systems/status/latest"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&server)
        .await;

    let err = client.fetch_status(&token, "S1").await.unwrap_err();
    assert!(matches!(err, Error::Status { status: 500, .. }));
}

#[tokio::test]
async fn test_404_is_not_retried() {
    let (server, client) = setup().await;
    let token = RotatingToken::default();

    Mock::given(method("POST"))
        .and(path("/api/v0/client/ac-systems/cmds/send"))
        .respond_with(ResponseTemplate::new(404).set_body_string("unknown serial"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client
        .send_command(&token, "BOGUS", &IndexMap::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_breaker_opens_and_fails_fast() {
    let (server, client) = setup_with(TransportConfig {
        max_transient_retries: 0,
        breaker_threshold: 2,
        ..fast_transport()
    })
    .await;
    let token = RotatingToken::default();

    Mock::given(method("GET"))
        .and(path("/api/v0/client/ac-systems/status/latest"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    assert!(client.fetch_status(&token, "S1").await.is_err());
    assert!(client.fetch_status(&token, "S1").await.is_err());
    assert_eq!(client.transport().circuit_position(), CircuitPosition::Open);

    let err = client.fetch_status(&token, "S1").await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }));
}

#[tokio::test]
async fn test_client_errors_do_not_trip_breaker() {
    let (server, client) = setup_with(TransportConfig {
        breaker_threshold: 1,
        ..fast_transport()
    })
    .await;
    let token = RotatingToken::default();

    Mock::given(method("GET"))
        .and(path("/api/v0/client/ac-systems/status/latest"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    for _ in 0..3 {
        assert!(client.fetch_status(&token, "S1").await.unwrap_err().is_not_found());
    }
    assert_eq!(client.transport().circuit_position(), CircuitPosition::Closed);
}
