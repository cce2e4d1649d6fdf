// Integration tests for `RestClient` using wiremock.
#![allow(clippy::unwrap_used)]

use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use goveelink_api::{Error, RestClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, RestClient) {
    let server = MockServer::start().await;
    let base = Url::parse(&format!("{}/", server.uri())).unwrap();
    let client = RestClient::with_client(reqwest::Client::new(), base, "test-client".into());
    (server, client)
}

// ── Happy-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_login_returns_account_session() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/account/rest/account/v1/login"))
        .and(header("clientId", "test-client"))
        .and(body_json(json!({
            "email": "user@example.com",
            "password": "hunter2",
            "client": "test-client"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 200,
            "message": "Login successful",
            "client": {
                "token": "tok-1",
                "refreshToken": "ref-1",
                "topic": "GA/account-topic",
                "tokenExpireCycle": 24,
                "accountId": 42
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = client
        .login("user@example.com", &SecretString::from("hunter2".to_owned()))
        .await
        .unwrap();

    assert_eq!(session.token, "tok-1");
    assert_eq!(session.refresh_token, "ref-1");
    assert_eq!(session.topic, "GA/account-topic");
    assert_eq!(session.token_expire_cycle, 24);
    assert_eq!(session.account_id, Some(42));
}

#[tokio::test]
async fn test_refresh_tokens_sends_bearer() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/account/rest/account/v1/refresh-tokens"))
        .and(header("authorization", "Bearer old-token"))
        .and(body_json(json!({ "refreshToken": "ref-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 200,
            "message": "",
            "data": {
                "token": "tok-2",
                "refreshToken": "ref-2",
                "tokenExpireCycle": 48
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refreshed = client.refresh_tokens("old-token", "ref-1").await.unwrap();
    assert_eq!(refreshed.token, "tok-2");
    assert_eq!(refreshed.refresh_token, "ref-2");
    assert_eq!(refreshed.token_expire_cycle, 48);
}

#[tokio::test]
async fn test_list_devices() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/device/rest/devices/v1/list"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 200,
            "message": "",
            "devices": [
                {
                    "device": "AA:BB:CC:DD:EE:FF:00:01",
                    "sku": "H6160",
                    "deviceName": "Shelf strip",
                    "deviceExt": {
                        "deviceSettings": "{\"topic\":\"GD/strip\",\"address\":\"A4:C1:38:00:00:01\"}",
                        "lastDeviceData": "",
                        "extResources": ""
                    }
                },
                {
                    "device": "AA:BB:CC:DD:EE:FF:00:02",
                    "sku": "H7141",
                    "deviceName": "Bedroom humidifier",
                    "deviceExt": {
                        "deviceSettings": "{\"topic\":\"GD/humid\"}",
                        "lastDeviceData": "",
                        "extResources": ""
                    }
                }
            ]
        })))
        .mount(&server)
        .await;

    let devices = client.list_devices("tok-1").await.unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].sku, "H6160");
    assert_eq!(devices[1].device_name, "Bedroom humidifier");
    let settings = devices[0].settings().unwrap();
    assert_eq!(settings.topic.as_deref(), Some("GD/strip"));
    assert_eq!(settings.address.as_deref(), Some("A4:C1:38:00:00:01"));
}

// ── Error-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_http_401_is_authentication_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/device/rest/devices/v1/list"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client.list_devices("stale").await.unwrap_err();
    assert!(matches!(err, Error::Authentication { .. }), "got {err:?}");
    assert!(err.is_auth_error());
}

#[tokio::test]
async fn test_body_status_is_checked() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/account/rest/account/v1/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 454,
            "message": "Incorrect password"
        })))
        .mount(&server)
        .await;

    let err = client
        .login("user@example.com", &SecretString::from("wrong".to_owned()))
        .await
        .unwrap_err();

    match err {
        Error::Api { status, message } => {
            assert_eq!(status, 454);
            assert_eq!(message, "Incorrect password");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/device/rest/devices/v1/list"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = client.list_devices("tok").await.unwrap_err();
    assert_eq!(err.status_code(), 502);
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_malformed_body_is_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/device/rest/devices/v1/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client.list_devices("tok").await.unwrap_err();
    match err {
        Error::Deserialization { body, .. } => assert_eq!(body, "not json"),
        other => panic!("expected Deserialization error, got {other:?}"),
    }
}
