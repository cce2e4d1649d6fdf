// ── REST session and device list ──
//
// Session policy on top of the raw `RestClient`: reuse a cached token while
// it is valid, otherwise refresh it or log in with credentials, persist the
// result, and announce it on the bus. Login failures become
// `REST.AUTHENTICATION.Failure` events and device-list failures
// `REST.RESPONSE.Failure`; nothing escapes the handler.

mod devices;

use std::sync::{Arc, Mutex};

use chrono::Utc;
use goveelink_api::RestClient;
use goveelink_api::rest::AppDevice;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, BusReceiver, EventBus, Topic};
use crate::error::CoreError;

pub use devices::{RestDeviceProcessor, device_config, device_configs};

const MILLIS_PER_HOUR: i64 = 3_600_000;

// ── Session data ─────────────────────────────────────────────────────

/// Persisted account session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthData {
    pub token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Epoch milliseconds.
    pub token_expiration: i64,
    #[serde(default, alias = "accountIoTTopic")]
    pub account_topic: String,
}

impl OAuthData {
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        !self.token.is_empty() && self.token_expiration > now_ms
    }
}

/// Status reported with an authentication failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiStatus {
    pub status: u16,
    pub message: String,
}

impl From<&CoreError> for ApiStatus {
    fn from(err: &CoreError) -> Self {
        Self {
            status: err.status(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

// ── Token persistence ────────────────────────────────────────────────

/// Where the session survives restarts.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<OAuthData>, CoreError>;

    fn save(&self, data: &OAuthData) -> Result<(), CoreError>;
}

/// Process-lifetime store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    data: Mutex<Option<OAuthData>>,
}

impl MemoryTokenStore {
    pub fn new(initial: Option<OAuthData>) -> Self {
        Self {
            data: Mutex::new(initial),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<OAuthData>, CoreError> {
        self.data
            .lock()
            .map(|d| d.clone())
            .map_err(|e| CoreError::TokenStore {
                message: e.to_string(),
            })
    }

    fn save(&self, data: &OAuthData) -> Result<(), CoreError> {
        let mut guard = self.data.lock().map_err(|e| CoreError::TokenStore {
            message: e.to_string(),
        })?;
        *guard = Some(data.clone());
        Ok(())
    }
}

// ── Authenticator ────────────────────────────────────────────────────

pub struct RestAuthenticator {
    client: RestClient,
    credentials: Credentials,
    store: Arc<dyn TokenStore>,
    session: Option<OAuthData>,
    bus: EventBus,
    inbox: BusReceiver,
}

impl RestAuthenticator {
    pub const INPUTS: &'static [Topic] = &[Topic::RestAuthenticate, Topic::RestRequestDevices];
    pub const OUTPUTS: &'static [Topic] = &[
        Topic::RestAuthenticated,
        Topic::RestAuthenticationFailure,
        Topic::RestRequestDevices,
        Topic::RestDeviceList,
        Topic::RestResponseFailure,
        Topic::IotSubscribe,
    ];

    pub fn new(
        client: RestClient,
        credentials: Credentials,
        store: Arc<dyn TokenStore>,
        bus: EventBus,
    ) -> Self {
        Self {
            client,
            credentials,
            store,
            session: None,
            inbox: bus.subscribe(Self::INPUTS),
            bus,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = self.inbox.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        BusEvent::RestAuthenticate { request_devices } => {
                            let _ = self.login(request_devices).await;
                        }
                        BusEvent::RestRequestDevices => {
                            let _ = self.get_devices().await;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Make sure a valid session exists and announce it.
    ///
    /// Every success publishes `REST.AUTHENTICATION.Authenticated`; only
    /// `request_devices` adds the device-list request. Failures are
    /// published as `REST.AUTHENTICATION.Failure` and returned.
    pub async fn login(&mut self, request_devices: bool) -> Result<OAuthData, CoreError> {
        match self.ensure_session().await {
            Ok(session) => {
                self.bus
                    .publish(BusEvent::IotSubscribe(session.account_topic.clone()));
                self.bus.publish(BusEvent::RestAuthenticated(session.clone()));
                if request_devices {
                    self.bus.publish(BusEvent::RestRequestDevices);
                }
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "authentication failed");
                self.bus
                    .publish(BusEvent::RestAuthenticationFailure(ApiStatus::from(&e)));
                Err(e)
            }
        }
    }

    /// Fetch the account's devices and publish them; login-gated.
    pub async fn get_devices(&mut self) -> Result<usize, CoreError> {
        let devices = self.fetch_devices().await?;
        let count = devices.len();
        self.bus.publish(BusEvent::RestDeviceList(Arc::new(devices)));
        Ok(count)
    }

    /// Fetch the account's devices without publishing them.
    ///
    /// A failed request after a good login publishes `REST.RESPONSE.Failure`.
    pub async fn fetch_devices(&mut self) -> Result<Vec<AppDevice>, CoreError> {
        let session = self.login(false).await?;
        match self.client.list_devices(&session.token).await {
            Ok(devices) => {
                info!(count = devices.len(), "device list received");
                Ok(devices)
            }
            Err(e) => {
                let err = CoreError::from(e);
                warn!(error = %err, "device list request failed");
                self.bus
                    .publish(BusEvent::RestResponseFailure(ApiStatus::from(&err)));
                Err(err)
            }
        }
    }

    /// Discard any cached session and log in with credentials.
    pub async fn relogin(&mut self) -> Result<OAuthData, CoreError> {
        let session = self.authenticate(Utc::now().timestamp_millis()).await?;
        self.store.save(&session)?;
        self.session = Some(session.clone());
        Ok(session)
    }

    async fn ensure_session(&mut self) -> Result<OAuthData, CoreError> {
        let now = Utc::now().timestamp_millis();
        if self.session.is_none() {
            self.session = self.store.load().unwrap_or_else(|e| {
                warn!(error = %e, "stored session unreadable, ignoring");
                None
            });
        }
        if let Some(session) = self.session.as_ref().filter(|s| s.is_valid_at(now)) {
            debug!("reusing cached session");
            return Ok(session.clone());
        }

        let session = match self.session.take().filter(|s| !s.refresh_token.is_empty()) {
            Some(previous) => match self.refresh(&previous, now).await {
                Err(e) if matches!(e, CoreError::AuthenticationFailed { .. }) => {
                    info!("refresh token rejected, logging in with credentials");
                    self.authenticate(now).await?
                }
                other => other?,
            },
            None => self.authenticate(now).await?,
        };

        if let Err(e) = self.store.save(&session) {
            warn!(error = %e, "failed to persist session");
        }
        self.session = Some(session.clone());
        Ok(session)
    }

    async fn authenticate(&self, now: i64) -> Result<OAuthData, CoreError> {
        info!(username = %self.credentials.username, "authenticating");
        let client = self
            .client
            .login(&self.credentials.username, &self.credentials.password)
            .await?;
        Ok(OAuthData {
            token: client.token,
            refresh_token: client.refresh_token,
            token_expiration: now + client.token_expire_cycle * MILLIS_PER_HOUR,
            account_topic: client.topic,
        })
    }

    async fn refresh(&self, previous: &OAuthData, now: i64) -> Result<OAuthData, CoreError> {
        debug!("refreshing token");
        let refreshed = self
            .client
            .refresh_tokens(&previous.token, &previous.refresh_token)
            .await?;
        Ok(OAuthData {
            token: refreshed.token,
            refresh_token: refreshed.refresh_token,
            token_expiration: now + refreshed.token_expire_cycle * MILLIS_PER_HOUR,
            account_topic: previous.account_topic.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use goveelink_api::TransportConfig;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const WATCHED: &[Topic] = &[
        Topic::RestAuthenticated,
        Topic::RestAuthenticationFailure,
        Topic::RestRequestDevices,
        Topic::RestDeviceList,
        Topic::RestResponseFailure,
        Topic::IotSubscribe,
    ];

    fn credentials() -> Credentials {
        Credentials {
            username: "user@example.com".into(),
            password: SecretString::from("hunter2".to_owned()),
        }
    }

    fn authenticator(
        server: &MockServer,
        store: Arc<MemoryTokenStore>,
        bus: &EventBus,
    ) -> RestAuthenticator {
        let client = RestClient::new(&server.uri(), "test-client".into(), &TransportConfig::default())
            .unwrap();
        RestAuthenticator::new(client, credentials(), store, bus.clone())
    }

    async fn mount_login(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/account/rest/account/v1/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 200,
                "message": "Login successful",
                "client": {
                    "token": "tok-1",
                    "refreshToken": "ref-1",
                    "topic": "GA/account",
                    "tokenExpireCycle": 24
                }
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    fn topics(events: &[BusEvent]) -> Vec<Topic> {
        events.iter().map(BusEvent::topic).collect()
    }

    #[tokio::test]
    async fn credential_login_persists_and_announces() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        let store = Arc::new(MemoryTokenStore::default());
        let bus = EventBus::new();
        let mut rx = bus.subscribe(WATCHED);
        let mut auth = authenticator(&server, Arc::clone(&store), &bus);

        let session = auth.login(true).await.unwrap();

        assert_eq!(session.token, "tok-1");
        assert_eq!(session.account_topic, "GA/account");
        assert!(session.token_expiration > Utc::now().timestamp_millis());
        assert_eq!(store.load().unwrap().unwrap(), session);
        assert_eq!(
            topics(&rx.drain()),
            vec![
                Topic::IotSubscribe,
                Topic::RestAuthenticated,
                Topic::RestRequestDevices
            ]
        );
    }

    #[tokio::test]
    async fn login_without_device_request_still_announces_session() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/device/rest/devices/v1/list"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let bus = EventBus::new();
        let mut rx = bus.subscribe(WATCHED);
        let mut auth = authenticator(&server, Arc::new(MemoryTokenStore::default()), &bus);

        auth.login(false).await.unwrap();

        let events = rx.drain();
        assert_eq!(
            topics(&events),
            vec![Topic::IotSubscribe, Topic::RestAuthenticated]
        );
        let BusEvent::RestAuthenticated(session) = &events[1] else {
            panic!("unexpected {:?}", events[1]);
        };
        assert_eq!(session.account_topic, "GA/account");
    }

    #[tokio::test]
    async fn valid_cached_token_skips_network() {
        let server = MockServer::start().await;
        mount_login(&server, 0).await;
        let cached = OAuthData {
            token: "cached".into(),
            refresh_token: "ref".into(),
            token_expiration: Utc::now().timestamp_millis() + MILLIS_PER_HOUR,
            account_topic: "GA/account".into(),
        };
        let store = Arc::new(MemoryTokenStore::new(Some(cached.clone())));
        let bus = EventBus::new();
        let mut auth = authenticator(&server, store, &bus);

        assert_eq!(auth.login(false).await.unwrap(), cached);
    }

    #[tokio::test]
    async fn relogin_ignores_valid_cached_token() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        let cached = OAuthData {
            token: "cached".into(),
            refresh_token: "ref".into(),
            token_expiration: Utc::now().timestamp_millis() + MILLIS_PER_HOUR,
            account_topic: "GA/account".into(),
        };
        let store = Arc::new(MemoryTokenStore::new(Some(cached)));
        let bus = EventBus::new();
        let mut auth = authenticator(&server, store.clone(), &bus);

        let session = auth.relogin().await.unwrap();

        assert_eq!(session.token, "tok-1");
        assert_eq!(store.load().unwrap().unwrap().token, "tok-1");
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_keeping_topic() {
        let server = MockServer::start().await;
        mount_login(&server, 0).await;
        Mock::given(method("POST"))
            .and(path("/account/rest/account/v1/refresh-tokens"))
            .and(header("authorization", "Bearer old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 200,
                "message": "",
                "data": {"token": "new", "refreshToken": "ref-2", "tokenExpireCycle": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;
        let store = Arc::new(MemoryTokenStore::new(Some(OAuthData {
            token: "old".into(),
            refresh_token: "ref-1".into(),
            token_expiration: 0,
            account_topic: "GA/account".into(),
        })));
        let bus = EventBus::new();
        let mut auth = authenticator(&server, Arc::clone(&store), &bus);

        let session = auth.login(false).await.unwrap();

        assert_eq!(session.token, "new");
        assert_eq!(session.refresh_token, "ref-2");
        assert_eq!(session.account_topic, "GA/account");
        assert_eq!(store.load().unwrap().unwrap().token, "new");
    }

    #[tokio::test]
    async fn rejected_login_publishes_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/account/rest/account/v1/login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let bus = EventBus::new();
        let mut rx = bus.subscribe(WATCHED);
        let mut auth = authenticator(&server, Arc::new(MemoryTokenStore::default()), &bus);

        let err = auth.login(true).await.unwrap_err();

        assert!(matches!(err, CoreError::AuthenticationFailed { .. }));
        let events = rx.drain();
        assert_eq!(events.len(), 1);
        let BusEvent::RestAuthenticationFailure(status) = &events[0] else {
            panic!("unexpected {:?}", events[0]);
        };
        assert_eq!(status.status, 401);
    }

    #[tokio::test]
    async fn device_list_is_login_gated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/account/rest/account/v1/login"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/device/rest/devices/v1/list"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let bus = EventBus::new();
        let mut rx = bus.subscribe(WATCHED);
        let mut auth = authenticator(&server, Arc::new(MemoryTokenStore::default()), &bus);

        assert!(auth.get_devices().await.is_err());
        assert_eq!(topics(&rx.drain()), vec![Topic::RestAuthenticationFailure]);
    }

    #[tokio::test]
    async fn failed_device_list_publishes_response_failure() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/device/rest/devices/v1/list"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let bus = EventBus::new();
        let mut rx = bus.subscribe(WATCHED);
        let mut auth = authenticator(&server, Arc::new(MemoryTokenStore::default()), &bus);

        assert!(auth.get_devices().await.is_err());

        let events = rx.drain();
        assert_eq!(
            topics(&events),
            vec![
                Topic::IotSubscribe,
                Topic::RestAuthenticated,
                Topic::RestResponseFailure
            ]
        );
        let BusEvent::RestResponseFailure(status) = &events[2] else {
            panic!("unexpected {:?}", events[2]);
        };
        assert_eq!(status.status, 500);
    }

    #[tokio::test]
    async fn device_list_is_published() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/device/rest/devices/v1/list"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 200,
                "message": "",
                "devices": [{
                    "device": "AA:BB",
                    "sku": "H6160",
                    "deviceName": "Strip",
                    "deviceExt": {"deviceSettings": "{}", "lastDeviceData": "", "extResources": ""}
                }]
            })))
            .mount(&server)
            .await;
        let bus = EventBus::new();
        let mut rx = bus.subscribe(&[Topic::RestDeviceList]);
        let mut auth = authenticator(&server, Arc::new(MemoryTokenStore::default()), &bus);

        assert_eq!(auth.get_devices().await.unwrap(), 1);
        let Some(BusEvent::RestDeviceList(devices)) = rx.try_recv() else {
            panic!("expected device list");
        };
        assert_eq!(devices[0].sku, "H6160");
    }

    #[test]
    fn session_validity_needs_token_and_future_expiry() {
        let session = OAuthData {
            token: "t".into(),
            token_expiration: 1_000,
            ..OAuthData::default()
        };
        assert!(session.is_valid_at(999));
        assert!(!session.is_valid_at(1_000));
        assert!(!OAuthData::default().is_valid_at(0));
    }
}
