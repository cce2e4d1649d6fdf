// Govee app REST client
//
// Wraps `reqwest::Client` with the account and device-list endpoints, the
// `clientId` header, and `{status, message}` envelope checking. Session
// policy (token caching, refresh vs. login) lives in goveelink-core.

pub mod models;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

pub use models::{
    ApiEnvelope, AppDevice, AppDeviceData, AppDeviceSettings, DeviceExtension, LoginClient,
    TokenRefresh,
};
use models::{
    DeviceListPayload, LoginPayload, LoginRequest, TokenRefreshPayload, TokenRefreshRequest,
};

/// Production API root.
pub const DEFAULT_BASE_URL: &str = "https://app2.govee.com/";

const ACCOUNT_PATH: &str = "account/rest/account/v1";
const DEVICE_PATH: &str = "device/rest/devices/v1";

/// Raw HTTP client for the Govee app API.
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    client_id: String,
}

impl RestClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// `base_url` is the API root (normally [`DEFAULT_BASE_URL`]); a missing
    /// trailing slash is added so relative joins keep the full path.
    pub fn new(base_url: &str, client_id: String, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, parse_base_url(base_url)?, client_id))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url, client_id: String) -> Self {
        Self {
            http,
            base_url,
            client_id,
        }
    }

    /// The API root URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Credential login. Returns the session, including the account topic.
    pub async fn login(&self, username: &str, password: &SecretString) -> Result<LoginClient, Error> {
        let url = self.url(ACCOUNT_PATH, "login")?;
        let body = LoginRequest {
            email: username,
            password: password.expose_secret(),
            client: &self.client_id,
        };

        let payload: LoginPayload = self.post(url, None, &body).await.map_err(|e| match e {
            Error::Api { status: 401, message } => Error::Authentication { message },
            other => other,
        })?;
        debug!("login succeeded");
        Ok(payload.client)
    }

    /// Exchange a refresh token for a new token pair.
    pub async fn refresh_tokens(&self, token: &str, refresh_token: &str) -> Result<TokenRefresh, Error> {
        let url = self.url(ACCOUNT_PATH, "refresh-tokens")?;
        let body = TokenRefreshRequest { refresh_token };

        let payload: TokenRefreshPayload = self.post(url, Some(token), &body).await?;
        Ok(payload.data)
    }

    /// List all devices registered to the account.
    pub async fn list_devices(&self, token: &str) -> Result<Vec<AppDevice>, Error> {
        let url = self.url(DEVICE_PATH, "list")?;
        let payload: DeviceListPayload = self
            .post(url, Some(token), &serde_json::json!({}))
            .await?;
        debug!(count = payload.devices.len(), "device list received");
        Ok(payload.devices)
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn url(&self, prefix: &str, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(&format!("{prefix}/{path}"))?)
    }

    /// POST a JSON body and unwrap the envelope.
    async fn post<T: DeserializeOwned>(
        &self,
        url: Url,
        token: Option<&str>,
        body: &impl Serialize,
    ) -> Result<T, Error> {
        debug!("POST {}", url);

        let mut request = self
            .http
            .post(url)
            .header("clientId", &self.client_id)
            .json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await.map_err(Error::Transport)?;
        parse_envelope(resp).await
    }
}

/// Parse the `{ status, message, ... }` envelope, returning the payload on
/// success. Both the HTTP status and the body status must be 200.
async fn parse_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication {
            message: "token expired or invalid credentials".into(),
        });
    }

    let body = resp.text().await.map_err(Error::Transport)?;

    if !status.is_success() {
        return Err(Error::Api {
            status: status.as_u16(),
            message: body,
        });
    }

    let envelope: ApiEnvelope<serde_json::Value> =
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.clone(),
        })?;

    if envelope.status != 200 {
        return Err(Error::Api {
            status: envelope.status,
            message: envelope.message,
        });
    }

    serde_json::from_value(envelope.payload).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}

fn parse_base_url(raw: &str) -> Result<Url, Error> {
    if raw.ends_with('/') {
        Ok(Url::parse(raw)?)
    } else {
        Ok(Url::parse(&format!("{raw}/"))?)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let url = parse_base_url("http://127.0.0.1:9000/api").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/api/");
        let joined = url.join("account/rest/account/v1/login").unwrap();
        assert_eq!(
            joined.as_str(),
            "http://127.0.0.1:9000/api/account/rest/account/v1/login"
        );
    }

    #[test]
    fn default_base_url_parses() {
        let url = parse_base_url(DEFAULT_BASE_URL).unwrap();
        assert_eq!(url.host_str(), Some("app2.govee.com"));
    }
}
