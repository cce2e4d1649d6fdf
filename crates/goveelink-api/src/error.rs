use thiserror::Error;

/// Top-level error type for the `goveelink-api` crate.
///
/// Covers every failure mode across the three device transports:
/// the account REST API, the IoT MQTT broker, and local BLE.
/// `goveelink-core` maps these into bridge-level errors and bus events.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login or token refresh rejected (wrong credentials, revoked refresh token).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS material could not be loaded or the client could not be built.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Local file access (certificates, keys).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── REST API ────────────────────────────────────────────────────
    /// Non-success status, either from HTTP or the `{status, message}` body envelope.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    // ── MQTT ────────────────────────────────────────────────────────
    /// A subscribe/unsubscribe/publish request could not be queued.
    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// The MQTT event loop reported a connection failure.
    #[error("MQTT connection error: {0}")]
    MqttConnection(String),

    // ── BLE ─────────────────────────────────────────────────────────
    /// Error surfaced by the platform Bluetooth stack.
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No Bluetooth adapter (or none matching the configured name).
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    /// The address has not been seen by the scanner.
    #[error("Peripheral {0} not found")]
    PeripheralNotFound(String),

    /// The peripheral is missing the Govee control characteristic.
    #[error("Characteristic {uuid} not found on {address}")]
    CharacteristicNotFound { address: String, uuid: String },

    /// Connecting to a peripheral did not finish in time.
    #[error("Timed out connecting to {address} after {timeout_secs}s")]
    ConnectTimeout { address: String, timeout_secs: u64 },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the credentials or tokens were rejected and
    /// a fresh login might resolve it.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::Api { status: 401, .. }
        )
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::MqttConnection(_) | Self::ConnectTimeout { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Status code to report for this failure.
    ///
    /// HTTP/body statuses pass through; auth failures map to 401 and
    /// everything without a status maps to 0.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Api { status, .. } => *status,
            Self::Authentication { .. } => 401,
            Self::Transport(e) => e.status().map_or(0, |s| s.as_u16()),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_api_status_is_auth_error() {
        let err = Error::Api {
            status: 401,
            message: "token expired".into(),
        };
        assert!(err.is_auth_error());
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn server_errors_are_transient() {
        let err = Error::Api {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_transient());
        assert!(!err.is_auth_error());
    }

    #[test]
    fn missing_peripheral_has_no_status() {
        let err = Error::PeripheralNotFound("A4:C1:38:00:00:01".into());
        assert_eq!(err.status_code(), 0);
        assert!(!err.is_transient());
    }
}
