// ── Core error types ──
//
// Bridge-level errors from goveelink-core. Consumers never see raw HTTP
// statuses, MQTT client errors, or btleplug failures directly; the
// `From<goveelink_api::Error>` impl folds them into domain variants.

use thiserror::Error;

/// Frame encoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Opcode, identifier and values do not fit in the 19 payload bytes.
    #[error("frame payload is {len} bytes, at most {max} fit before the checksum")]
    Overflow { len: usize, max: usize },
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Authentication failed (status {status}): {message}")]
    AuthenticationFailed { status: u16, message: String },

    #[error("Transport unavailable: {reason}")]
    TransportUnavailable { reason: String },

    #[error("Connection timed out: {reason}")]
    Timeout { reason: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    #[error("Unknown device model: {model}")]
    UnknownModel { model: String },

    #[error("Malformed payload: {message}")]
    Protocol { message: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Device {device_id} does not support {capability}")]
    Unsupported {
        device_id: String,
        capability: &'static str,
    },

    #[error("Device {device_id} has no BLE address or IoT topic")]
    NoTransport { device_id: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    // ── Configuration / persistence ──────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Token store error: {message}")]
    TokenStore { message: String },
}

impl CoreError {
    /// Status code carried by auth and API failures; 0 otherwise.
    pub fn status(&self) -> u16 {
        match self {
            Self::AuthenticationFailed { status, .. } | Self::Api { status, .. } => *status,
            _ => 0,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<goveelink_api::Error> for CoreError {
    fn from(err: goveelink_api::Error) -> Self {
        let status = err.status_code();
        match err {
            goveelink_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { status, message }
            }
            goveelink_api::Error::Api { status: 401, message } => {
                CoreError::AuthenticationFailed { status: 401, message }
            }
            goveelink_api::Error::Api { status, message } => CoreError::Api { status, message },
            goveelink_api::Error::Transport(ref e) if e.is_timeout() => CoreError::Timeout {
                reason: e.to_string(),
            },
            goveelink_api::Error::ConnectTimeout { address, timeout_secs } => CoreError::Timeout {
                reason: format!("BLE connect to {address} exceeded {timeout_secs}s"),
            },
            goveelink_api::Error::Transport(e) => CoreError::TransportUnavailable {
                reason: e.to_string(),
            },
            goveelink_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            goveelink_api::Error::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            goveelink_api::Error::Io(e) => CoreError::Config {
                message: e.to_string(),
            },
            goveelink_api::Error::Deserialization { message, body: _ } => {
                CoreError::Protocol { message }
            }
            goveelink_api::Error::NoAdapter => CoreError::TransportUnavailable {
                reason: "no Bluetooth adapter".into(),
            },
            other @ (goveelink_api::Error::Mqtt(_)
            | goveelink_api::Error::MqttConnection(_)
            | goveelink_api::Error::Ble(_)
            | goveelink_api::Error::PeripheralNotFound(_)
            | goveelink_api::Error::CharacteristicNotFound { .. }) => {
                CoreError::TransportUnavailable {
                    reason: other.to_string(),
                }
            }
        }
    }
}
