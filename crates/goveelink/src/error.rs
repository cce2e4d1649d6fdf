//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use goveelink_config::ConfigError;
use goveelink_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the Govee account API")]
    #[diagnostic(
        code(goveelink::connection_failed),
        help("Check network access. Override the endpoint with `api_url` if needed.")
    )]
    ConnectionFailed { reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(goveelink::auth_failed),
        help("Verify `username` and `password` in the config, then run: goveelink login")
    )]
    AuthFailed { message: String },

    #[error("No credentials configured")]
    #[diagnostic(
        code(goveelink::no_credentials),
        help(
            "Set `username` and `password` in {path}\n\
             or export GOVEELINK_USERNAME and GOVEELINK_PASSWORD."
        )
    )]
    NoCredentials { path: String },

    #[error("{device_id} has no live transport after {secs}s")]
    #[diagnostic(
        code(goveelink::unreachable),
        help("Check that the device is powered and in BLE range, or that the cloud transport is configured.")
    )]
    Unreachable { device_id: String, secs: u64 },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error ({status}): {message}")]
    #[diagnostic(code(goveelink::api_error))]
    ApiError { status: u16, message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(goveelink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration could not be loaded")]
    #[diagnostic(code(goveelink::config), help("{detail}"))]
    Config { detail: String },

    #[error(transparent)]
    #[diagnostic(code(goveelink::bridge))]
    Bridge(CoreError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(goveelink::json))]
    Json(#[from] serde_json::Error),

    #[error("Failed to render config: {0}")]
    #[diagnostic(code(goveelink::toml))]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Unreachable { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Validation { .. } | Self::Config { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthenticationFailed { message, .. } => CliError::AuthFailed { message },
            CoreError::TransportUnavailable { reason } | CoreError::Timeout { reason } => {
                CliError::ConnectionFailed { reason }
            }
            CoreError::Api { status, message } => CliError::ApiError { status, message },
            CoreError::Config { message } => CliError::Config { detail: message },
            other => CliError::Bridge(other),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials => CliError::NoCredentials {
                path: goveelink_config::config_path().display().to_string(),
            },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                detail: other.to_string(),
            },
        }
    }
}
