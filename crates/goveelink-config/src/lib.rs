//! Shared configuration for the goveelink bridge.
//!
//! TOML config + `GOVEELINK_` environment overrides, translation to
//! `goveelink_core::BridgeConfig`, and the on-disk session file
//! ([`FileTokenStore`]). Core never reads files itself.

mod token;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use goveelink_api::{BleSettings, IotConfig, RetryPolicy, TransportConfig};
use goveelink_core::{BridgeConfig, Connections, Credentials};

pub use token::FileTokenStore;

const ENV_PREFIX: &str = "GOVEELINK_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured (set `username` and `password`)")]
    NoCredentials,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("token file is corrupt: {0}")]
    Token(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Govee account e-mail.
    pub username: Option<String>,

    /// Account password (plaintext; prefer `GOVEELINK_PASSWORD`).
    pub password: Option<String>,

    /// Identifier sent to the account API and the broker. Generated per
    /// run when unset.
    pub client_id: Option<String>,

    /// Override of the account API root.
    pub api_url: Option<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub connections: ConnectionsConfig,

    #[serde(default)]
    pub iot: IotSection,

    #[serde(default)]
    pub ble: BleSection,

    #[serde(default)]
    pub devices: DevicesSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            client_id: None,
            api_url: None,
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_timeout(),
            connections: ConnectionsConfig::default(),
            iot: IotSection::default(),
            ble: BleSection::default(),
            devices: DevicesSection::default(),
        }
    }
}

fn default_poll_interval() -> u64 {
    10
}
fn default_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionsConfig {
    #[serde(default = "default_true")]
    pub api: bool,
    #[serde(default = "default_true")]
    pub iot: bool,
    #[serde(default = "default_true")]
    pub ble: bool,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            api: true,
            iot: true,
            ble: true,
        }
    }
}

/// Broker endpoint and mutual-TLS material.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IotSection {
    pub host: Option<String>,
    #[serde(default = "default_iot_port")]
    pub port: u16,
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

impl Default for IotSection {
    fn default() -> Self {
        Self {
            host: None,
            port: default_iot_port(),
            ca_cert: None,
            client_cert: None,
            client_key: None,
            keep_alive_secs: default_keep_alive(),
        }
    }
}

fn default_iot_port() -> u16 {
    8883
}
fn default_keep_alive() -> u64 {
    60
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BleSection {
    /// Adapter name substring; the first adapter when unset.
    pub adapter: Option<String>,
    #[serde(default)]
    pub inspect_services: bool,
    pub connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DevicesSection {
    /// Device ids to leave out of the registry.
    #[serde(default)]
    pub ignore: Vec<String>,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "goveelink", "goveelink")
}

fn dirs_fallback(kind: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(kind);
    p.push("goveelink");
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Where the account session is persisted.
pub fn token_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback(".local/share").join("auth.json"),
        |dirs| dirs.data_dir().join("auth.json"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Nested keys use a double underscore: `GOVEELINK_IOT__HOST`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Account credentials from the loaded config.
pub fn resolve_credentials(cfg: &Config) -> Result<Credentials, ConfigError> {
    match (&cfg.username, &cfg.password) {
        (Some(username), Some(password)) if !username.is_empty() => Ok(Credentials {
            username: username.clone(),
            password: SecretString::from(password.clone()),
        }),
        _ => Err(ConfigError::NoCredentials),
    }
}

fn resolve_iot(cfg: &Config, client_id: &str) -> Result<Option<IotConfig>, ConfigError> {
    let section = &cfg.iot;
    let (Some(host), Some(ca_cert), Some(client_cert), Some(client_key)) = (
        section.host.as_ref(),
        section.ca_cert.as_ref(),
        section.client_cert.as_ref(),
        section.client_key.as_ref(),
    ) else {
        if cfg.connections.iot {
            tracing::info!("IoT host or certificates not configured, cloud transport disabled");
        }
        return Ok(None);
    };
    if host.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "iot.host".into(),
            reason: "must not be empty".into(),
        });
    }

    Ok(Some(IotConfig {
        host: host.clone(),
        port: section.port,
        client_id: client_id.to_owned(),
        ca_cert: ca_cert.clone(),
        client_cert: client_cert.clone(),
        client_key: client_key.clone(),
        keep_alive: Duration::from_secs(section.keep_alive_secs),
        retry: RetryPolicy::default(),
    }))
}

/// Build a `BridgeConfig` from the loaded config.
pub fn to_bridge_config(cfg: &Config) -> Result<BridgeConfig, ConfigError> {
    if cfg.poll_interval_secs == 0 {
        return Err(ConfigError::Validation {
            field: "poll_interval_secs".into(),
            reason: "must be at least 1".into(),
        });
    }

    let credentials = resolve_credentials(cfg)?;
    let client_id = cfg
        .client_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    let iot = resolve_iot(cfg, &client_id)?;

    let mut ble = BleSettings {
        adapter: cfg.ble.adapter.clone(),
        ..BleSettings::default()
    };
    if let Some(secs) = cfg.ble.connect_timeout_secs {
        ble.connect_timeout = Duration::from_secs(secs);
    }

    Ok(BridgeConfig {
        credentials,
        client_id,
        api_base_url: cfg
            .api_url
            .clone()
            .unwrap_or_else(|| goveelink_api::rest::DEFAULT_BASE_URL.into()),
        transport: TransportConfig {
            timeout: Duration::from_secs(cfg.timeout_secs),
        },
        poll_interval: Duration::from_secs(cfg.poll_interval_secs),
        connections: Connections {
            api: cfg.connections.api,
            iot: cfg.connections.iot,
            ble: cfg.connections.ble,
        },
        iot,
        ble,
        inspect_services: cfg.ble.inspect_services,
        ignored_devices: cfg.devices.ignore.iter().cloned().collect::<HashSet<_>>(),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn write(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(cfg.poll_interval_secs, 10);
        assert_eq!(cfg.iot.port, 8883);
        assert!(cfg.connections.api && cfg.connections.iot && cfg.connections.ble);
    }

    #[test]
    fn full_file_translates_to_bridge_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
username = "user@example.com"
password = "hunter2"
client_id = "abc123"
poll_interval_secs = 30

[connections]
ble = false

[iot]
host = "broker.example.com"
ca_cert = "/certs/ca.pem"
client_cert = "/certs/client.pem"
client_key = "/certs/client.key"

[ble]
inspect_services = true

[devices]
ignore = ["AA:BB"]
"#,
        );

        let bridge = to_bridge_config(&load_config_from(&path).unwrap()).unwrap();

        assert_eq!(bridge.credentials.username, "user@example.com");
        assert_eq!(bridge.credentials.password.expose_secret(), "hunter2");
        assert_eq!(bridge.client_id, "abc123");
        assert_eq!(bridge.poll_interval, Duration::from_secs(30));
        assert!(!bridge.connections.ble);
        assert!(bridge.iot_enabled());
        let iot = bridge.iot.unwrap();
        assert_eq!(iot.host, "broker.example.com");
        assert_eq!(iot.client_id, "abc123");
        assert!(bridge.inspect_services);
        assert!(bridge.ignored_devices.contains("AA:BB"));
    }

    #[test]
    fn incomplete_iot_section_disables_cloud() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "username = \"u\"\npassword = \"p\"\n[iot]\nhost = \"broker.example.com\"\n",
        );

        let bridge = to_bridge_config(&load_config_from(&path).unwrap()).unwrap();

        assert!(bridge.iot.is_none());
        assert!(!bridge.iot_enabled());
        assert_eq!(bridge.client_id.len(), 32);
    }

    #[test]
    fn credentials_are_required() {
        let cfg = Config::default();
        assert!(matches!(to_bridge_config(&cfg), Err(ConfigError::NoCredentials)));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let cfg = Config {
            username: Some("u".into()),
            password: Some("p".into()),
            poll_interval_secs: 0,
            ..Config::default()
        };
        assert!(matches!(
            to_bridge_config(&cfg),
            Err(ConfigError::Validation { field, .. }) if field == "poll_interval_secs"
        ));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            username: Some("user@example.com".into()),
            devices: DevicesSection {
                ignore: vec!["dev-9".into()],
            },
            ..Config::default()
        };

        save_config(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded.username.as_deref(), Some("user@example.com"));
        assert_eq!(loaded.devices.ignore, vec!["dev-9".to_owned()]);
    }
}
