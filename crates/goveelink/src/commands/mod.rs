//! Command handlers, one module per top-level subcommand.

pub mod config_cmd;
pub mod devices;
pub mod login;
pub mod run;
pub mod set;

use std::path::PathBuf;
use std::sync::Arc;

use goveelink_api::RestClient;
use goveelink_config::{Config, FileTokenStore};
use goveelink_core::transport::RestAuthenticator;
use goveelink_core::{BridgeConfig, EventBus};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file in effect: `--config` or the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(goveelink_config::config_path)
}

pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(goveelink_config::load_config_from(&config_file(global))?)
}

pub fn bridge_config(global: &GlobalOpts) -> Result<BridgeConfig, CliError> {
    Ok(goveelink_config::to_bridge_config(&load_config(global)?)?)
}

/// Standalone authenticator for one-shot commands, on a private bus.
pub fn authenticator(config: &BridgeConfig) -> Result<RestAuthenticator, CliError> {
    let client = RestClient::new(
        &config.api_base_url,
        config.client_id.clone(),
        &config.transport,
    )
    .map_err(goveelink_core::CoreError::from)?;
    Ok(RestAuthenticator::new(
        client,
        config.credentials.clone(),
        Arc::new(FileTokenStore::default_location()),
        EventBus::new(),
    ))
}
