//! `goveelink devices`: one-shot account listing.

use std::collections::HashSet;

use serde::Serialize;
use tabled::Tabled;

use goveelink_core::transport::rest::device_configs;
use goveelink_core::{DeviceCatalog, DeviceConfig, DeviceKind};

use crate::cli::{DevicesArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct Listing {
    #[serde(flatten)]
    config: DeviceConfig,
    kind: Option<DeviceKind>,
    ignored: bool,
}

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "BLE")]
    ble: String,
    #[tabled(rename = "Cloud")]
    cloud: String,
}

impl From<&Listing> for DeviceRow {
    fn from(l: &Listing) -> Self {
        let mut kind = l
            .kind
            .map_or_else(|| "unsupported".to_owned(), |k| k.to_string());
        if l.ignored {
            kind.push_str(" (ignored)");
        }
        Self {
            id: l.config.device_id.clone(),
            name: l.config.name.clone(),
            model: l.config.model.clone(),
            kind,
            ble: l.config.ble_address.clone().unwrap_or_default(),
            cloud: if l.config.iot_topic.is_some() { "yes" } else { "no" }.into(),
        }
    }
}

pub async fn handle(args: DevicesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let config = super::bridge_config(global)?;
    let mut authenticator = super::authenticator(&config)?;
    let devices = authenticator.fetch_devices().await?;

    let catalog = DeviceCatalog::standard();
    let listings: Vec<Listing> = device_configs(&devices, &HashSet::new())
        .into_iter()
        .map(|config_entry| Listing {
            kind: catalog.kind_of(&config_entry.model),
            ignored: config.ignored_devices.contains(&config_entry.device_id),
            config: config_entry,
        })
        .filter(|l| args.all || (l.kind.is_some() && !l.ignored))
        .collect();

    render(global, &listings)
}

fn render(global: &GlobalOpts, listings: &[Listing]) -> Result<(), CliError> {
    let out = output::render_list(global.output, listings, |l| DeviceRow::from(l), |l| {
        l.config.device_id.clone()
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
