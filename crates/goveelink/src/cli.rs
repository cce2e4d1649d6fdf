//! Clap derive structures for the `goveelink` CLI.

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use goveelink_core::ColorRgb;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// goveelink -- bridge Govee devices over BLE and the cloud
#[derive(Debug, Parser)]
#[command(
    name = "goveelink",
    version,
    about = "Bridge Govee lights, humidifiers, and purifiers over BLE and the cloud",
    long_about = "Discovers the devices on a Govee account, keeps their state in sync\n\
        over BLE and the cloud MQTT broker, and polls them on a fixed cadence.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "GOVEELINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "GOVEELINK_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output Enums ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Rounded table for listings, human lines for events
    Table,
    /// Indented JSON (event streams stay one object per line)
    Json,
    /// One JSON object per line
    JsonCompact,
    /// Device ids only for listings, human lines for events
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines on stderr
    Text,
    /// Newline-delimited JSON log records on stderr
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bridge and print device updates until interrupted
    Run(RunArgs),

    /// List the devices on the account
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Push one-off changes to a device
    Set(SetArgs),

    /// Log in with the configured credentials and store the session
    Login,

    /// Inspect configuration
    Config(ConfigArgs),
}

// ── Run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    pub duration: Option<u64>,

    /// Leave the BLE transport off
    #[arg(long)]
    pub no_ble: bool,

    /// Leave the cloud MQTT transport off
    #[arg(long)]
    pub no_iot: bool,
}

// ── Set ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("change")
        .required(true)
        .multiple(true)
        .args(["power", "brightness", "color", "hsv", "kelvin", "mired", "mist"])
))]
pub struct SetArgs {
    /// Device id as listed by `goveelink devices`
    pub device: String,

    #[arg(long)]
    pub power: Option<Power>,

    /// Brightness in percent
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub brightness: Option<u8>,

    /// Colour as RRGGBB hex
    #[arg(long, value_parser = parse_hex_color, conflicts_with = "hsv")]
    pub color: Option<ColorRgb>,

    /// Colour as HUE,SATURATION,VALUE (degrees, percent, percent)
    #[arg(long, value_parser = parse_hsv)]
    pub hsv: Option<ColorRgb>,

    /// Colour temperature in kelvin
    #[arg(long, conflicts_with = "mired")]
    pub kelvin: Option<u32>,

    /// Colour temperature in mireds
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub mired: Option<u32>,

    /// Mist level
    #[arg(long)]
    pub mist: Option<u8>,

    /// Give up if the device has no live transport after this many seconds
    #[arg(long, default_value_t = 20)]
    pub timeout: u64,

    /// Leave the BLE transport off
    #[arg(long)]
    pub no_ble: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Power {
    On,
    Off,
}

pub fn parse_hex_color(raw: &str) -> Result<ColorRgb, String> {
    let digits = raw.trim_start_matches('#');
    let bytes = hex::decode(digits).map_err(|e| format!("`{raw}` is not hex: {e}"))?;
    match bytes.as_slice() {
        [red, green, blue] => Ok(ColorRgb::new(*red, *green, *blue)),
        _ => Err(format!("`{raw}` must be six hex digits")),
    }
}

pub fn parse_hsv(raw: &str) -> Result<ColorRgb, String> {
    let parts = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("`{raw}`: {e}"))?;
    let [hue, saturation, value] = parts.as_slice() else {
        return Err(format!("`{raw}` must be HUE,SATURATION,VALUE"));
    };
    if !(0.0..360.0).contains(hue) {
        return Err(format!("hue {hue} is outside 0..360"));
    }
    for percent in [saturation, value] {
        if !(0.0..=100.0).contains(percent) {
            return Err(format!("{percent} is outside 0..=100"));
        }
    }
    Ok(ColorRgb::from_hsv(*hue, *saturation, *value))
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    /// Include models the bridge cannot drive
    #[arg(long, short = 'a')]
    pub all: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config and session file locations
    Path,

    /// Print the effective configuration (password redacted)
    Show,
}
