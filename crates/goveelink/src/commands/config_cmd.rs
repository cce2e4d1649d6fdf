//! Config subcommand handlers.

use serde::Serialize;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "********";

#[derive(Debug, Serialize)]
struct Paths {
    config: String,
    session: String,
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            let paths = Paths {
                config: super::config_file(global).display().to_string(),
                session: goveelink_config::token_path().display().to_string(),
            };
            let out = output::render_line(global.output, &paths, |p| {
                format!("config:  {}\nsession: {}", p.config, p.session)
            })?;
            output::print_output(&out, global.quiet);
        }
        ConfigCommand::Show => {
            let mut cfg = super::load_config(global)?;
            if cfg.password.is_some() {
                cfg.password = Some(REDACTED.into());
            }
            let out = match global.output {
                OutputFormat::Table | OutputFormat::Plain => {
                    toml::to_string_pretty(&cfg)?
                }
                format => output::render_line(format, &cfg, |_| String::new())?,
            };
            output::print_output(out.trim_end(), global.quiet);
        }
    }
    Ok(())
}
