//! `goveelink login`: force a credential login and persist the session.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct LoginSummary {
    username: String,
    account_topic: String,
    expires_at: Option<DateTime<Utc>>,
    session_file: String,
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let config = super::bridge_config(global)?;
    let mut authenticator = super::authenticator(&config)?;
    let session = authenticator.relogin().await?;

    let summary = LoginSummary {
        username: config.credentials.username.clone(),
        account_topic: session.account_topic,
        expires_at: DateTime::from_timestamp_millis(session.token_expiration),
        session_file: goveelink_config::token_path().display().to_string(),
    };
    let out = output::render_line(global.output, &summary, |s| {
        let expiry = s
            .expires_at
            .map_or_else(|| "unknown".to_owned(), |t| t.to_rfc3339());
        format!(
            "Logged in as {}; session valid until {expiry}\nSaved to {}",
            s.username, s.session_file
        )
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
