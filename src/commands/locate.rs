//! Locate command implementation.
//!
//! Finds the private session bus of a user by scanning the process table.

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;

use crate::config::Config;
use crate::dbus::login_name;
use crate::output::Output;

#[derive(Debug, Args)]
pub struct LocateArgs {
    /// Target user id
    #[arg(long, value_name = "UID")]
    user: u32,

    /// Only consider processes in this login session
    #[arg(long, value_name = "ID")]
    login_session: Option<String>,

    /// List candidate processes without connecting
    #[arg(long, short = 'n')]
    dry_run: bool,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table")]
    format: String,
}

pub fn run(args: LocateArgs, config: &Config) -> Result<()> {
    let registry = super::registry(config);
    let session = args.login_session.as_deref();

    if args.login_session.is_some() && !registry.locator().supports_sessions() {
        Output::warning("Login sessions are not available here, --login-session is ignored");
    }

    if args.dry_run {
        let found = registry
            .locator()
            .discover(args.user, session)
            .with_context(|| format!("Failed to scan {}", config.proc_root.display()))?;

        if args.format == "json" {
            println!("{}", serde_json::to_string_pretty(&found)?);
            return Ok(());
        }

        if found.is_empty() {
            Output::error(format!("No session bus found for user {}", args.user));
            return Ok(());
        }
        Output::header(format!(
            "Session bus candidates for {} ({})",
            login_name(args.user),
            args.user
        ));
        for candidate in &found {
            Output::list_item(format!(
                "{:>8}  {}",
                candidate.pid.to_string().dimmed(),
                candidate.address
            ));
        }
        Output::dry_run(format!(
            "Would connect to {}",
            found[0].address
        ));
        return Ok(());
    }

    let connection = registry
        .open_user(args.user, session)
        .with_context(|| format!("Failed to reach the session bus of user {}", args.user))?;

    Output::success(format!("Connected to the session bus of {}", connection.name()));
    Output::kv(
        "Unique name",
        connection
            .unique_name()
            .unwrap_or_else(|| "(not registered)".to_string()),
    );
    connection.close();
    Ok(())
}
