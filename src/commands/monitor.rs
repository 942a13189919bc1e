//! Monitor command implementation.
//!
//! Prints every message matching the given rule until Ctrl+C.

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;
use std::sync::mpsc;
use tracing::debug;
use zbus::Message;

use crate::config::Config;
use crate::dbus::{BusKind, Connection, MatchRule};
use crate::output::Output;

#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Monitor the system bus
    #[arg(long, conflicts_with_all = ["session", "address", "user"])]
    system: bool,

    /// Monitor the session bus (default)
    #[arg(long, conflicts_with_all = ["address", "user"])]
    session: bool,

    /// Monitor the bus at this address
    #[arg(long, conflicts_with = "user")]
    address: Option<String>,

    /// Monitor the session bus of this user (requires root)
    #[arg(long, value_name = "UID")]
    user: Option<u32>,

    /// Restrict --user to one login session
    #[arg(long, requires = "user", value_name = "ID")]
    login_session: Option<String>,

    /// Object path to match
    #[arg(long)]
    path: Option<String>,

    /// Interface to match
    #[arg(long)]
    interface: Option<String>,

    /// Member to match
    #[arg(long)]
    member: Option<String>,
}

impl MonitorArgs {
    fn rule(&self) -> MatchRule {
        MatchRule {
            path: self.path.clone(),
            interface: self.interface.clone(),
            member: self.member.clone(),
        }
    }
}

fn describe(message: &Message) -> String {
    let header = message.header();
    let path = header.path().map(|p| p.to_string()).unwrap_or_default();
    let interface = header.interface().map(|i| i.to_string()).unwrap_or_default();
    let member = header.member().map(|m| m.to_string()).unwrap_or_default();
    let sender = header
        .sender()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} {} {}.{}",
        sender.dimmed(),
        path.cyan(),
        interface,
        member.bold()
    )
}

fn connect(args: &MonitorArgs, config: &Config) -> Result<Connection> {
    let registry = super::registry(config);
    let connection = if let Some(uid) = args.user {
        registry
            .open_user(uid, args.login_session.as_deref())
            .with_context(|| format!("Failed to reach the session bus of user {uid}"))?
    } else if let Some(address) = &args.address {
        registry
            .open_address(address, "monitor")
            .with_context(|| format!("Failed to connect to {address}"))?
    } else {
        // --system and --session are mutually exclusive; session is the default.
        let kind = if args.system && !args.session {
            BusKind::System
        } else {
            BusKind::Session
        };
        registry
            .open_bus(kind, "monitor")
            .with_context(|| format!("Failed to connect to the {kind} bus"))?
    };
    Ok(connection)
}

pub fn run(args: MonitorArgs, config: &Config) -> Result<()> {
    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("Failed to set signal handler")?;

    let connection = connect(&args, config)?;
    let rule = args.rule();

    if let Err(e) = connection.subscribe(&rule) {
        Output::warning(format!("Bus subscription failed, only direct messages will show: {e}"));
    }

    let listener = connection.add_listener(rule.clone(), |message| {
        println!("{}", describe(message));
    });

    Output::info(format!(
        "Listening on {} ({}), Ctrl+C to stop",
        connection.name(),
        connection.unique_name().unwrap_or_else(|| "no unique name".to_string())
    ));
    debug!(?rule, "Monitoring");

    // Returns on Ctrl+C, or if the handler is dropped.
    let _ = stop_rx.recv();

    connection.remove_listener(&listener);
    connection.close();
    Output::success("Stopped");
    Ok(())
}
