//! Status command implementation.
//!
//! Connects to the process-appropriate bus and reports what it got.

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;
use serde::Serialize;

use crate::config::Config;
use crate::output::Output;

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Output format (table, json)
    #[arg(short, long, default_value = "table")]
    format: String,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    connection: String,
    unique_name: Option<String>,
    delivery: String,
    uid: u32,
    listening: bool,
}

pub fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let registry = super::registry(config);
    let uid = registry.locator().identity().real_uid();
    let connection = registry.instance().context("Failed to connect to D-Bus")?;

    let report = StatusReport {
        connection: connection.name(),
        unique_name: connection.unique_name(),
        delivery: connection.mode().to_string(),
        uid,
        listening: connection.is_delivering(),
    };
    connection.close();

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let bus = if report.connection == "sysbus" {
        "system bus"
    } else {
        "session bus"
    };
    Output::success(format!("Connected to the {bus}"));
    Output::kv("Connection", &report.connection);
    Output::kv(
        "Unique name",
        report
            .unique_name
            .as_deref()
            .unwrap_or("(not registered)"),
    );
    Output::kv("Delivery", &report.delivery);
    Output::kv("User id", report.uid.to_string());
    let listening = if report.listening {
        "yes".green().to_string()
    } else {
        "no".red().to_string()
    };
    Output::kv("Listening", listening);

    Ok(())
}
