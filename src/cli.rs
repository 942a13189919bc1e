//! CLI argument definitions for buslink.
//!
//! Kept out of `main.rs` so that shell completion generation can reference
//! these types.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;

#[derive(Debug, Parser)]
#[command(name = "buslink")]
#[command(about = "Buslink - inspect and reach D-Bus buses")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (defaults to ~/.config/buslink/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the bus this process connects to by default
    ///
    /// The system bus when running as root, the session bus otherwise.
    Status(commands::status::StatusArgs),

    /// Print matching messages until interrupted
    Monitor(commands::monitor::MonitorArgs),

    /// Find a user's session bus
    ///
    /// Scans the process table for a process of that user advertising a
    /// session bus address. Reaching another user's bus requires root.
    Locate(commands::locate::LocateArgs),

    /// Generate shell completions
    Completions(commands::completions::CompletionsArgs),
}
