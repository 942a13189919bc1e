//! Runtime configuration.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. A JSON file (`--config PATH`, or `~/.config/buslink/config.json` if present)
//! 3. `BUSLINK_*` environment variables

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dbus::DeliveryMode;
use crate::error::{BusError, Result};

/// Environment variable carrying the session bus address of a process.
pub const SESSION_ADDRESS_VARIABLE: &str = "DBUS_SESSION_BUS_ADDRESS";

/// Connection and discovery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// How incoming messages are read and dispatched.
    pub delivery: DeliveryMode,
    /// Bounded wait of the dedicated reader thread, in milliseconds.
    pub poll_interval_ms: u64,
    /// Root of the process table pseudo-filesystem.
    pub proc_root: PathBuf,
    /// Name of the environment variable advertising a session bus.
    pub address_variable: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            delivery: DeliveryMode::Threaded,
            poll_interval_ms: 100,
            proc_root: PathBuf::from("/proc"),
            address_variable: SESSION_ADDRESS_VARIABLE.to_string(),
        }
    }
}

impl Config {
    /// Load the effective configuration.
    ///
    /// An explicit `path` must exist; the default user path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => match Self::user_path() {
                Some(path) if path.exists() => Self::load_from(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load a configuration file, without environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Default per-user configuration file.
    pub fn user_path() -> Option<PathBuf> {
        BaseDirs::new().map(|d| d.config_dir().join("buslink").join("config.json"))
    }

    /// Apply `BUSLINK_*` overrides using the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("BUSLINK_DELIVERY") {
            self.delivery = value.parse()?;
        }
        if let Some(value) = lookup("BUSLINK_POLL_MS") {
            self.poll_interval_ms = value.trim().parse().map_err(|_| {
                BusError::Config(format!("BUSLINK_POLL_MS is not a number: {value}"))
            })?;
        }
        if let Some(value) = lookup("BUSLINK_PROC_ROOT") {
            self.proc_root = PathBuf::from(value);
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
