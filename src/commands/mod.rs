//! CLI command implementations.

pub mod completions;
pub mod locate;
pub mod monitor;
pub mod status;

use tracing::warn;

use crate::config::Config;
use crate::dbus::{DeliveryMode, Registry};

/// Registry for command-line use.
///
/// The CLI runs no event loop of its own, so connections are always read on
/// a dedicated thread.
pub(crate) fn registry(config: &Config) -> Registry {
    let mut config = config.clone();
    if config.delivery != DeliveryMode::Threaded {
        warn!(configured = %config.delivery, "No event loop on the command line, using threaded delivery");
        config.delivery = DeliveryMode::Threaded;
    }
    Registry::with_zbus(config)
}
