//! Message delivery strategies.
//!
//! Every connection reads its messages in exactly one of two ways, chosen
//! when it is built and never switched:
//!
//! - [`ThreadedDelivery`]: a dedicated, named OS thread owns all reads and
//!   dispatch for the connection.
//! - [`IntegratedDelivery`]: the host's [`EventLoop`](super::EventLoop) drives
//!   reads through watch and timeout callbacks; no thread is spawned.

mod integrated;
mod threaded;

pub use integrated::IntegratedDelivery;
pub use threaded::ThreadedDelivery;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::transport::BusHandle;
use crate::error::{BusError, Result};

/// How a connection's inbound messages are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// Dedicated reader thread per connection
    #[default]
    Threaded,
    /// Callbacks registered with the host event loop
    Integrated,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Threaded => write!(f, "threaded"),
            DeliveryMode::Integrated => write!(f, "integrated"),
        }
    }
}

impl FromStr for DeliveryMode {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "threaded" | "thread" => Ok(DeliveryMode::Threaded),
            "integrated" | "loop" | "mainloop" => Ok(DeliveryMode::Integrated),
            other => Err(BusError::Config(format!("Unknown delivery mode: {other}"))),
        }
    }
}

/// A running delivery mechanism for one connection.
pub trait Delivery: Send {
    /// Begin reading from `handle`.
    ///
    /// On error nothing is left registered or running.
    fn start(&mut self, handle: &Arc<dyn BusHandle>) -> Result<()>;

    /// Quiesce delivery. Never fails; problems are logged.
    ///
    /// The connection's handle slot is already empty when this runs, and
    /// `handle` is released only after it returns.
    fn stop(&mut self, handle: &Arc<dyn BusHandle>);

    fn is_active(&self) -> bool;
}

/// The connection's handle, shared with its delivery mechanism.
///
/// Emptying the slot is the cooperative stop signal: readers check it before
/// every read or dispatch.
#[derive(Default)]
pub(crate) struct HandleSlot(RwLock<Option<Arc<dyn BusHandle>>>);

impl HandleSlot {
    pub(crate) fn new(handle: Arc<dyn BusHandle>) -> Self {
        Self(RwLock::new(Some(handle)))
    }

    pub(crate) fn get(&self) -> Option<Arc<dyn BusHandle>> {
        self.0.read().clone()
    }

    pub(crate) fn is_live(&self) -> bool {
        self.0.read().is_some()
    }

    pub(crate) fn take(&self) -> Option<Arc<dyn BusHandle>> {
        self.0.write().take()
    }
}
