//! Abstraction over the native bus transport.
//!
//! The connection layer never speaks the wire protocol itself. It drives an
//! opened [`BusHandle`] through a small set of operations (filters, flushing,
//! bounded reads, watch/timeout hooks) so that it can be exercised in-process
//! against a recording mock as easily as against a real bus.
//!
//! # Ownership
//!
//! Handles are shared as `Arc<dyn BusHandle>`. Taking a reference is cloning
//! the `Arc`; releasing it is dropping the clone. The native connection is
//! closed when the last reference goes away, so a handle can never be
//! released twice.

use std::fmt;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

use zbus::Message;

use crate::error::Result;

/// The two well-known buses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusKind {
    System,
    Session,
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusKind::System => write!(f, "system"),
            BusKind::Session => write!(f, "session"),
        }
    }
}

/// Identifies an installed message filter on one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterId(pub u64);

/// Outcome reported by a message filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    Handled,
    NotYetHandled,
}

/// Callback run by the transport for every inbound message.
pub type MessageFilter = Arc<dyn Fn(&Message) -> FilterResult + Send + Sync>;

/// Readiness conditions of a file descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Interest = Interest {
        readable: false,
        writable: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }
}

/// A file descriptor the transport wants monitored.
pub trait Watch: Send + Sync {
    fn fd(&self) -> RawFd;
    fn interest(&self) -> Interest;
    fn is_enabled(&self) -> bool;
    /// Tell the transport the descriptor became ready.
    fn handle(&self, ready: Interest) -> bool;
}

/// A deadline the transport wants honoured.
pub trait Timeout: Send + Sync {
    fn interval(&self) -> Duration;
    fn is_enabled(&self) -> bool;
    /// Tell the transport the deadline expired.
    fn handle(&self) -> bool;
}

/// Add/remove/toggle callbacks for readiness sources.
pub trait WatchHooks: Send + Sync {
    /// Returns false if the watch could not be registered.
    fn add_watch(&self, watch: Arc<dyn Watch>) -> bool;
    fn remove_watch(&self, watch: &Arc<dyn Watch>);
    fn toggle_watch(&self, watch: &Arc<dyn Watch>);
}

/// Add/remove/toggle callbacks for deadline sources.
pub trait TimeoutHooks: Send + Sync {
    /// Returns false if the timeout could not be registered.
    fn add_timeout(&self, timeout: Arc<dyn Timeout>) -> bool;
    fn remove_timeout(&self, timeout: &Arc<dyn Timeout>);
    fn toggle_timeout(&self, timeout: &Arc<dyn Timeout>);
}

/// One open native bus connection.
pub trait BusHandle: Send + Sync {
    /// Register on the bus (the `Hello` exchange).
    fn register(&self) -> Result<()>;

    fn add_filter(&self, filter: MessageFilter) -> Result<FilterId>;

    fn remove_filter(&self, id: FilterId);

    /// Whether losing the connection terminates the process.
    fn set_exit_on_disconnect(&self, exit: bool);

    /// Block until all queued outbound messages are written.
    fn flush(&self);

    /// Wait at most `timeout` for activity and dispatch what is ready.
    ///
    /// Returns false once the connection is gone.
    fn read_write_dispatch(&self, timeout: Duration) -> bool;

    /// Dispatch everything already received, without blocking.
    fn dispatch_pending(&self);

    /// Install (`Some`) or clear (`None`) the watch callbacks.
    ///
    /// Installing calls `add_watch` for every current watch. Clearing calls
    /// `remove_watch` on the previous hooks before returning.
    fn set_watch_hooks(&self, hooks: Option<Arc<dyn WatchHooks>>) -> Result<()>;

    /// Same contract as [`set_watch_hooks`](BusHandle::set_watch_hooks), for timeouts.
    fn set_timeout_hooks(&self, hooks: Option<Arc<dyn TimeoutHooks>>) -> Result<()>;

    /// Unique name assigned by the bus, if registered.
    fn unique_name(&self) -> Option<String>;

    /// Ask the bus daemon to route signals matching `rule` here.
    ///
    /// Peer-to-peer connections have no daemon to ask.
    fn add_match(&self, _rule: &str) -> Result<()> {
        Ok(())
    }
}

/// Factory for native handles.
pub trait Transport: Send + Sync {
    /// Prepare the transport for use from several threads.
    ///
    /// Called once per process before the first connection is built.
    fn init_threads(&self) {}

    fn open_bus(&self, kind: BusKind) -> Result<Arc<dyn BusHandle>>;

    fn open_address(&self, address: &str) -> Result<Arc<dyn BusHandle>>;
}

/// Stable identity of a shared source, used as a map key.
pub(crate) fn source_key<T: ?Sized>(source: &Arc<T>) -> usize {
    Arc::as_ptr(source) as *const () as usize
}
