//! Callback contract expected from the host's event loop.
//!
//! Integrated delivery hands the connection's readiness and deadline sources
//! to whatever loop the host process already runs. The loop itself (fd
//! multiplexing, timer wheel) belongs to the host; this module only names the
//! operations the connection needs from it.

use std::os::fd::RawFd;
use std::time::Duration;

use super::transport::Interest;
use crate::error::Result;

/// Token for a source registered with an [`EventLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u64);

/// Invoked by the loop when a descriptor becomes ready.
pub type FdCallback = Box<dyn Fn(Interest) + Send + Sync>;

/// Invoked by the loop each time a timer interval elapses.
pub type TimerCallback = Box<dyn Fn() + Send + Sync>;

/// A cooperative event loop running on some host thread.
///
/// Callbacks run on the loop's thread and must return promptly.
pub trait EventLoop: Send + Sync {
    fn add_fd(&self, fd: RawFd, interest: Interest, callback: FdCallback) -> Result<SourceId>;

    fn set_fd_enabled(&self, id: SourceId, enabled: bool);

    fn remove_fd(&self, id: SourceId);

    fn add_timer(&self, interval: Duration, callback: TimerCallback) -> Result<SourceId>;

    fn set_timer_enabled(&self, id: SourceId, enabled: bool);

    fn remove_timer(&self, id: SourceId);
}
