//! Dedicated reader thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

use super::{Delivery, HandleSlot};
use crate::dbus::transport::BusHandle;
use crate::error::Result;

/// Reads and dispatches on a thread named after the connection.
pub struct ThreadedDelivery {
    name: String,
    slot: Arc<HandleSlot>,
    poll_interval: Duration,
    thread: Option<JoinHandle<()>>,
}

impl ThreadedDelivery {
    pub(crate) fn new(name: &str, slot: Arc<HandleSlot>, poll_interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            slot,
            poll_interval,
            thread: None,
        }
    }
}

/// Service loop: runs until the slot is emptied or the bus goes away.
fn service(name: &str, slot: &HandleSlot, handle: Arc<dyn BusHandle>, poll_interval: Duration) {
    debug!(conn = %name, "Service thread begin");
    while slot.is_live() && handle.read_write_dispatch(poll_interval) {}
    trace!(conn = %name, "Flushing connection");
    handle.flush();
    drop(handle);
    debug!(conn = %name, "Service thread end");
}

impl Delivery for ThreadedDelivery {
    fn start(&mut self, handle: &Arc<dyn BusHandle>) -> Result<()> {
        // The worker holds its own reference for its whole lifetime.
        let worker_handle = handle.clone();
        let slot = self.slot.clone();
        let name = self.name.clone();
        let poll_interval = self.poll_interval;

        let thread = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || service(&name, &slot, worker_handle, poll_interval))?;

        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self, _handle: &Arc<dyn BusHandle>) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        if thread.thread().id() == thread::current().id() {
            // Closed from one of its own listeners; the loop exits after this
            // dispatch returns.
            warn!(conn = %self.name, "Connection closed from its service thread");
            return;
        }

        debug!(conn = %self.name, "Waiting for service thread");
        if thread.join().is_err() {
            error!(conn = %self.name, "Service thread panicked");
        }
    }

    fn is_active(&self) -> bool {
        self.thread.is_some()
    }
}
