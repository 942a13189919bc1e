//! Delivery driven by the host event loop.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace};

use super::{Delivery, HandleSlot};
use crate::dbus::event_loop::{EventLoop, SourceId};
use crate::dbus::transport::{
    BusHandle, Interest, Timeout, TimeoutHooks, Watch, WatchHooks, source_key,
};
use crate::error::{BusError, Result};

/// Registers the connection's watches and timeouts with an [`EventLoop`].
pub struct IntegratedDelivery {
    name: String,
    slot: Arc<HandleSlot>,
    event_loop: Arc<dyn EventLoop>,
    bridge: Option<Arc<LoopBridge>>,
}

impl IntegratedDelivery {
    pub(crate) fn new(name: &str, slot: Arc<HandleSlot>, event_loop: Arc<dyn EventLoop>) -> Self {
        Self {
            name: name.to_string(),
            slot,
            event_loop,
            bridge: None,
        }
    }
}

impl Delivery for IntegratedDelivery {
    fn start(&mut self, handle: &Arc<dyn BusHandle>) -> Result<()> {
        let bridge = Arc::new(LoopBridge {
            name: self.name.clone(),
            slot: Arc::downgrade(&self.slot),
            event_loop: self.event_loop.clone(),
            watches: Mutex::new(HashMap::new()),
            timeouts: Mutex::new(HashMap::new()),
        });

        if let Err(e) = handle.set_watch_hooks(Some(bridge.clone() as Arc<dyn WatchHooks>)) {
            bridge.clear();
            return Err(BusError::Transport(format!(
                "Unable to set D-Bus watch functions: {e}"
            )));
        }

        if let Err(e) = handle.set_timeout_hooks(Some(bridge.clone() as Arc<dyn TimeoutHooks>)) {
            if let Err(e) = handle.set_watch_hooks(None) {
                error!(conn = %self.name, error = %e, "Unable to reset D-Bus watch functions");
            }
            bridge.clear();
            return Err(BusError::Transport(format!(
                "Unable to set D-Bus timeout functions: {e}"
            )));
        }

        self.bridge = Some(bridge);
        Ok(())
    }

    fn stop(&mut self, handle: &Arc<dyn BusHandle>) {
        let Some(bridge) = self.bridge.take() else {
            return;
        };

        debug!(conn = %self.name, "Restoring D-Bus watchers");
        if let Err(e) = handle.set_watch_hooks(None) {
            error!(conn = %self.name, error = %e, "Unable to reset D-Bus watch functions");
        }
        if let Err(e) = handle.set_timeout_hooks(None) {
            error!(conn = %self.name, error = %e, "Unable to reset D-Bus timeout functions");
        }

        // Whatever the transport failed to remove goes now.
        bridge.clear();
    }

    fn is_active(&self) -> bool {
        self.bridge.is_some()
    }
}

/// Translates transport watch/timeout callbacks into event-loop sources.
struct LoopBridge {
    name: String,
    slot: Weak<HandleSlot>,
    event_loop: Arc<dyn EventLoop>,
    watches: Mutex<HashMap<usize, SourceId>>,
    timeouts: Mutex<HashMap<usize, SourceId>>,
}

impl LoopBridge {
    fn clear(&self) {
        let watches: Vec<SourceId> = self.watches.lock().drain().map(|(_, id)| id).collect();
        for id in watches {
            self.event_loop.remove_fd(id);
        }
        let timeouts: Vec<SourceId> = self.timeouts.lock().drain().map(|(_, id)| id).collect();
        for id in timeouts {
            self.event_loop.remove_timer(id);
        }
    }
}

/// The live handle behind `slot`, if the connection is still open.
fn live_handle(slot: &Weak<HandleSlot>) -> Option<Arc<dyn BusHandle>> {
    slot.upgrade()?.get()
}

impl WatchHooks for LoopBridge {
    fn add_watch(&self, watch: Arc<dyn Watch>) -> bool {
        let slot = self.slot.clone();
        let weak_watch = Arc::downgrade(&watch);
        let callback = Box::new(move |ready: Interest| {
            let Some(handle) = live_handle(&slot) else {
                return;
            };
            if let Some(watch) = weak_watch.upgrade() {
                watch.handle(ready);
            }
            handle.dispatch_pending();
        });

        match self.event_loop.add_fd(watch.fd(), watch.interest(), callback) {
            Ok(id) => {
                if !watch.is_enabled() {
                    self.event_loop.set_fd_enabled(id, false);
                }
                trace!(conn = %self.name, fd = watch.fd(), "Watch added");
                self.watches.lock().insert(source_key(&watch), id);
                true
            }
            Err(e) => {
                error!(conn = %self.name, error = %e, "Unable to add D-Bus watch");
                false
            }
        }
    }

    fn remove_watch(&self, watch: &Arc<dyn Watch>) {
        if let Some(id) = self.watches.lock().remove(&source_key(watch)) {
            trace!(conn = %self.name, fd = watch.fd(), "Watch removed");
            self.event_loop.remove_fd(id);
        }
    }

    fn toggle_watch(&self, watch: &Arc<dyn Watch>) {
        let id = self.watches.lock().get(&source_key(watch)).copied();
        if let Some(id) = id {
            self.event_loop.set_fd_enabled(id, watch.is_enabled());
        }
    }
}

impl TimeoutHooks for LoopBridge {
    fn add_timeout(&self, timeout: Arc<dyn Timeout>) -> bool {
        let slot = self.slot.clone();
        let weak_timeout = Arc::downgrade(&timeout);
        let callback = Box::new(move || {
            let Some(handle) = live_handle(&slot) else {
                return;
            };
            if let Some(timeout) = weak_timeout.upgrade() {
                timeout.handle();
            }
            handle.dispatch_pending();
        });

        match self.event_loop.add_timer(timeout.interval(), callback) {
            Ok(id) => {
                if !timeout.is_enabled() {
                    self.event_loop.set_timer_enabled(id, false);
                }
                self.timeouts.lock().insert(source_key(&timeout), id);
                true
            }
            Err(e) => {
                error!(conn = %self.name, error = %e, "Unable to add D-Bus timeout");
                false
            }
        }
    }

    fn remove_timeout(&self, timeout: &Arc<dyn Timeout>) {
        if let Some(id) = self.timeouts.lock().remove(&source_key(timeout)) {
            self.event_loop.remove_timer(id);
        }
    }

    fn toggle_timeout(&self, timeout: &Arc<dyn Timeout>) {
        let id = self.timeouts.lock().get(&source_key(timeout)).copied();
        if let Some(id) = id {
            self.event_loop.set_timer_enabled(id, timeout.is_enabled());
        }
    }
}
