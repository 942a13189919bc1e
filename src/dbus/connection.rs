//! A live bus connection.
//!
//! [`Connection`] owns one native handle, installs exactly one message filter
//! on it, and reads from it through a [`Delivery`] strategy fixed at
//! construction. Incoming messages are matched against the registered
//! [`Listener`]s on whichever thread is reading the connection.
//!
//! ## Teardown
//!
//! [`Connection::close`] (also run on drop) flushes and detaches all
//! listeners, then under the registry lock removes the filter and empties the
//! handle slot, and finally stops delivery before the last handle reference is
//! released. Only the state changes hold the lock; waiting on listeners and
//! joining the reader do not. Delivery deregistration therefore
//! always happens strictly before release, and release happens at most once.

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use zbus::Message;

use super::delivery::{
    Delivery, DeliveryMode, HandleSlot, IntegratedDelivery, ThreadedDelivery,
};
use super::listener::{Listener, ListenerSet, MatchRule};
use super::registry::Registry;
use super::transport::{BusHandle, FilterId, FilterResult, MessageFilter};
use crate::error::{BusError, Result};

pub struct Connection {
    name: RwLock<String>,
    mode: DeliveryMode,
    slot: Arc<HandleSlot>,
    listeners: Arc<ListenerSet>,
    filter: Mutex<Option<FilterId>>,
    delivery: Mutex<Option<Box<dyn Delivery>>>,
    guard: Arc<ReentrantMutex<()>>,
}

impl Connection {
    /// Wrap an already-open handle.
    ///
    /// Ownership of `handle` moves into the connection. On any failure the
    /// filter and delivery are undone and the handle is released before the
    /// error is returned.
    pub fn from_handle(
        registry: &Registry,
        handle: Arc<dyn BusHandle>,
        name: &str,
        register: bool,
    ) -> Result<Self> {
        registry.init_threads();

        let _lock = registry.guard().lock();

        let mode = registry.config().delivery;
        let event_loop = match mode {
            DeliveryMode::Integrated => Some(registry.event_loop().cloned().ok_or_else(|| {
                BusError::InvalidArgument(
                    "Integrated delivery requires an event loop".to_string(),
                )
            })?),
            DeliveryMode::Threaded => None,
        };

        if register {
            handle.register()?;
        }

        let listeners = Arc::new(ListenerSet::default());
        let filter: MessageFilter = {
            let listeners = listeners.clone();
            Arc::new(move |message: &Message| {
                if listeners.dispatch(message) > 0 {
                    FilterResult::Handled
                } else {
                    FilterResult::NotYetHandled
                }
            })
        };
        let filter_id = handle.add_filter(filter).map_err(|e| {
            BusError::Transport(format!("Can't add filter to D-Bus connection: {e}"))
        })?;

        // Disconnection is ours to handle; never take the host process down.
        handle.set_exit_on_disconnect(false);

        let slot = Arc::new(HandleSlot::new(handle.clone()));
        let mut delivery: Box<dyn Delivery> = match event_loop {
            None => Box::new(ThreadedDelivery::new(
                name,
                slot.clone(),
                registry.config().poll_interval(),
            )),
            Some(event_loop) => Box::new(IntegratedDelivery::new(name, slot.clone(), event_loop)),
        };

        if let Err(e) = delivery.start(&handle) {
            handle.remove_filter(filter_id);
            slot.take();
            return Err(e);
        }

        debug!(conn = %name, %mode, "Connection ready");

        Ok(Self {
            name: RwLock::new(name.to_string()),
            mode,
            slot,
            listeners,
            filter: Mutex::new(Some(filter_id)),
            delivery: Mutex::new(Some(delivery)),
            guard: registry.guard().clone(),
        })
    }

    /// Display name, used for logging and thread naming.
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub(crate) fn rename(&self, name: impl Into<String>) {
        *self.name.write() = name.into();
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Whether the connection still holds its handle.
    pub fn is_active(&self) -> bool {
        self.slot.is_live()
    }

    /// Whether a delivery mechanism (thread or loop callbacks) is running.
    pub fn is_delivering(&self) -> bool {
        self.delivery.lock().as_ref().is_some_and(|d| d.is_active())
    }

    /// Unique bus name of this connection, if registered.
    pub fn unique_name(&self) -> Option<String> {
        self.slot.get().and_then(|h| h.unique_name())
    }

    /// Register a listener for messages matching `rule`.
    ///
    /// The handler runs on the connection's reading thread.
    pub fn add_listener<F>(&self, rule: MatchRule, handler: F) -> Listener
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        trace!(conn = %self.name(), ?rule, "Adding listener");
        self.listeners.add(rule, Box::new(handler))
    }

    /// Remove a listener registered on this connection.
    ///
    /// Blocks until an in-flight delivery to it has returned. Returns false if
    /// the listener belongs elsewhere or was already removed.
    pub fn remove_listener(&self, listener: &Listener) -> bool {
        self.listeners.remove(listener)
    }

    /// Have the bus send us the signals `rule` describes.
    ///
    /// Listeners only see what reaches the connection; broadcast signals
    /// need a subscription on the bus first.
    pub fn subscribe(&self, rule: &MatchRule) -> Result<()> {
        let handle = self.slot.get().ok_or_else(|| {
            BusError::InvalidArgument("Connection is closed".to_string())
        })?;
        handle.add_match(&rule.to_bus_rule())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Write out pending outbound traffic. No-op once closed.
    pub fn flush(&self) {
        if let Some(handle) = self.slot.get() {
            handle.flush();
        }
    }

    /// Tear the connection down. Safe to call from any thread; later calls
    /// only log.
    pub fn close(&self) {
        let name = self.name();
        debug!(conn = %name, "Connection destroyed");

        self.flush();

        // Waits out in-flight callbacks, which may themselves need the
        // registry lock; so it runs before that lock is taken.
        let detached = self.listeners.detach_all();
        if detached > 0 {
            trace!(conn = %name, detached, "Listeners removed");
        }

        let (handle, delivery) = {
            let _lock = self.guard.lock();

            let Some(handle) = self.slot.get() else {
                warn!(conn = %name, "Connection was already disabled");
                return;
            };

            if let Some(filter_id) = self.filter.lock().take() {
                handle.remove_filter(filter_id);
            }

            // Cooperative stop signal for the reader.
            self.slot.take();

            (handle, self.delivery.lock().take())
        };

        // Not held across the join: the service thread may need the lock to
        // finish its last dispatch.
        if let Some(mut delivery) = delivery {
            delivery.stop(&handle);
        }

        drop(handle);
        trace!(conn = %name, "Connection released");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.is_active() {
            self.close();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name())
            .field("mode", &self.mode)
            .field("active", &self.is_active())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
