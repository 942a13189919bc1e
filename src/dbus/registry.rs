//! Process-wide connection registry.
//!
//! Holds the lazily created system-bus and session-bus connections, the
//! one-time transport initialisation flag, and the recursive lock that
//! serialises connection construction and teardown. Inject a `Registry`
//! where a connection is needed instead of reaching for a global.

use parking_lot::{Mutex, ReentrantMutex};
use std::sync::{Arc, Once};
use tracing::debug;

use super::connection::Connection;
use super::event_loop::EventLoop;
use super::transport::{BusKind, Transport};
use super::zbus_transport::ZbusTransport;
use crate::config::Config;
use crate::error::Result;
use crate::session::Locator;

pub struct Registry {
    transport: Arc<dyn Transport>,
    config: Config,
    event_loop: Option<Arc<dyn EventLoop>>,
    locator: Locator,
    guard: Arc<ReentrantMutex<()>>,
    threads: Once,
    system: Mutex<Option<Arc<Connection>>>,
    session: Mutex<Option<Arc<Connection>>>,
}

impl Registry {
    pub fn new(transport: Arc<dyn Transport>, config: Config) -> Self {
        let locator = Locator::from_config(&config);
        Self {
            transport,
            config,
            event_loop: None,
            locator,
            guard: Arc::new(ReentrantMutex::new(())),
            threads: Once::new(),
            system: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    /// Registry backed by the zbus transport.
    pub fn with_zbus(config: Config) -> Self {
        Self::new(Arc::new(ZbusTransport), config)
    }

    /// Event loop used by integrated delivery.
    pub fn with_event_loop(mut self, event_loop: Arc<dyn EventLoop>) -> Self {
        self.event_loop = Some(event_loop);
        self
    }

    /// Replace the session locator (process table, identity, login sessions).
    pub fn with_locator(mut self, locator: Locator) -> Self {
        self.locator = locator;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub(crate) fn event_loop(&self) -> Option<&Arc<dyn EventLoop>> {
        self.event_loop.as_ref()
    }

    pub(crate) fn guard(&self) -> &Arc<ReentrantMutex<()>> {
        &self.guard
    }

    /// Run the transport's thread-safety setup exactly once.
    pub(crate) fn init_threads(&self) {
        let _lock = self.guard.lock();
        self.threads.call_once(|| {
            debug!("Initializing transport threading support");
            self.transport.init_threads();
        });
    }

    /// The shared system-bus connection, created on first use.
    pub fn system(&self) -> Result<Arc<Connection>> {
        self.singleton(BusKind::System)
    }

    /// The shared session-bus connection, created on first use.
    pub fn session(&self) -> Result<Arc<Connection>> {
        self.singleton(BusKind::Session)
    }

    /// System bus when started by root, session bus otherwise.
    ///
    /// Decided by the real uid, so a setuid-root binary run by a user still
    /// gets that user's session bus.
    pub fn instance(&self) -> Result<Arc<Connection>> {
        if self.locator.identity().real_uid() == 0 {
            self.system()
        } else {
            self.session()
        }
    }

    fn singleton(&self, kind: BusKind) -> Result<Arc<Connection>> {
        let _lock = self.guard.lock();
        let slot = match kind {
            BusKind::System => &self.system,
            BusKind::Session => &self.session,
        };

        if let Some(connection) = slot.lock().as_ref() {
            return Ok(connection.clone());
        }

        let name = match kind {
            BusKind::System => "sysbus",
            BusKind::Session => "sessionbus",
        };
        let connection = Arc::new(self.open_bus(kind, name)?);
        *slot.lock() = Some(connection.clone());
        Ok(connection)
    }
}
