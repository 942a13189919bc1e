//! zbus-backed transport.
//!
//! zbus reads its socket on an internal executor, so this binding adapts it
//! to the poll/dispatch model the connection layer expects:
//!
//! - A pump thread drains a [`MessageIterator`] into an in-process queue and
//!   pokes one end of a socket pair for every message.
//! - `read_write_dispatch` waits on that queue with a bounded timeout.
//! - The other end of the socket pair is the single readiness [`Watch`]
//!   handed to an event loop. zbus needs no timeouts.
//!
//! zbus writes each message before `send` returns, so `flush` has nothing to
//! do.
//!
//! Handles for the well-known buses exit the process when the bus goes away;
//! handles opened on an explicit address do not. Connection construction
//! clears the flag either way.

use parking_lot::Mutex;
use std::io::Read;
use std::io::Write;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};
use zbus::Message;
use zbus::blocking::{self, MessageIterator};

use super::transport::{
    BusHandle, BusKind, FilterId, FilterResult, Interest, MessageFilter, TimeoutHooks, Transport,
    Watch, WatchHooks,
};
use crate::error::{BusError, Result};

/// Opens handles with zbus.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZbusTransport;

impl Transport for ZbusTransport {
    fn init_threads(&self) {
        trace!("zbus connections are thread-safe, nothing to initialize");
    }

    fn open_bus(&self, kind: BusKind) -> Result<Arc<dyn BusHandle>> {
        let connection = match kind {
            BusKind::System => blocking::Connection::system(),
            BusKind::Session => blocking::Connection::session(),
        }?;
        Ok(ZbusHandle::start(connection, true)?)
    }

    fn open_address(&self, address: &str) -> Result<Arc<dyn BusHandle>> {
        trace!(address, "Opening bus");
        let connection = blocking::connection::Builder::address(address)?.build()?;
        Ok(ZbusHandle::start(connection, false)?)
    }
}

/// Readable end of the wake-up socket pair.
struct WakeWatch {
    fd: RawFd,
    enabled: AtomicBool,
}

impl Watch for WakeWatch {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn interest(&self) -> Interest {
        Interest::READABLE
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn handle(&self, _ready: Interest) -> bool {
        // Draining happens in dispatch_pending.
        true
    }
}

pub struct ZbusHandle {
    connection: blocking::Connection,
    queue: Mutex<Receiver<Message>>,
    wake: UnixStream,
    watch: Arc<dyn Watch>,
    filters: Mutex<Vec<(FilterId, MessageFilter)>>,
    next_filter: AtomicU64,
    watch_hooks: Mutex<Option<Arc<dyn WatchHooks>>>,
    timeout_hooks: Mutex<Option<Arc<dyn TimeoutHooks>>>,
    exit_on_disconnect: Arc<AtomicBool>,
    disconnected: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// How long drop waits for the pump thread to see the socket close.
const PUMP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

impl ZbusHandle {
    fn start(connection: blocking::Connection, exit_on_disconnect: bool) -> Result<Arc<Self>> {
        let (wake, notify) = UnixStream::pair()?;
        wake.set_nonblocking(true)?;
        notify.set_nonblocking(true)?;

        let (tx, rx) = mpsc::channel();
        let exit_on_disconnect = Arc::new(AtomicBool::new(exit_on_disconnect));
        let disconnected = Arc::new(AtomicBool::new(false));

        let messages = MessageIterator::from(&connection);
        let pump = {
            let exit_on_disconnect = exit_on_disconnect.clone();
            let disconnected = disconnected.clone();
            // Exits by itself once the socket is closed.
            thread::Builder::new()
                .name("zbus-pump".to_string())
                .spawn(move || {
                    pump(messages, tx, notify, &disconnected, &exit_on_disconnect)
                })?
        };

        let watch: Arc<dyn Watch> = Arc::new(WakeWatch {
            fd: wake.as_raw_fd(),
            enabled: AtomicBool::new(true),
        });

        Ok(Arc::new(Self {
            connection,
            queue: Mutex::new(rx),
            wake,
            watch,
            filters: Mutex::new(Vec::new()),
            next_filter: AtomicU64::new(1),
            watch_hooks: Mutex::new(None),
            timeout_hooks: Mutex::new(None),
            exit_on_disconnect,
            disconnected,
            pump: Mutex::new(Some(pump)),
        }))
    }

    fn drain_wake(&self) {
        let mut buf = [0u8; 64];
        while matches!((&self.wake).read(&mut buf), Ok(n) if n > 0) {}
    }

    fn run_filters(&self, message: &Message) {
        let filters: Vec<MessageFilter> =
            self.filters.lock().iter().map(|(_, f)| f.clone()).collect();
        for filter in filters {
            if filter(message) == FilterResult::Handled {
                break;
            }
        }
    }

    fn next_pending(&self) -> Option<Message> {
        self.queue.lock().try_recv().ok()
    }
}

fn pump(
    messages: MessageIterator,
    tx: mpsc::Sender<Message>,
    notify: UnixStream,
    disconnected: &AtomicBool,
    exit_on_disconnect: &AtomicBool,
) {
    for item in messages {
        match item {
            Ok(message) => {
                if tx.send(message).is_err() {
                    break;
                }
                let _ = (&notify).write(&[1]);
            }
            Err(e) => {
                debug!(error = %e, "Bus message stream ended");
                break;
            }
        }
    }

    disconnected.store(true, Ordering::Release);
    let _ = (&notify).write(&[0]);

    if exit_on_disconnect.load(Ordering::Acquire) {
        error!("Disconnected from D-Bus, exiting");
        std::process::exit(1);
    }
}

impl BusHandle for ZbusHandle {
    fn register(&self) -> Result<()> {
        // The builder performs the Hello exchange for bus connections.
        match self.connection.unique_name() {
            Some(_) => Ok(()),
            None => Err(BusError::Transport(
                "Connection is not registered on a message bus".to_string(),
            )),
        }
    }

    fn add_filter(&self, filter: MessageFilter) -> Result<FilterId> {
        let id = FilterId(self.next_filter.fetch_add(1, Ordering::Relaxed));
        self.filters.lock().push((id, filter));
        Ok(id)
    }

    fn remove_filter(&self, id: FilterId) {
        self.filters.lock().retain(|(fid, _)| *fid != id);
    }

    fn set_exit_on_disconnect(&self, exit: bool) {
        self.exit_on_disconnect.store(exit, Ordering::Release);
    }

    fn flush(&self) {}

    fn read_write_dispatch(&self, timeout: Duration) -> bool {
        let received = self.queue.lock().recv_timeout(timeout);
        match received {
            Ok(message) => {
                self.drain_wake();
                self.run_filters(&message);
                self.dispatch_pending();
                true
            }
            Err(RecvTimeoutError::Timeout) => !self.disconnected.load(Ordering::Acquire),
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn dispatch_pending(&self) {
        self.drain_wake();
        while let Some(message) = self.next_pending() {
            self.run_filters(&message);
        }
    }

    fn set_watch_hooks(&self, hooks: Option<Arc<dyn WatchHooks>>) -> Result<()> {
        let previous = self.watch_hooks.lock().take();
        if let Some(previous) = previous {
            previous.remove_watch(&self.watch);
        }

        if let Some(hooks) = hooks {
            if !hooks.add_watch(self.watch.clone()) {
                return Err(BusError::Transport("Watch was rejected".to_string()));
            }
            *self.watch_hooks.lock() = Some(hooks);
        }
        Ok(())
    }

    fn set_timeout_hooks(&self, hooks: Option<Arc<dyn TimeoutHooks>>) -> Result<()> {
        *self.timeout_hooks.lock() = hooks;
        Ok(())
    }

    fn unique_name(&self) -> Option<String> {
        self.connection.unique_name().map(|name| name.to_string())
    }

    fn add_match(&self, rule: &str) -> Result<()> {
        let rule = zbus::MatchRule::try_from(rule)?;
        let proxy = zbus::blocking::fdo::DBusProxy::new(&self.connection)?;
        proxy
            .add_match_rule(rule)
            .map_err(|e| BusError::Transport(format!("Unable to add match rule: {e}")))
    }
}

impl Drop for ZbusHandle {
    fn drop(&mut self) {
        self.exit_on_disconnect.store(false, Ordering::Release);
        if let Err(e) = self.connection.clone().close() {
            debug!(error = %e, "Error closing bus connection");
        }

        let Some(pump) = self.pump.lock().take() else {
            return;
        };
        let deadline = Instant::now() + PUMP_JOIN_TIMEOUT;
        while !pump.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if !pump.is_finished() {
            warn!("Bus pump thread did not stop, detaching it");
            return;
        }
        if pump.join().is_err() {
            error!("Bus pump thread panicked");
        }
    }
}
