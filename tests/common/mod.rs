//! In-memory doubles shared by the integration tests.
//!
//! - [`MockTransport`] hands out [`MockHandle`]s that record every call into
//!   a shared [`Journal`], including their own release.
//! - [`MockLoop`] records source registration into the same journal and can
//!   fire the registered callbacks on demand.
//! - [`MockIdentity`] and [`SyntheticTable`] stand in for the process's
//!   effective uid and the process table.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Cursor};
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use buslink::dbus::{
    BusHandle, BusKind, EventLoop, FdCallback, FilterId, FilterResult, Interest, MessageFilter,
    SourceId, Timeout, TimeoutHooks, TimerCallback, Transport, Watch, WatchHooks,
};
use buslink::session::{Candidate, Identity, LoginSessions, ProcessTable};
use buslink::{BusError, Result};
use zbus::Message;

pub fn signal(path: &str, interface: &str, member: &str) -> Message {
    Message::signal(path, interface, member)
        .unwrap()
        .build(&())
        .unwrap()
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Ordered record of everything the doubles observed.
#[derive(Default)]
pub struct Journal(Mutex<Vec<String>>);

impl Journal {
    pub fn record(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().iter().filter(|e| e.as_str() == event).count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == event)
    }

    pub fn last_position(&self, prefix: &str) -> Option<usize> {
        self.0.lock().iter().rposition(|e| e.starts_with(prefix))
    }
}

/// Where a [`MockHandle`] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Register,
    AddFilter,
    WatchHooks,
    TimeoutHooks,
}

/// State shared between a transport, its handles and the test.
#[derive(Default)]
pub struct Shared {
    pub journal: Journal,
    pub inbox: Mutex<VecDeque<Message>>,
    pub opened: AtomicUsize,
    pub released: AtomicUsize,
    pub reads: AtomicUsize,
    pub failure: Mutex<Option<Failure>>,
    pub refused_addresses: Mutex<HashSet<String>>,
    /// (address, effective uid at open time)
    pub opens: Mutex<Vec<(String, u32)>>,
    pub init_threads: AtomicUsize,
    pub open_delay: Mutex<Option<Duration>>,
}

impl Shared {
    pub fn push(&self, message: Message) {
        self.inbox.lock().push_back(message);
    }

    pub fn fail_with(&self, failure: Failure) {
        *self.failure.lock() = Some(failure);
    }

    fn fails(&self, failure: Failure) -> bool {
        *self.failure.lock() == Some(failure)
    }
}

pub struct MockTransport {
    pub shared: Arc<Shared>,
    identity: Option<Arc<MockIdentity>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            identity: None,
        }
    }

    /// Record the effective uid seen by every open.
    pub fn observing(identity: Arc<MockIdentity>) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            identity: Some(identity),
        }
    }

    fn handle(&self) -> Arc<dyn BusHandle> {
        let n = self.shared.opened.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.journal.record(format!("open #{n}"));
        Arc::new(MockHandle::new(self.shared.clone()))
    }
}

impl Transport for MockTransport {
    fn init_threads(&self) {
        self.shared.init_threads.fetch_add(1, Ordering::SeqCst);
    }

    fn open_bus(&self, kind: BusKind) -> Result<Arc<dyn BusHandle>> {
        if let Some(delay) = *self.shared.open_delay.lock() {
            thread::sleep(delay);
        }
        self.shared.journal.record(format!("open_bus {kind}"));
        Ok(self.handle())
    }

    fn open_address(&self, address: &str) -> Result<Arc<dyn BusHandle>> {
        let euid = self
            .identity
            .as_ref()
            .map(|i| i.effective_uid())
            .unwrap_or(u32::MAX);
        self.shared.opens.lock().push((address.to_string(), euid));

        if self.shared.refused_addresses.lock().contains(address) {
            return Err(BusError::Transport(format!(
                "Failed to connect to socket {address}: Connection refused"
            )));
        }
        Ok(self.handle())
    }
}

struct MockWatch {
    enabled: AtomicBool,
    handled: AtomicUsize,
}

impl Watch for MockWatch {
    fn fd(&self) -> RawFd {
        -1
    }

    fn interest(&self) -> Interest {
        Interest::READABLE
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn handle(&self, _ready: Interest) -> bool {
        self.handled.fetch_add(1, Ordering::SeqCst);
        true
    }
}

struct MockTimeout;

impl Timeout for MockTimeout {
    fn interval(&self) -> Duration {
        Duration::from_millis(25)
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn handle(&self) -> bool {
        true
    }
}

pub struct MockHandle {
    shared: Arc<Shared>,
    filters: Mutex<Vec<(FilterId, MessageFilter)>>,
    next_filter: AtomicU64,
    watch: Arc<dyn Watch>,
    timeout: Arc<dyn Timeout>,
    watch_hooks: Mutex<Option<Arc<dyn WatchHooks>>>,
    timeout_hooks: Mutex<Option<Arc<dyn TimeoutHooks>>>,
}

impl MockHandle {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            filters: Mutex::new(Vec::new()),
            next_filter: AtomicU64::new(1),
            watch: Arc::new(MockWatch {
                enabled: AtomicBool::new(true),
                handled: AtomicUsize::new(0),
            }),
            timeout: Arc::new(MockTimeout),
            watch_hooks: Mutex::new(None),
            timeout_hooks: Mutex::new(None),
        }
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

    fn next_message(&self) -> Option<Message> {
        self.shared.inbox.lock().pop_front()
    }
}

impl BusHandle for MockHandle {
    fn register(&self) -> Result<()> {
        self.shared.journal.record("register");
        if self.shared.fails(Failure::Register) {
            return Err(BusError::Transport(
                "Did not receive a reply. Possible causes include: the remote application did not send a reply"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn add_filter(&self, filter: MessageFilter) -> Result<FilterId> {
        if self.shared.fails(Failure::AddFilter) {
            return Err(BusError::Transport("Out of memory".to_string()));
        }
        let id = FilterId(self.next_filter.fetch_add(1, Ordering::SeqCst));
        self.filters.lock().push((id, filter));
        self.shared.journal.record("add_filter");
        Ok(id)
    }

    fn remove_filter(&self, id: FilterId) {
        self.filters.lock().retain(|(fid, _)| *fid != id);
        self.shared.journal.record("remove_filter");
    }

    fn set_exit_on_disconnect(&self, exit: bool) {
        self.shared
            .journal
            .record(format!("exit_on_disconnect {exit}"));
    }

    fn flush(&self) {
        self.shared.journal.record("flush");
    }

    fn read_write_dispatch(&self, timeout: Duration) -> bool {
        self.shared.reads.fetch_add(1, Ordering::SeqCst);
        match self.next_message() {
            Some(message) => self.run_filters(&message),
            None => thread::sleep(timeout.min(Duration::from_millis(5))),
        }
        true
    }

    fn dispatch_pending(&self) {
        while let Some(message) = self.next_message() {
            self.run_filters(&message);
        }
    }

    fn set_watch_hooks(&self, hooks: Option<Arc<dyn WatchHooks>>) -> Result<()> {
        let previous = self.watch_hooks.lock().take();
        if let Some(previous) = previous {
            previous.remove_watch(&self.watch);
        }
        match hooks {
            Some(hooks) => {
                if self.shared.fails(Failure::WatchHooks) || !hooks.add_watch(self.watch.clone()) {
                    return Err(BusError::Transport("Watch was rejected".to_string()));
                }
                self.shared.journal.record("set_watch_hooks");
                *self.watch_hooks.lock() = Some(hooks);
            }
            None => self.shared.journal.record("clear_watch_hooks"),
        }
        Ok(())
    }

    fn set_timeout_hooks(&self, hooks: Option<Arc<dyn TimeoutHooks>>) -> Result<()> {
        let previous = self.timeout_hooks.lock().take();
        if let Some(previous) = previous {
            previous.remove_timeout(&self.timeout);
        }
        match hooks {
            Some(hooks) => {
                if self.shared.fails(Failure::TimeoutHooks)
                    || !hooks.add_timeout(self.timeout.clone())
                {
                    return Err(BusError::Transport("Timeout was rejected".to_string()));
                }
                self.shared.journal.record("set_timeout_hooks");
                *self.timeout_hooks.lock() = Some(hooks);
            }
            None => self.shared.journal.record("clear_timeout_hooks"),
        }
        Ok(())
    }

    fn unique_name(&self) -> Option<String> {
        Some(":1.42".to_string())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.shared.released.fetch_add(1, Ordering::SeqCst);
        self.shared.journal.record("released");
    }
}

type SharedFdCallback = Arc<dyn Fn(Interest) + Send + Sync>;
type SharedTimerCallback = Arc<dyn Fn() + Send + Sync>;

/// Event loop double. Sources only run when the test fires them.
pub struct MockLoop {
    shared: Arc<Shared>,
    next: AtomicU64,
    fds: Mutex<HashMap<u64, (SharedFdCallback, bool)>>,
    timers: Mutex<HashMap<u64, (SharedTimerCallback, bool)>>,
    reject_fds: AtomicBool,
}

impl MockLoop {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            next: AtomicU64::new(1),
            fds: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
            reject_fds: AtomicBool::new(false),
        }
    }

    pub fn reject_fds(&self) {
        self.reject_fds.store(true, Ordering::SeqCst);
    }

    pub fn fd_sources(&self) -> usize {
        self.fds.lock().len()
    }

    pub fn timer_sources(&self) -> usize {
        self.timers.lock().len()
    }

    /// Run every enabled fd callback once, as if readable.
    pub fn fire_fds(&self) -> usize {
        let callbacks: Vec<SharedFdCallback> = self
            .fds
            .lock()
            .values()
            .filter(|(_, enabled)| *enabled)
            .map(|(cb, _)| cb.clone())
            .collect();
        for callback in &callbacks {
            callback(Interest::READABLE);
        }
        callbacks.len()
    }

    pub fn fire_timers(&self) -> usize {
        let callbacks: Vec<SharedTimerCallback> = self
            .timers
            .lock()
            .values()
            .filter(|(_, enabled)| *enabled)
            .map(|(cb, _)| cb.clone())
            .collect();
        for callback in &callbacks {
            callback();
        }
        callbacks.len()
    }
}

impl EventLoop for MockLoop {
    fn add_fd(&self, _fd: RawFd, _interest: Interest, callback: FdCallback) -> Result<SourceId> {
        if self.reject_fds.load(Ordering::SeqCst) {
            return Err(BusError::Transport("Loop is shutting down".to_string()));
        }
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.fds.lock().insert(id, (Arc::from(callback), true));
        self.shared.journal.record("loop.add_fd");
        Ok(SourceId(id))
    }

    fn set_fd_enabled(&self, id: SourceId, enabled: bool) {
        if let Some(entry) = self.fds.lock().get_mut(&id.0) {
            entry.1 = enabled;
        }
    }

    fn remove_fd(&self, id: SourceId) {
        if self.fds.lock().remove(&id.0).is_some() {
            self.shared.journal.record("loop.remove_fd");
        }
    }

    fn add_timer(&self, _interval: Duration, callback: TimerCallback) -> Result<SourceId> {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.timers.lock().insert(id, (Arc::from(callback), true));
        self.shared.journal.record("loop.add_timer");
        Ok(SourceId(id))
    }

    fn set_timer_enabled(&self, id: SourceId, enabled: bool) {
        if let Some(entry) = self.timers.lock().get_mut(&id.0) {
            entry.1 = enabled;
        }
    }

    fn remove_timer(&self, id: SourceId) {
        if self.timers.lock().remove(&id.0).is_some() {
            self.shared.journal.record("loop.remove_timer");
        }
    }
}

/// Process identity double. The real uid starts equal to the effective one.
pub struct MockIdentity {
    uid: AtomicU32,
    euid: AtomicU32,
    refused: Mutex<HashSet<u32>>,
    switches: Mutex<Vec<u32>>,
}

impl MockIdentity {
    pub fn new(euid: u32) -> Self {
        Self {
            uid: AtomicU32::new(euid),
            euid: AtomicU32::new(euid),
            refused: Mutex::new(HashSet::new()),
            switches: Mutex::new(Vec::new()),
        }
    }

    /// Started by `uid`, as with a setuid binary.
    pub fn with_real_uid(self, uid: u32) -> Self {
        self.uid.store(uid, Ordering::SeqCst);
        self
    }

    pub fn refuse(&self, uid: u32) {
        self.refused.lock().insert(uid);
    }

    /// Every uid passed to `set_effective_uid`, in order.
    pub fn switches(&self) -> Vec<u32> {
        self.switches.lock().clone()
    }
}

impl Identity for MockIdentity {
    fn real_uid(&self) -> u32 {
        self.uid.load(Ordering::SeqCst)
    }

    fn effective_uid(&self) -> u32 {
        self.euid.load(Ordering::SeqCst)
    }

    fn set_effective_uid(&self, uid: u32) -> Result<()> {
        self.switches.lock().push(uid);
        if self.refused.lock().contains(&uid) {
            return Err(BusError::Permission(format!("seteuid({uid}): EPERM")));
        }
        self.euid.store(uid, Ordering::SeqCst);
        Ok(())
    }
}

/// A process in a [`SyntheticTable`].
#[derive(Debug, Clone)]
pub struct SyntheticProcess {
    pub pid: u32,
    pub owner: u32,
    pub environ: Vec<u8>,
    pub session: Option<String>,
    pub readable: bool,
}

impl SyntheticProcess {
    pub fn new(pid: u32, owner: u32) -> Self {
        Self {
            pid,
            owner,
            environ: b"HOME=/tmp\0".to_vec(),
            session: None,
            readable: true,
        }
    }

    pub fn with_bus(mut self, address: &str) -> Self {
        self.environ = format!("HOME=/tmp\0DBUS_SESSION_BUS_ADDRESS={address}\0LANG=C\0").into_bytes();
        self
    }

    pub fn in_session(mut self, session: &str) -> Self {
        self.session = Some(session.to_string());
        self
    }

    pub fn unreadable(mut self) -> Self {
        self.readable = false;
        self
    }
}

/// Process table built from a list, enumerated in list order.
#[derive(Clone, Default)]
pub struct SyntheticTable(pub Arc<Vec<SyntheticProcess>>);

impl SyntheticTable {
    pub fn new(processes: Vec<SyntheticProcess>) -> Self {
        Self(Arc::new(processes))
    }
}

impl ProcessTable for SyntheticTable {
    fn pids(&self) -> Result<Vec<u32>> {
        Ok(self.0.iter().map(|p| p.pid).collect())
    }

    fn open(&self, pid: u32) -> io::Result<Candidate> {
        let process = self
            .0
            .iter()
            .find(|p| p.pid == pid)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        if !process.readable {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        Ok(Candidate {
            pid,
            owner: process.owner,
            environ: Box::new(Cursor::new(process.environ.clone())),
        })
    }
}

impl LoginSessions for SyntheticTable {
    fn session_of(&self, pid: u32) -> Option<String> {
        self.0
            .iter()
            .find(|p| p.pid == pid)
            .and_then(|p| p.session.clone())
    }
}
