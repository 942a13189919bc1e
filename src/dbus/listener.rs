//! Interface listeners and message matching.
//!
//! A listener is a subscription record (object path, interface, member)
//! plus a callback. Listeners are kept in registration order and matched by
//! a pure function over the message header; there is no type hierarchy.
//!
//! Removal is synchronous: once [`Listener::remove`] returns, the callback is
//! not running and will never run again. The one exception is a listener
//! removing itself from inside its own callback, where waiting would
//! deadlock; it is then only prevented from receiving further messages.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use zbus::Message;

/// Which messages a listener wants. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    pub path: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
}

impl MatchRule {
    /// A rule matching one exact signal or method.
    pub fn new(
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        Self {
            path: Some(path.into()),
            interface: Some(interface.into()),
            member: Some(member.into()),
        }
    }

    /// A rule matching every message.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    /// Match against raw header fields.
    pub fn matches_fields(
        &self,
        path: Option<&str>,
        interface: Option<&str>,
        member: Option<&str>,
    ) -> bool {
        field_matches(&self.path, path)
            && field_matches(&self.interface, interface)
            && field_matches(&self.member, member)
    }

    /// Bus-side match expression routing the matching signals to us.
    pub fn to_bus_rule(&self) -> String {
        let mut rule = String::from("type='signal'");
        for (key, value) in [
            ("path", &self.path),
            ("interface", &self.interface),
            ("member", &self.member),
        ] {
            if let Some(value) = value {
                rule.push_str(&format!(",{key}='{value}'"));
            }
        }
        rule
    }

    pub fn matches(&self, message: &Message) -> bool {
        let header = message.header();
        self.matches_fields(
            header.path().map(|p| p.as_str()),
            header.interface().map(|i| i.as_str()),
            header.member().map(|m| m.as_str()),
        )
    }
}

fn field_matches(wanted: &Option<String>, actual: Option<&str>) -> bool {
    match wanted {
        None => true,
        Some(wanted) => actual == Some(wanted.as_str()),
    }
}

/// Callback invoked for each matching message.
pub type Handler = Box<dyn Fn(&Message) + Send + Sync>;

struct Entry {
    id: u64,
    rule: MatchRule,
    handler: Handler,
    active: AtomicBool,
    /// Held for the duration of every delivery.
    gate: Mutex<()>,
    running_on: Mutex<Option<ThreadId>>,
    /// Back-reference to the owning set; empty once detached.
    owner: Mutex<Weak<ListenerSet>>,
}

impl Entry {
    fn deliver(&self, message: &Message) -> bool {
        let _gate = self.gate.lock();
        if !self.active.load(Ordering::Acquire) {
            return false;
        }
        let _running = Running::enter(&self.running_on);
        (self.handler)(message);
        true
    }

    /// Stop deliveries and wait out any in-flight one on another thread.
    fn quiesce(&self) {
        self.active.store(false, Ordering::Release);
        if *self.running_on.lock() == Some(thread::current().id()) {
            return;
        }
        drop(self.gate.lock());
    }
}

struct Running<'a>(&'a Mutex<Option<ThreadId>>);

impl<'a> Running<'a> {
    fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        *slot.lock() = Some(thread::current().id());
        Self(slot)
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

/// Handle to a registered listener.
pub struct Listener {
    entry: Arc<Entry>,
}

impl Listener {
    pub fn rule(&self) -> &MatchRule {
        &self.entry.rule
    }

    /// Whether the listener is still registered on a live connection.
    pub fn is_attached(&self) -> bool {
        self.entry.owner.lock().strong_count() > 0
    }

    /// Unregister the listener and detach it from its connection.
    pub fn remove(&self) {
        let owner = std::mem::take(&mut *self.entry.owner.lock());
        if let Some(set) = owner.upgrade() {
            set.unlink(self.entry.id);
        }
        self.entry.quiesce();
    }

    fn belongs_to(&self, set: &Arc<ListenerSet>) -> bool {
        let owner = self.entry.owner.lock();
        Weak::ptr_eq(&owner, &Arc::downgrade(set))
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.entry.id)
            .field("rule", &self.entry.rule)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Ordered listener collection owned by one connection.
#[derive(Default)]
pub(crate) struct ListenerSet {
    entries: RwLock<Vec<Arc<Entry>>>,
    next_id: AtomicU64,
}

impl ListenerSet {
    pub(crate) fn add(self: &Arc<Self>, rule: MatchRule, handler: Handler) -> Listener {
        let entry = Arc::new(Entry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            rule,
            handler,
            active: AtomicBool::new(true),
            gate: Mutex::new(()),
            running_on: Mutex::new(None),
            owner: Mutex::new(Arc::downgrade(self)),
        });
        self.entries.write().push(entry.clone());
        Listener { entry }
    }

    /// Remove `listener` if it is registered here.
    pub(crate) fn remove(self: &Arc<Self>, listener: &Listener) -> bool {
        if !listener.belongs_to(self) {
            return false;
        }
        listener.remove();
        true
    }

    fn unlink(&self, id: u64) {
        self.entries.write().retain(|e| e.id != id);
    }

    /// Remove every listener, detaching their back-references.
    pub(crate) fn detach_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.entries.write());
        for entry in &drained {
            *entry.owner.lock() = Weak::new();
            entry.quiesce();
        }
        drained.len()
    }

    /// Deliver `message` to every matching listener, in registration order.
    pub(crate) fn dispatch(&self, message: &Message) -> usize {
        let matching: Vec<Arc<Entry>> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.rule.matches(message))
            .cloned()
            .collect();

        matching.iter().filter(|e| e.deliver(message)).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}
