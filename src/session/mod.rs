//! Per-user session bus discovery.
//!
//! A user's private session bus is found by scanning the process table for a
//! process owned by that user whose environment advertises a bus address,
//! then connecting to that address as the user.
//!
//! Ownership is taken from the environment block's file metadata, never from
//! anything the process reports about itself. The effective uid is switched
//! only for the duration of one connection attempt (see [`Elevation`]).

mod identity;
mod login;
mod proc_table;

pub use identity::{Elevation, Identity, ProcessIdentity};
pub use login::{CgroupSessions, LoginSessions, session_from_cgroup};
pub use proc_table::{Candidate, ProcFs, ProcessTable};

use serde::Serialize;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::config::{Config, SESSION_ADDRESS_VARIABLE};
use crate::dbus::{BusHandle, Transport};
use crate::error::{BusError, Result};

/// A process advertising a session bus for the requested user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discovered {
    pub pid: u32,
    pub address: String,
}

/// Finds and opens the session bus of another user.
pub struct Locator {
    table: Arc<dyn ProcessTable>,
    identity: Arc<dyn Identity>,
    sessions: Option<Arc<dyn LoginSessions>>,
    address_variable: String,
}

impl Locator {
    /// Locator without login-session support.
    pub fn new(table: Arc<dyn ProcessTable>, identity: Arc<dyn Identity>) -> Self {
        Self {
            table,
            identity,
            sessions: None,
            address_variable: SESSION_ADDRESS_VARIABLE.to_string(),
        }
    }

    /// Locator over the configured process table, acting as this process.
    pub fn from_config(config: &Config) -> Self {
        let sessions = CgroupSessions::detect(&config.proc_root)
            .map(|s| Arc::new(s) as Arc<dyn LoginSessions>);
        Self::new(
            Arc::new(ProcFs::new(&config.proc_root)),
            Arc::new(ProcessIdentity),
        )
        .with_sessions(sessions)
        .with_address_variable(&config.address_variable)
    }

    pub fn with_sessions(mut self, sessions: Option<Arc<dyn LoginSessions>>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_address_variable(mut self, name: impl Into<String>) -> Self {
        self.address_variable = name.into();
        self
    }

    pub fn identity(&self) -> &dyn Identity {
        self.identity.as_ref()
    }

    pub fn supports_sessions(&self) -> bool {
        self.sessions.is_some()
    }

    /// List every candidate for `uid` without connecting to anything.
    pub fn discover(&self, uid: u32, session: Option<&str>) -> Result<Vec<Discovered>> {
        let mut found = Vec::new();
        for pid in self.table.pids()? {
            if let Some(address) = self.candidate_address(pid, uid, session) {
                found.push(Discovered { pid, address });
            }
        }
        Ok(found)
    }

    /// Open the session bus of `uid`, optionally restricted to one login
    /// session. The first candidate that connects wins.
    pub fn open(
        &self,
        transport: &dyn Transport,
        uid: u32,
        session: Option<&str>,
    ) -> Result<Arc<dyn BusHandle>> {
        if session.is_some() && self.sessions.is_none() {
            debug!("Login sessions unavailable, ignoring session filter");
        }

        for pid in self.table.pids()? {
            let Some(address) = self.candidate_address(pid, uid, session) else {
                continue;
            };
            debug!(pid, uid, %address, "Found session bus candidate");

            match self.open_as(transport, uid, &address) {
                Ok(handle) => return Ok(handle),
                Err(e @ BusError::Permission(_)) => {
                    warn!(pid, uid, error = %e, "Unable to switch identity, skipping");
                }
                Err(e) => {
                    debug!(pid, uid, error = %e, "Unable to open session bus, skipping");
                }
            }
        }

        Err(BusError::NotFound { uid })
    }

    fn open_as(&self, transport: &dyn Transport, uid: u32, address: &str) -> Result<Arc<dyn BusHandle>> {
        let _elevation = Elevation::enter(self.identity.as_ref(), uid)?;
        transport.open_address(address)
    }

    /// The bus address advertised by `pid`, if it qualifies for `uid`.
    fn candidate_address(&self, pid: u32, uid: u32, session: Option<&str>) -> Option<String> {
        let mut candidate = match self.table.open(pid) {
            Ok(candidate) => candidate,
            Err(e) => {
                trace!(pid, error = %e, "Skipping unreadable process");
                return None;
            }
        };

        if candidate.owner != uid {
            return None;
        }

        if let (Some(sessions), Some(wanted)) = (&self.sessions, session) {
            match sessions.session_of(pid) {
                Some(actual) if actual == wanted => {}
                Some(actual) => {
                    trace!(pid, session = %actual, "Different login session");
                    return None;
                }
                None => {
                    trace!(pid, "No login session");
                    return None;
                }
            }
        }

        let mut environ = Vec::new();
        if let Err(e) = candidate.environ.read_to_end(&mut environ) {
            trace!(pid, error = %e, "Unable to read environment");
            return None;
        }

        find_variable(&environ, &self.address_variable).filter(|a| !a.is_empty())
    }
}

/// Value of `name` in a NUL-separated `KEY=VALUE` environment block.
///
/// Parsing stops at the first empty record.
pub fn find_variable(environ: &[u8], name: &str) -> Option<String> {
    for record in environ.split(|b| *b == 0) {
        if record.is_empty() {
            break;
        }
        if let Some(value) = record
            .strip_prefix(name.as_bytes())
            .and_then(|rest| rest.strip_prefix(b"="))
        {
            return Some(String::from_utf8_lossy(value).into_owned());
        }
    }
    None
}
