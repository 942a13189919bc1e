//! Connection factory entry points.

use nix::unistd::{Uid, User};
use std::sync::Arc;
use tracing::{debug, trace};

use super::connection::Connection;
use super::registry::Registry;
use super::transport::{BusHandle, BusKind};
use crate::error::{BusError, Result};

impl Registry {
    /// Open a private connection to a well-known bus.
    pub fn open_bus(&self, kind: BusKind, name: &str) -> Result<Connection> {
        debug!(bus = %kind, "Opening well-known bus");
        let handle = self.transport().open_bus(kind)?;
        Connection::from_handle(self, handle, name, true)
    }

    /// Open a connection to an explicit bus address.
    pub fn open_address(&self, address: &str, name: &str) -> Result<Connection> {
        if address.trim().is_empty() {
            return Err(BusError::InvalidArgument("Invalid busname".to_string()));
        }
        trace!(address, "Opening bus address");
        let handle = self.transport().open_address(address)?;
        Connection::from_handle(self, handle, name, true)
    }

    /// Open the private session bus of `uid`, optionally within one login
    /// session.
    ///
    /// The connection is named after the user's login name.
    pub fn open_user(&self, uid: u32, session: Option<&str>) -> Result<Connection> {
        let handle = self
            .locator()
            .open(self.transport().as_ref(), uid, session)?;
        let connection = Connection::from_handle(self, handle, "user", true)?;
        connection.rename(login_name(uid));
        Ok(connection)
    }

    /// Wrap a handle opened elsewhere.
    pub fn wrap(&self, handle: Arc<dyn BusHandle>, name: &str, register: bool) -> Result<Connection> {
        Connection::from_handle(self, handle, name, register)
    }
}

/// Login name for `uid`, or `U<uid>` when the password database has none.
pub fn login_name(uid: u32) -> String {
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        _ => format!("U{uid}"),
    }
}
