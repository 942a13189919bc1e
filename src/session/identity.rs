//! User identity of the process.

use nix::unistd::{Uid, geteuid, getuid, seteuid};
use parking_lot::{Mutex, MutexGuard, const_mutex};
use tracing::{error, trace};

use crate::error::{BusError, Result};

/// Read and switch the effective user id.
pub trait Identity: Send + Sync {
    /// Uid of the user who started the process. Never switched.
    fn real_uid(&self) -> u32;

    fn effective_uid(&self) -> u32;

    fn set_effective_uid(&self, uid: u32) -> Result<()>;
}

/// The calling process, through `getuid`/`geteuid`/`seteuid`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessIdentity;

impl Identity for ProcessIdentity {
    fn real_uid(&self) -> u32 {
        getuid().as_raw()
    }

    fn effective_uid(&self) -> u32 {
        geteuid().as_raw()
    }

    fn set_effective_uid(&self, uid: u32) -> Result<()> {
        seteuid(Uid::from_raw(uid))
            .map_err(|e| BusError::Permission(format!("Unable to set effective uid to {uid}: {e}")))
    }
}

// Effective uid is shared by every thread in the process.
static ELEVATION_LOCK: Mutex<()> = const_mutex(());

/// A temporary switch of effective identity.
///
/// Holds the process-wide elevation lock for its whole lifetime and restores
/// the saved effective uid when dropped.
pub struct Elevation<'a> {
    identity: &'a dyn Identity,
    saved: u32,
    _lock: MutexGuard<'static, ()>,
}

impl<'a> Elevation<'a> {
    pub fn enter(identity: &'a dyn Identity, uid: u32) -> Result<Self> {
        let lock = ELEVATION_LOCK.lock();
        let saved = identity.effective_uid();

        if let Err(e) = identity.set_effective_uid(uid) {
            if identity.effective_uid() != saved
                && let Err(restore) = identity.set_effective_uid(saved)
            {
                error!(uid = saved, error = %restore, "Unable to restore effective uid");
            }
            return Err(e);
        }

        trace!(from = saved, to = uid, "Effective uid switched");
        Ok(Self {
            identity,
            saved,
            _lock: lock,
        })
    }

    /// Effective uid that will be restored.
    pub fn saved(&self) -> u32 {
        self.saved
    }
}

impl Drop for Elevation<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.identity.set_effective_uid(self.saved) {
            error!(uid = self.saved, error = %e, "Unable to restore effective uid");
        } else {
            trace!(uid = self.saved, "Effective uid restored");
        }
    }
}
