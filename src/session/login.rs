//! Login session lookup.
//!
//! systemd-logind places every process of a login session inside a
//! `session-<id>.scope` cgroup, so the session of a process can be read from
//! `/proc/<pid>/cgroup` without talking to logind.

use std::fs;
use std::path::{Path, PathBuf};

/// Directory that exists only when the host was booted with systemd.
const SYSTEMD_RUNTIME_DIR: &str = "/run/systemd/system";

/// Resolves the login session a process belongs to.
pub trait LoginSessions: Send + Sync {
    fn session_of(&self, pid: u32) -> Option<String>;
}

/// Session lookup through the cgroup hierarchy.
#[derive(Debug, Clone)]
pub struct CgroupSessions {
    proc_root: PathBuf,
}

impl CgroupSessions {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    /// Available only on systemd hosts.
    pub fn detect(proc_root: &Path) -> Option<Self> {
        Path::new(SYSTEMD_RUNTIME_DIR)
            .is_dir()
            .then(|| Self::new(proc_root))
    }
}

impl LoginSessions for CgroupSessions {
    fn session_of(&self, pid: u32) -> Option<String> {
        let content = fs::read_to_string(self.proc_root.join(pid.to_string()).join("cgroup")).ok()?;
        session_from_cgroup(&content)
    }
}

/// Extract the session id from the contents of a `cgroup` file.
pub fn session_from_cgroup(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        // hierarchy-ID:controller-list:cgroup-path
        let path = line.splitn(3, ':').nth(2)?;
        path.split('/').find_map(|component| {
            component
                .strip_prefix("session-")?
                .strip_suffix(".scope")
                .filter(|id| !id.is_empty())
                .map(ToOwned::to_owned)
        })
    })
}
