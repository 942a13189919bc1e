//! Process table enumeration.

use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::error::{BusError, Result};

/// One process whose environment block could be opened.
pub struct Candidate {
    pub pid: u32,
    /// Owner of the environment block itself.
    pub owner: u32,
    pub environ: Box<dyn Read + Send>,
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("pid", &self.pid)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Source of candidate processes.
pub trait ProcessTable: Send + Sync {
    /// Process ids in enumeration order.
    fn pids(&self) -> Result<Vec<u32>>;

    /// Open the environment block of `pid`.
    ///
    /// Fails when the process is gone or its block is not readable.
    fn open(&self, pid: u32) -> io::Result<Candidate>;
}

/// The `/proc` pseudo-filesystem, or a directory laid out like it.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcessTable for ProcFs {
    fn pids(&self) -> Result<Vec<u32>> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            BusError::Io(io::Error::new(
                e.kind(),
                format!("Failed to read {}: {e}", self.root.display()),
            ))
        })?;

        let mut pids = Vec::new();
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str()
                && let Ok(pid) = name.parse::<u32>()
            {
                pids.push(pid);
            }
        }
        pids.sort_unstable();
        Ok(pids)
    }

    fn open(&self, pid: u32) -> io::Result<Candidate> {
        let file = File::open(self.root.join(pid.to_string()).join("environ"))?;
        // fstat on the opened block; the process cannot lie about this.
        let owner = file.metadata()?.uid();
        Ok(Candidate {
            pid,
            owner,
            environ: Box::new(file),
        })
    }
}
