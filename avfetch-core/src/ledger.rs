use std::collections::HashSet;
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Append-only record of completed work-item IDs, one per line. A run loads
/// it once into a set; completions are appended and synced as they happen,
/// so a restart never redoes acknowledged work.
#[derive(Debug, Clone)]
pub struct ProgressLedger {
    path: PathBuf,
}

impl ProgressLedger {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the set of completed IDs, empty when no ledger exists yet.
    /// A line that does not parse as an ID is skipped with a warning; one
    /// mangled line must not take the whole batch down.
    pub fn load(&self) -> LedgerResult<HashSet<u64>> {
        if !self.path.exists() {
            return Ok(HashSet::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| LedgerError::Io {
            source,
            path: self.path.clone(),
        })?;
        let mut completed = HashSet::new();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match trimmed.parse::<u64>() {
                Ok(avid) => {
                    completed.insert(avid);
                }
                Err(_) => {
                    warn!(
                        path = %self.path.display(),
                        line = idx + 1,
                        content = trimmed,
                        "skipping malformed progress ledger line"
                    );
                }
            }
        }
        Ok(completed)
    }

    /// Appends one completed ID and syncs it to disk before returning.
    pub fn append(&self, avid: u64) -> LedgerResult<()> {
        let file = self.open_append()?;
        self.write_line(file, avid)
    }

    fn open_append(&self) -> LedgerResult<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| LedgerError::Io {
                source,
                path: self.path.clone(),
            })
    }

    fn write_line(&self, mut file: File, avid: u64) -> LedgerResult<()> {
        let io_err = |source| LedgerError::Io {
            source,
            path: self.path.clone(),
        };
        writeln!(file, "{avid}").map_err(io_err)?;
        file.sync_data().map_err(io_err)
    }
}

/// Append-only diagnostic trail of failed items. Never consulted during a
/// run and never deduplicated; a label may be an item ID or a file basename.
#[derive(Debug, Clone)]
pub struct ErrorLedger {
    path: PathBuf,
}

impl ErrorLedger {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, label: impl Display) -> LedgerResult<()> {
        let io_err = |source| LedgerError::Io {
            source,
            path: self.path.clone(),
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        writeln!(file, "{label}").map_err(io_err)?;
        file.sync_data().map_err(io_err)
    }
}
