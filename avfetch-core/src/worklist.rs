use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkListError {
    #[error("work list {0} not found")]
    Missing(PathBuf),
    #[error("failed to read work list {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid work item at line {line} in {path}: {cell:?}")]
    InvalidRow {
        line: usize,
        cell: String,
        path: PathBuf,
    },
}

pub type WorkListResult<T> = Result<T, WorkListError>;

const ID_COLUMN: &str = "avid";

/// Ordered list of unique work-item IDs, read once at batch start.
#[derive(Debug, Clone)]
pub struct WorkList {
    ids: Vec<u64>,
}

impl WorkList {
    /// Loads IDs from a tabular file. The first line may be a header naming
    /// an `avid` column (any position); otherwise the first column is the ID
    /// column. Duplicates collapse, first-seen order wins.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> WorkListResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(WorkListError::Missing(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|source| WorkListError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> WorkListResult<Self> {
        let mut column = 0usize;
        let mut header_seen = false;
        let mut seen = HashSet::new();
        let mut ids = Vec::new();

        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let cells: Vec<&str> = trimmed.split(',').map(str::trim).collect();
            if !header_seen {
                header_seen = true;
                if let Some(pos) = cells
                    .iter()
                    .position(|cell| cell.eq_ignore_ascii_case(ID_COLUMN))
                {
                    column = pos;
                    continue;
                }
            }
            let cell = cells.get(column).copied().unwrap_or_default();
            let avid = cell
                .parse::<u64>()
                .map_err(|_| WorkListError::InvalidRow {
                    line: idx + 1,
                    cell: cell.to_string(),
                    path: path.to_path_buf(),
                })?;
            if seen.insert(avid) {
                ids.push(avid);
            }
        }

        Ok(Self { ids })
    }

    /// Work-list order minus the completed set.
    pub fn remaining(&self, completed: &HashSet<u64>) -> Vec<u64> {
        self.ids
            .iter()
            .copied()
            .filter(|avid| !completed.contains(avid))
            .collect()
    }

    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
