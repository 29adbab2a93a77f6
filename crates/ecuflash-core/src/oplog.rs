//! Append-only JSON-lines operation log (§6): the durable audit trail a
//! flashing tool leaves behind, distinct from in-process structured logging
//! (which goes through the [`crate::log`] facade wrapper) and from
//! in-memory progress events (consumed synchronously by the caller).

use crate::diag::Phase;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One line of the operation log: `{ ts, session_id, phase, event, detail }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub ts: chrono::DateTime<Utc>,
    pub session_id: u64,
    pub phase: String,
    pub event: String,
    pub detail: String,
}

#[derive(Debug, thiserror::Error)]
pub enum OpLogError {
    #[error("failed to open operation log {path}: {source}")]
    Open { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to append to operation log: {0}")]
    Write(#[from] std::io::Error),
    #[error("failed to serialize operation log entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// An append-only JSON-lines writer bound to one file, opened once per
/// [`crate::session::FlashSession`] and written to at every phase transition
/// and terminal outcome.
pub struct OperationLog {
    file: File,
}

impl OperationLog {
    /// Opens (creating if necessary) `path` in append mode.
    pub fn open(path: &Path) -> Result<Self, OpLogError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| OpLogError::Open { path: path.to_path_buf(), source })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| OpLogError::Open { path: path.to_path_buf(), source })?;
        Ok(Self { file })
    }

    /// Appends one entry, flushing immediately so the log survives a crash
    /// mid-flash.
    pub fn append(&mut self, session_id: u64, phase: Phase, event: &str, detail: &str) -> Result<(), OpLogError> {
        let entry = OperationLogEntry {
            ts: Utc::now(),
            session_id,
            phase: format!("{phase:?}"),
            event: event.to_string(),
            detail: detail.to_string(),
        };
        let line = serde_json::to_string(&entry)?;
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_writes_one_json_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.jsonl");
        let mut log = OperationLog::open(&path).unwrap();
        log.append(1, Phase::Connect, "session_control", "entered Programming").unwrap();
        log.append(1, Phase::Erase, "routine_start", "erase 0xFF02").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: OperationLogEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.session_id, 1);
        assert_eq!(parsed.event, "session_control");
    }

    #[test]
    fn test_reopening_appends_rather_than_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.jsonl");
        OperationLog::open(&path).unwrap().append(1, Phase::Prepare, "start", "").unwrap();
        OperationLog::open(&path).unwrap().append(1, Phase::Finalized, "done", "").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
