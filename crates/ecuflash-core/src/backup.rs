//! Durable, hash-verified backups (§3, §6, §8): a full calibration-region
//! snapshot written to disk *before* any erase, enforcing the
//! backup-before-write invariant.
//!
//! Filenames encode timestamp and variant (`backup-<variant>-<iso8601>.bin`
//! plus a `.json` sidecar), so the append-only policy never overwrites a
//! prior backup — the same non-overwrite discipline as the operation log in
//! [`crate::oplog`], just applied to whole-image snapshots instead of lines.

use crate::types::ControllerVariant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// The `.json` sidecar written next to each backup's `.bin` file (§6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSidecar {
    pub variant: ControllerVariant,
    pub timestamp: DateTime<Utc>,
    pub sha256: String,
    pub size: usize,
    pub source_ecu_id: Option<String>,
}

/// A backup that has been written to durable storage and whose hash has
/// been independently re-verified by reading the file back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub sidecar: BackupSidecar,
    pub bin_path: PathBuf,
    pub json_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("failed to create backup store directory {path}: {source}")]
    CreateStoreDir { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to write backup file {path}: {source}")]
    Write { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to read back backup file {path}: {source}")]
    ReadBack { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to serialize backup sidecar: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("backup hash verification failed: expected {expected}, recomputed {recomputed}")]
    HashMismatch { expected: String, recomputed: String },
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Timestamp format safe to embed in a filename on every target platform
/// (no `:`), while remaining parseable back into an RFC 3339 `DateTime`.
fn filename_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Writes `bytes` as a new backup for `variant` under `store_path`, then
/// reads the file back and re-hashes it to confirm the write was not
/// silently truncated or corrupted, per the backup-before-write invariant.
pub fn write_backup(
    store_path: &Path,
    variant: ControllerVariant,
    bytes: &[u8],
    timestamp: DateTime<Utc>,
    source_ecu_id: Option<String>,
) -> Result<BackupRecord, BackupError> {
    std::fs::create_dir_all(store_path).map_err(|source| BackupError::CreateStoreDir { path: store_path.to_path_buf(), source })?;

    let stem = format!("backup-{}-{}", variant.as_str(), filename_timestamp(timestamp));
    let bin_path = store_path.join(format!("{stem}.bin"));
    let json_path = store_path.join(format!("{stem}.json"));

    let sha256 = sha256_hex(bytes);
    std::fs::write(&bin_path, bytes).map_err(|source| BackupError::Write { path: bin_path.clone(), source })?;

    let sidecar = BackupSidecar { variant, timestamp, sha256: sha256.clone(), size: bytes.len(), source_ecu_id };
    let sidecar_json = serde_json::to_string_pretty(&sidecar)?;
    std::fs::write(&json_path, sidecar_json).map_err(|source| BackupError::Write { path: json_path.clone(), source })?;

    verify_backup_file(&bin_path, &sha256)?;

    Ok(BackupRecord { sidecar, bin_path, json_path })
}

/// Re-reads `bin_path` and confirms its SHA-256 matches `expected_sha256`.
fn verify_backup_file(bin_path: &Path, expected_sha256: &str) -> Result<(), BackupError> {
    let on_disk = std::fs::read(bin_path).map_err(|source| BackupError::ReadBack { path: bin_path.to_path_buf(), source })?;
    let recomputed = sha256_hex(&on_disk);
    if recomputed != expected_sha256 {
        return Err(BackupError::HashMismatch { expected: expected_sha256.to_string(), recomputed });
    }
    Ok(())
}

/// Re-verifies a previously written [`BackupRecord`] against its sidecar,
/// used by [`crate::session::FlashSession`] to confirm a backup is still
/// intact before allowing the session to advance past `Unlocked`.
pub fn verify_backup(record: &BackupRecord) -> Result<(), BackupError> {
    verify_backup_file(&record.bin_path, &record.sidecar.sha256)
}
