//! Durable string-keyed storage.
//!
//! Each key lives in its own `<key>.json` file inside the data directory.
//! Writes go through a temporary file that is persisted over the target so a
//! crash never leaves a half-written value behind.
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use log::{debug, error, trace, warn};
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

use crate::{LedgerError, Result};

/// Ledger collection (array of records).
pub const LEDGER_KEY: &str = "qarzdorlar";
/// Local backup envelope.
pub const BACKUP_KEY: &str = "debt_backup";
/// Number of local backups written so far.
pub const BACKUP_COUNT_KEY: &str = "debt_backup_count";
/// Session flag, `"true"` while logged in.
pub const AUTH_STATE_KEY: &str = "auth_state";
/// Username of the last full login.
pub const USERNAME_KEY: &str = "username";
/// Time of the last full login or password change.
pub const PASSWORD_CHANGED_KEY: &str = "password_changed_at";
/// Time the rotation reminder was last dismissed.
pub const PASSWORD_WARNING_DISMISSED_KEY: &str = "password_warning_dismissed_at";
/// Persisted Google Drive tokens.
pub const DRIVE_SESSION_KEY: &str = "drive_session";

/// Replaces `path` with `contents` via a temporary file in the same directory.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp_file = NamedTempFile::new_in(dir).map_err(|e| {
        error!("Failed to create temporary file for {}: {}", path.display(), e);
        LedgerError::Io(e)
    })?;
    temp_file.write_all(contents.as_bytes())?;
    temp_file.flush()?;
    temp_file.persist(path).map_err(|e| {
        error!("Failed to replace file {}: {}", path.display(), e.error);
        LedgerError::Io(e.error)
    })?;
    Ok(())
}

/// File-backed key-value store.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    /// Opens the store, creating the directory when needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            debug!("Data directory does not exist, creating: {}", dir.display());
            fs::create_dir_all(&dir).map_err(|e| {
                error!("Failed to create data directory: {}", e);
                LedgerError::DirectoryError { path: dir.clone() }
            })?;
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Raw value of `key`, `None` when absent or unreadable.
    pub fn get_raw(&self, key: &str) -> Option<String> {
        let path = self.key_path(key);
        if !path.exists() {
            trace!("Key {} not present", key);
            return None;
        }
        match fs::read_to_string(&path) {
            Ok(raw) => Some(raw),
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Parsed value of `key`. Corrupt content is reported as absent.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring corrupt value under key {}: {}", key, e);
                None
            }
        }
    }

    pub fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        write_atomic(&self.key_path(key), value)?;
        trace!("Wrote key {}", key);
        Ok(())
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.set_raw(key, &json)
    }

    /// Removes `key`; removing an absent key is not an error.
    pub fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("Removed key {}", key);
        }
        Ok(())
    }
}
