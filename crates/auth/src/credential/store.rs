// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Encrypted credential persistence with atomic writes.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, warn};

use super::cipher::{Envelope, StoreCipher};
use super::CredentialRecord;
use crate::error::AuthError;

/// Durable home of the single [`CredentialRecord`].
///
/// Callers share one store behind a `tokio::sync::Mutex`; the store itself
/// performs no locking.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    cipher: StoreCipher,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>, cipher: StoreCipher) -> Self {
        Self { path: path.into(), cipher }
    }

    /// Open the store at `path`, deriving the file key from `secret`.
    pub fn open(path: impl Into<PathBuf>, secret: &str) -> Result<Self, AuthError> {
        Ok(Self::new(path, StoreCipher::from_secret(secret)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the stored record. Unreadable, undecryptable or corrupt files are
    /// treated as absent.
    pub fn load(&self) -> Option<CredentialRecord> {
        match self.try_load() {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %self.path.display(), err = %e, "ignoring unreadable credential file");
                None
            }
        }
    }

    /// Like [`load`](Self::load) but reports why a present file was unusable.
    pub fn try_load(&self) -> Result<Option<CredentialRecord>, AuthError> {
        let contents = match std::fs::read(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::Storage(format!("read {}: {e}", self.path.display()))),
        };
        let envelope: Envelope =
            serde_json::from_slice(&contents).map_err(|_| AuthError::DecryptFailure)?;
        let plaintext = self.cipher.open(&envelope)?;
        let record = serde_json::from_slice(&plaintext).map_err(|_| AuthError::DecryptFailure)?;
        Ok(Some(record))
    }

    /// Persist the record atomically (write a unique temp file, then rename).
    pub fn save(&self, record: &CredentialRecord) -> Result<(), AuthError> {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let plaintext = serde_json::to_vec(record)
            .map_err(|e| AuthError::Storage(format!("serialize credentials: {e}")))?;
        let envelope = self.cipher.seal(&plaintext)?;
        let json = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| AuthError::Storage(format!("serialize envelope: {e}")))?;

        let storage_err = |what: &str, e: std::io::Error| {
            AuthError::Storage(format!("{what} {}: {e}", self.path.display()))
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| storage_err("create parent of", e))?;
        }

        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);

        let written = write_private(&tmp_path, &json)
            .and_then(|()| std::fs::rename(&tmp_path, &self.path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(storage_err("write", e));
        }
        debug!(path = %self.path.display(), expires_at = record.expires_at, "credentials saved");
        Ok(())
    }

    /// Delete the stored record. Clearing an empty store is not an error.
    pub fn clear(&self) -> Result<(), AuthError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "credentials cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::Storage(format!("remove {}: {e}", self.path.display()))),
        }
    }
}

fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
