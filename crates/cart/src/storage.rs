//! Local persistence of the cart snapshot.
//!
//! A [`Persistable`] is a single slot holding one serialized blob. The cart
//! store reads it once at startup and overwrites it wholesale on every
//! commit.
//!
//! # Implementations
//!
//! - [`FileStorage`] - one JSON file per slot, replaced atomically via a
//!   synced temp file
//! - [`MemoryStorage`] - process-local slot for tests and ephemeral sessions

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

/// Errors that can occur when reading or writing the snapshot slot.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A single-slot blob store.
pub trait Persistable: Send + Sync {
    /// Read the slot. `Ok(None)` means nothing has been saved yet.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the slot exists but cannot be read.
    fn load(&self) -> Result<Option<String>, StorageError>;

    /// Overwrite the slot.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the slot cannot be written.
    fn save(&self, blob: &str) -> Result<(), StorageError>;
}

/// File-backed slot stored at `<dir>/<sanitized key>.json`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Create a slot named `key` inside `dir`.
    ///
    /// The directory is created lazily on first save.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>, key: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.json", sanitize_key(key))),
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Persistable for FileStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn save(&self, blob: &str) -> Result<(), StorageError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;

        // Each save gets its own temp file, so concurrent writers never share one
        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.io_error(e))?;
        temp.write_all(blob.as_bytes()).map_err(|e| self.io_error(e))?;
        temp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        temp.persist(&self.path).map_err(|e| self.io_error(e.error))?;
        Ok(())
    }
}

/// In-memory slot.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slot: Mutex<Option<String>>,
}

impl MemoryStorage {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot that already holds `blob`.
    #[must_use]
    pub fn with_snapshot(blob: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(blob.into())),
        }
    }

    /// Current contents of the slot.
    #[must_use]
    pub fn snapshot(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Persistable for MemoryStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(self.snapshot())
    }

    fn save(&self, blob: &str) -> Result<(), StorageError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(blob.to_string());
        Ok(())
    }
}

/// Map a slot key to a portable file name.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
