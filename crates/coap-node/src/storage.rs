//! Observer persistence for CoAP nodes.
//!
//! The engine serializes its observer registrations into an opaque blob; this
//! module keeps that blob on disk across restarts. Writes are atomic (write to
//! `.tmp`, then rename) so a crash never leaves a half-written file.

use std::path::{Path, PathBuf};

use tokio::fs;

use coap_engine::PersistError;

/// File name for the serialized observer list.
const OBSERVERS_FILE: &str = "observers";

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt observer file: {0}")]
    Corrupt(#[from] PersistError),
}

/// Persistent storage for node state.
#[derive(Debug)]
pub struct Storage {
    base_dir: PathBuf,
}

impl Storage {
    /// Create a new storage instance, creating the directory if needed.
    ///
    /// # Note
    /// This performs blocking I/O (`create_dir_all`). Call at startup before the async runtime is under load.
    pub fn new(base_dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Save the observer blob.
    pub async fn save_observers(&self, blob: &[u8]) -> Result<(), StorageError> {
        self.atomic_write(&self.base_dir.join(OBSERVERS_FILE), blob)
            .await
    }

    /// Load the observer blob. Returns `Ok(None)` if the file doesn't exist.
    pub async fn load_observers(&self) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.base_dir.join(OBSERVERS_FILE)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Write data atomically: write to a `.tmp` file then rename.
    async fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}
