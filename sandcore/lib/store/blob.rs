use std::{fmt, path::Path};

use async_trait::async_trait;

use crate::{SandcoreError, SandcoreResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Durable key/value storage for whole files.
#[async_trait]
pub trait BlobStore: Send + Sync + fmt::Debug {
    /// Writes the object at `key` to `dest`, replacing it.
    ///
    /// Returns [`SandcoreError::SnapshotNotFound`] if there is no such object.
    async fn download(&self, key: &str, dest: &Path) -> SandcoreResult<()>;

    /// Stores the contents of `source` at `key`, replacing any existing object.
    async fn upload(&self, source: &Path, key: &str) -> SandcoreResult<()>;

    /// Returns true if an object exists at `key`.
    async fn exists(&self, key: &str) -> SandcoreResult<bool>;

    /// Returns false for a store that never holds anything.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// A store used when no snapshot storage is configured. Nothing is ever found or kept.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledBlobStore;

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl BlobStore for DisabledBlobStore {
    async fn download(&self, key: &str, _dest: &Path) -> SandcoreResult<()> {
        Err(SandcoreError::SnapshotNotFound(key.to_string()))
    }

    async fn upload(&self, _source: &Path, key: &str) -> SandcoreResult<()> {
        Err(SandcoreError::Storage(format!(
            "cannot store {}: snapshot storage is disabled",
            key
        )))
    }

    async fn exists(&self, _key: &str) -> SandcoreResult<bool> {
        Ok(false)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}
