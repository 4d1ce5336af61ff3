use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{SandcoreError, SandcoreResult};

use super::{temp_sibling, BlobStore};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Keeps blobs as files under a root directory, one file per key.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FsBlobStore {
    /// Creates a store rooted at `root`. The directory is created on first upload.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn get_root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |path, segment| path.join(segment))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn download(&self, key: &str, dest: &Path) -> SandcoreResult<()> {
        let object = self.object_path(key);
        if !tokio::fs::try_exists(&object).await? {
            return Err(SandcoreError::SnapshotNotFound(key.to_string()));
        }

        tokio::fs::copy(&object, dest).await?;
        Ok(())
    }

    async fn upload(&self, source: &Path, key: &str) -> SandcoreResult<()> {
        let object = self.object_path(key);
        if let Some(parent) = object.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Readers never see a half-written object.
        let staging = temp_sibling(&object);
        if let Err(e) = tokio::fs::copy(source, &staging).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        tokio::fs::rename(&staging, &object).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> SandcoreResult<bool> {
        Ok(tokio::fs::try_exists(self.object_path(key)).await?)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
