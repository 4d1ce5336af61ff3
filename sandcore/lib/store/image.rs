use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use getset::Getters;

use crate::{
    config::{StorageBackend, StorageConfig},
    management::TenantId,
    utils::SandboxPaths,
    SandcoreError, SandcoreResult,
};

use super::{temp_sibling, BlobStore, DisabledBlobStore, FsBlobStore, HttpBlobStore};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The last segment of every snapshot key.
pub const SNAPSHOT_OBJECT_NAME: &str = "rootfs-image";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Restores and saves tenant disk images against a [`BlobStore`].
///
/// Every tenant has exactly one snapshot at `<prefix>/<tenant>/rootfs-image`. `restore` and `save`
/// address the same key, so a save followed by a restore yields identical bytes.
#[derive(Debug, Clone)]
pub struct ImageStore {
    blobs: Arc<dyn BlobStore>,
    key_prefix: String,
    paths: SandboxPaths,
}

/// Where a tenant's snapshot lives, durably and locally.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ImageSnapshot {
    /// The owning tenant.
    tenant_id: TenantId,

    /// The key in blob storage.
    storage_key: String,

    /// The local cache path the sandbox boots from.
    local_cache_path: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageStore {
    /// Creates an image store over `blobs`.
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        key_prefix: impl Into<String>,
        paths: SandboxPaths,
    ) -> Self {
        Self {
            blobs,
            key_prefix: key_prefix.into(),
            paths,
        }
    }

    /// Creates an image store for the configured backend.
    pub fn from_config(storage: &StorageConfig, paths: SandboxPaths) -> SandcoreResult<Self> {
        let blobs: Arc<dyn BlobStore> = match storage.get_backend() {
            StorageBackend::Disabled => Arc::new(DisabledBlobStore),
            StorageBackend::Filesystem { root } => Arc::new(FsBlobStore::new(root)),
            StorageBackend::Http {
                base_url,
                bearer_token,
                max_retries,
            } => Arc::new(HttpBlobStore::new(
                base_url,
                bearer_token.clone(),
                *max_retries,
            )?),
        };

        Ok(Self::new(blobs, storage.get_key_prefix().clone(), paths))
    }

    /// The storage key of `tenant`'s snapshot.
    pub fn storage_key(&self, tenant: &TenantId) -> String {
        format!("{}/{}/{}", self.key_prefix, tenant, SNAPSHOT_OBJECT_NAME)
    }

    /// Describes `tenant`'s snapshot.
    pub fn snapshot(&self, tenant: &TenantId) -> ImageSnapshot {
        ImageSnapshot {
            tenant_id: tenant.clone(),
            storage_key: self.storage_key(tenant),
            local_cache_path: self.paths.disk_image_path(tenant),
        }
    }

    /// Returns false if snapshot storage is disabled.
    pub fn is_enabled(&self) -> bool {
        self.blobs.is_enabled()
    }

    /// Returns true if a snapshot exists for `tenant`.
    pub async fn exists(&self, tenant: &TenantId) -> SandcoreResult<bool> {
        self.blobs.exists(&self.storage_key(tenant)).await
    }

    /// Downloads `tenant`'s snapshot to `destination`.
    ///
    /// Returns `Ok(false)` if there is no snapshot yet or storage is disabled. The destination is
    /// only replaced once the download has completed.
    pub async fn restore(&self, tenant: &TenantId, destination: &Path) -> SandcoreResult<bool> {
        if !self.blobs.is_enabled() {
            tracing::debug!(tenant = %tenant, "snapshot storage disabled, nothing to restore");
            return Ok(false);
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let key = self.storage_key(tenant);
        let staging = temp_sibling(destination);

        match self.blobs.download(&key, &staging).await {
            Ok(()) => {}
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging).await;
                if e.is_snapshot_not_found() {
                    tracing::info!(tenant = %tenant, "no snapshot at {}", key);
                    return Ok(false);
                }

                return Err(e);
            }
        }

        if let Err(e) = tokio::fs::rename(&staging, destination).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        tracing::info!(tenant = %tenant, "restored snapshot {} to {}", key, destination.display());
        Ok(true)
    }

    /// Uploads `source` as `tenant`'s snapshot.
    ///
    /// Returns `Ok(false)` if storage is disabled. A missing source or a failed upload is
    /// [`SandcoreError::SnapshotUploadFailed`].
    pub async fn save(&self, tenant: &TenantId, source: &Path) -> SandcoreResult<bool> {
        if !self.blobs.is_enabled() {
            tracing::debug!(tenant = %tenant, "snapshot storage disabled, not saving");
            return Ok(false);
        }

        let upload_failed = |source: SandcoreError| SandcoreError::SnapshotUploadFailed {
            tenant: tenant.to_string(),
            source: Box::new(source),
        };

        if !tokio::fs::try_exists(source)
            .await
            .map_err(|e| upload_failed(e.into()))?
        {
            return Err(upload_failed(SandcoreError::DiskImageMissing(
                source.to_path_buf(),
            )));
        }

        let key = self.storage_key(tenant);
        self.blobs
            .upload(source, &key)
            .await
            .map_err(upload_failed)?;

        tracing::info!(tenant = %tenant, "saved snapshot {}", key);
        Ok(true)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
