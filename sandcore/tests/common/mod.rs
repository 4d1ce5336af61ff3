#![allow(dead_code)]

pub mod hypervisor;
pub mod objects;

use std::{path::PathBuf, sync::Arc};

use sandcore::{
    config::{SandcoreConfig, StorageBackend, StorageConfig, TimeoutConfig},
    management::{InMemoryRegistry, SandboxManager},
    store::ImageStore,
};
use tempfile::TempDir;

pub use hypervisor::*;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

pub const BASE_IMAGE_CONTENTS: &[u8] = b"base-image:ext4";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A manager wired to a fake hypervisor and a filesystem blob store in a temp dir.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: SandcoreConfig,
    pub hypervisor: FakeHypervisor,
    pub manager: SandboxManager,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TestEnv {
    /// A fully provisioned environment: kernel and base image present.
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_hypervisor(FakeHypervisor::new(), true).await
    }

    /// An environment whose kernel image was never installed.
    pub async fn without_kernel() -> anyhow::Result<Self> {
        Self::with_hypervisor(FakeHypervisor::new(), false).await
    }

    pub async fn with_hypervisor(
        hypervisor: FakeHypervisor,
        install_kernel: bool,
    ) -> anyhow::Result<Self> {
        Self::build(hypervisor, install_kernel, true).await
    }

    /// A fully provisioned environment with snapshot storage disabled.
    pub async fn without_storage() -> anyhow::Result<Self> {
        Self::build(FakeHypervisor::new(), true, false).await
    }

    async fn build(
        hypervisor: FakeHypervisor,
        install_kernel: bool,
        storage_enabled: bool,
    ) -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        let home = dir.path().join("home");
        tokio::fs::create_dir_all(&home).await?;

        tokio::fs::write(home.join("rootfs.ext4"), BASE_IMAGE_CONTENTS).await?;
        if install_kernel {
            tokio::fs::write(home.join("vmlinux"), b"kernel").await?;
        }

        let config = SandcoreConfig::builder()
            .home_dir(&home)
            .storage(
                StorageConfig::builder()
                    .backend(if storage_enabled {
                        StorageBackend::Filesystem {
                            root: dir.path().join("blobs"),
                        }
                    } else {
                        StorageBackend::Disabled
                    })
                    .build(),
            )
            .timeouts(
                TimeoutConfig::builder()
                    .connect_attempts(20)
                    .connect_retry_interval_ms(10)
                    .call_timeout_ms(2_000)
                    .stop_timeout_ms(500)
                    .build(),
            )
            .build();

        let manager = Self::manager_for(&config, &hypervisor)?;

        Ok(Self {
            dir,
            config,
            hypervisor,
            manager,
        })
    }

    /// Builds a fresh manager (empty registry) over the same home, storage and hypervisor.
    pub fn manager_for(
        config: &SandcoreConfig,
        hypervisor: &FakeHypervisor,
    ) -> anyhow::Result<SandboxManager> {
        let images = ImageStore::from_config(config.get_storage(), config.paths())?;
        Ok(SandboxManager::new(
            config,
            images,
            Arc::new(hypervisor.clone()),
            Arc::new(InMemoryRegistry::new()),
        )?)
    }

    pub fn home(&self) -> PathBuf {
        self.config.get_home_dir().clone()
    }

    pub fn blob_path(&self, tenant: &str) -> PathBuf {
        self.dir
            .path()
            .join("blobs/tenants")
            .join(tenant)
            .join("rootfs-image")
    }
}
