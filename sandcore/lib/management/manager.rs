use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use sandutils::{NativeSupervisor, ProcessSupervisor};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    config::SandcoreConfig,
    runtime::{LaunchConfig, SandboxProcess},
    store::ImageStore,
    utils::SandboxPaths,
    SandcoreError, SandcoreResult,
};

use super::{
    InMemoryRegistry, SandboxInfo, SandboxInstance, SandboxRegistry, TenantId, TenantLocks,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Maps tenants to their sandboxes.
///
/// Every operation on a tenant runs under that tenant's lock, so concurrent calls for the same
/// tenant are serialized while different tenants proceed in parallel. Boots and stops run on
/// their own task: dropping the caller's future does not interrupt them halfway.
///
/// Cloning is cheap; clones share the same registry and locks.
#[derive(Debug, Clone)]
pub struct SandboxManager {
    inner: Arc<ManagerInner>,
}

#[derive(Debug)]
struct ManagerInner {
    registry: Arc<dyn SandboxRegistry>,
    images: ImageStore,
    supervisor: Arc<dyn ProcessSupervisor>,
    launch: LaunchConfig,
    paths: SandboxPaths,
    base_image_path: PathBuf,
    vcpu_count: u8,
    mem_size_mib: u32,
    stop_timeout: Duration,
    locks: TenantLocks,
}

/// Whether a tenant has a running sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    /// A sandbox process is alive.
    Running,

    /// No sandbox process exists.
    Absent,
}

/// What [`SandboxManager::stop`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The tenant had no live sandbox. Nothing was touched.
    NotRunning,

    /// The sandbox was stopped and unregistered.
    Stopped {
        /// Whether a snapshot was uploaded.
        saved: bool,
    },
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandboxManager {
    /// Creates a manager from its collaborators.
    pub fn new(
        config: &SandcoreConfig,
        images: ImageStore,
        supervisor: Arc<dyn ProcessSupervisor>,
        registry: Arc<dyn SandboxRegistry>,
    ) -> SandcoreResult<Self> {
        config.validate()?;

        let resources = config.get_resources();
        Ok(Self {
            inner: Arc::new(ManagerInner {
                registry,
                images,
                supervisor,
                launch: LaunchConfig::from_config(config),
                paths: config.paths(),
                base_image_path: config.base_image_path(),
                vcpu_count: *resources.get_vcpu_count(),
                mem_size_mib: *resources.get_mem_size_mib(),
                stop_timeout: config.get_timeouts().stop_timeout(),
                locks: TenantLocks::new(),
            }),
        })
    }

    /// Creates a manager that spawns real hypervisor processes and keeps instances in memory.
    pub fn from_config(config: &SandcoreConfig) -> SandcoreResult<Self> {
        let images = ImageStore::from_config(config.get_storage(), config.paths())?;
        Self::new(
            config,
            images,
            Arc::new(NativeSupervisor::new()),
            Arc::new(InMemoryRegistry::new()),
        )
    }

    /// The image store snapshots go through.
    pub fn get_images(&self) -> &ImageStore {
        &self.inner.images
    }

    /// Returns `tenant`'s running sandbox, booting one if there is none.
    ///
    /// A new sandbox boots from the tenant's snapshot, or from a copy of the base image if there
    /// is no snapshot. If the boot fails nothing is registered and no process is left behind.
    pub async fn create_or_get(&self, tenant: &str) -> SandcoreResult<SandboxInfo> {
        let tenant = TenantId::new(tenant)?;
        let manager = self.clone();

        tokio::spawn(async move { manager.create_or_get_locked(tenant).await }).await?
    }

    /// Stops `tenant`'s sandbox and, if `save` is set, uploads its disk image.
    ///
    /// A tenant without a live sandbox is a successful no-op. The tenant is unregistered even
    /// when the upload fails; the failure is then returned as
    /// [`SandcoreError::SnapshotUploadFailed`].
    pub async fn stop(&self, tenant: &str, save: bool) -> SandcoreResult<StopOutcome> {
        let tenant = TenantId::new(tenant)?;
        let manager = self.clone();

        tokio::spawn(async move { manager.stop_locked(tenant, save).await }).await?
    }

    /// Returns whether `tenant` has a running sandbox.
    pub async fn status(&self, tenant: &str) -> SandcoreResult<SandboxStatus> {
        Ok(match self.get(tenant).await? {
            Some(_) => SandboxStatus::Running,
            None => SandboxStatus::Absent,
        })
    }

    /// Returns `tenant`'s running sandbox, if any.
    pub async fn get(&self, tenant: &str) -> SandcoreResult<Option<SandboxInfo>> {
        let tenant = TenantId::new(tenant)?;
        let Some(instance) = self.inner.registry.get(&tenant).await else {
            return Ok(None);
        };

        let mut instance = instance.lock().await;
        Ok(instance.is_running().then(|| instance.info()))
    }

    /// Returns every running sandbox, ordered by tenant.
    pub async fn list(&self) -> Vec<SandboxInfo> {
        let mut infos = Vec::new();
        for tenant in self.inner.registry.tenants().await {
            if let Some(instance) = self.inner.registry.get(&tenant).await {
                let mut instance = instance.lock().await;
                if instance.is_running() {
                    infos.push(instance.info());
                }
            }
        }

        infos
    }

    /// Stops every registered sandbox.
    ///
    /// All tenants are attempted; the first failure is returned afterwards.
    pub async fn shutdown(&self, save: bool) -> SandcoreResult<()> {
        let mut first_error = None;

        for tenant in self.inner.registry.tenants().await {
            match self.stop(tenant.as_str(), save).await {
                Ok(outcome) => tracing::debug!(tenant = %tenant, "shutdown: {:?}", outcome),
                Err(e) => {
                    tracing::error!(tenant = %tenant, "failed to stop sandbox: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn create_or_get_locked(&self, tenant: TenantId) -> SandcoreResult<SandboxInfo> {
        let inner = &self.inner;
        let _guard = inner.locks.lock(&tenant).await;

        if let Some(existing) = inner.registry.get(&tenant).await {
            let mut instance = existing.lock().await;
            if instance.is_running() {
                tracing::debug!(tenant = %tenant, "sandbox already running");
                return Ok(instance.info());
            }

            tracing::warn!(tenant = %tenant, "sandbox process exited on its own, replacing it");
            if let Err(e) = instance.process_mut().stop(inner.stop_timeout).await {
                tracing::warn!(tenant = %tenant, "failed to clean up exited sandbox: {}", e);
            }

            drop(instance);
            inner.registry.remove(&tenant).await;
        }

        let disk_image_path = self.prepare_disk(&tenant).await?;

        let mut process = SandboxProcess::new(
            tenant.clone(),
            inner.paths.socket_path(&tenant),
            inner.launch.clone(),
            inner.supervisor.clone(),
        );
        process
            .start(&disk_image_path, inner.vcpu_count, inner.mem_size_mib)
            .await?;

        let instance = SandboxInstance::new(
            process,
            inner.vcpu_count,
            inner.mem_size_mib,
            disk_image_path,
        );
        let info = instance.info();
        inner
            .registry
            .insert(tenant.clone(), Arc::new(Mutex::new(instance)))
            .await;

        tracing::info!(
            tenant = %tenant,
            pid = info.get_pid(),
            "sandbox {} registered",
            info.get_instance_id()
        );
        Ok(info)
    }

    async fn stop_locked(&self, tenant: TenantId, save: bool) -> SandcoreResult<StopOutcome> {
        let inner = &self.inner;
        let _guard = inner.locks.lock(&tenant).await;

        let Some(existing) = inner.registry.get(&tenant).await else {
            tracing::debug!(tenant = %tenant, "no sandbox to stop");
            return Ok(StopOutcome::NotRunning);
        };

        let mut instance = existing.lock().await;
        let stopped = instance.process_mut().stop(inner.stop_timeout).await;
        inner.registry.remove(&tenant).await;
        stopped?;

        tracing::info!(tenant = %tenant, "sandbox stopped");

        let saved = if save {
            inner
                .images
                .save(&tenant, instance.get_disk_image_path())
                .await?
        } else {
            false
        };

        Ok(StopOutcome::Stopped { saved })
    }

    /// Puts the tenant's disk image in place: the snapshot if there is one, otherwise a fresh
    /// copy of the base image.
    ///
    /// Without snapshot storage the local disk is the only copy, so an existing one is kept.
    async fn prepare_disk(&self, tenant: &TenantId) -> SandcoreResult<PathBuf> {
        let inner = &self.inner;
        let snapshot = inner.images.snapshot(tenant);
        let disk_image_path = snapshot.get_local_cache_path().clone();

        if !inner.images.is_enabled() && tokio::fs::try_exists(&disk_image_path).await? {
            tracing::info!(
                tenant = %tenant,
                "reusing local disk image {}",
                disk_image_path.display()
            );
            return Ok(disk_image_path);
        }

        if inner.images.restore(tenant, &disk_image_path).await? {
            return Ok(disk_image_path);
        }

        tracing::info!(
            tenant = %tenant,
            "seeding disk image from {}",
            inner.base_image_path.display()
        );
        copy_base_image(&inner.base_image_path, &disk_image_path).await?;

        Ok(disk_image_path)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

async fn copy_base_image(base: &Path, destination: &Path) -> SandcoreResult<()> {
    if !tokio::fs::try_exists(base).await? {
        return Err(SandcoreError::BaseImageNotFound(base.to_path_buf()));
    }

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let staging = crate::store::temp_sibling(destination);
    if let Err(e) = tokio::fs::copy(base, &staging).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(e.into());
    }

    tokio::fs::rename(&staging, destination).await?;
    Ok(())
}
