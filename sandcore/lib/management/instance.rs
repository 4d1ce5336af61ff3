use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use getset::Getters;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::runtime::{LifecycleState, SandboxProcess};

use super::TenantId;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A live sandbox, owned by the manager while it is registered.
#[derive(Debug)]
pub struct SandboxInstance {
    instance_id: Uuid,
    tenant_id: TenantId,
    process: SandboxProcess,
    vcpu_count: u8,
    mem_size_mib: u32,
    disk_image_path: PathBuf,
    started_at: DateTime<Utc>,
}

/// A point-in-time view of a [`SandboxInstance`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct SandboxInfo {
    /// The owning tenant.
    tenant_id: TenantId,

    /// Unique per boot. A restarted sandbox gets a new id.
    instance_id: Uuid,

    /// The hypervisor process id.
    pid: u32,

    /// The control socket.
    control_endpoint_path: PathBuf,

    /// Number of vCPUs.
    vcpu_count: u8,

    /// Guest memory in MiB.
    mem_size_mib: u32,

    /// The disk image the sandbox booted from.
    disk_image_path: PathBuf,

    /// The lifecycle state when the view was taken.
    lifecycle_state: LifecycleState,

    /// When the boot completed.
    started_at: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandboxInstance {
    /// Wraps a process that has just reached [`LifecycleState::Running`].
    pub fn new(
        process: SandboxProcess,
        vcpu_count: u8,
        mem_size_mib: u32,
        disk_image_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            tenant_id: process.get_tenant().clone(),
            process,
            vcpu_count,
            mem_size_mib,
            disk_image_path: disk_image_path.into(),
            started_at: Utc::now(),
        }
    }

    /// The owning tenant.
    pub fn get_tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// The disk image the sandbox booted from.
    pub fn get_disk_image_path(&self) -> &Path {
        &self.disk_image_path
    }

    /// The process backing this instance.
    pub fn process_mut(&mut self) -> &mut SandboxProcess {
        &mut self.process
    }

    /// Returns true if the process is alive.
    pub fn is_running(&mut self) -> bool {
        self.process.is_running()
    }

    /// Takes a snapshot view of this instance.
    pub fn info(&self) -> SandboxInfo {
        SandboxInfo {
            tenant_id: self.tenant_id.clone(),
            instance_id: self.instance_id,
            pid: self.process.pid().unwrap_or_default(),
            control_endpoint_path: self.process.get_endpoint().to_path_buf(),
            vcpu_count: self.vcpu_count,
            mem_size_mib: self.mem_size_mib,
            disk_image_path: self.disk_image_path.clone(),
            lifecycle_state: self.process.get_state(),
            started_at: self.started_at,
        }
    }
}
