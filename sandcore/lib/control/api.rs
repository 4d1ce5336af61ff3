use std::path::PathBuf;

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Path of the boot source resource.
pub const BOOT_SOURCE_PATH: &str = "/boot-source";

/// Path of the machine configuration resource.
pub const MACHINE_CONFIG_PATH: &str = "/machine-config";

/// Path of the instance actions resource.
pub const ACTIONS_PATH: &str = "/actions";

/// Prefix of the drive resources.
pub const DRIVES_PATH: &str = "/drives";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The kernel and command line a sandbox boots with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct BootSource {
    /// Host path of the guest kernel.
    #[builder(setter(into))]
    kernel_image_path: PathBuf,

    /// Kernel command line.
    #[builder(setter(into))]
    boot_args: String,
}

/// A block device attached to a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Drive {
    /// Identifier, also the last segment of the resource path.
    #[builder(setter(into))]
    drive_id: String,

    /// Host path of the backing file.
    #[builder(setter(into))]
    path_on_host: PathBuf,

    /// Whether the guest mounts this drive as `/`.
    #[builder(default)]
    is_root_device: bool,

    /// Whether the guest may write to the drive.
    #[builder(default)]
    is_read_only: bool,
}

/// The resources allocated to a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct MachineConfiguration {
    /// Number of vCPUs.
    vcpu_count: u8,

    /// Guest memory in MiB.
    mem_size_mib: u32,
}

/// The instance action kinds the manager issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    /// Boots the configured guest.
    InstanceStart,
}

/// Body of an `/actions` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceActionInfo {
    /// The action to perform.
    pub action_type: ActionType,
}

/// Error body returned by the hypervisor on a non-2xx response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Human readable description of what went wrong.
    #[serde(default)]
    pub fault_message: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Drive {
    /// The resource path this drive is configured at.
    pub fn resource_path(&self) -> String {
        format!("{}/{}", DRIVES_PATH, self.drive_id)
    }
}

impl InstanceActionInfo {
    /// The action that boots the guest.
    pub fn instance_start() -> Self {
        Self {
            action_type: ActionType::InstanceStart,
        }
    }
}

impl Fault {
    /// Extracts the fault message from a response body, falling back to the raw body text.
    pub fn from_body(body: &[u8]) -> String {
        match serde_json::from_slice::<Fault>(body) {
            Ok(fault) if !fault.fault_message.is_empty() => fault.fault_message,
            _ => String::from_utf8_lossy(body).trim().to_string(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_payloads_serialize_to_wire_names() -> anyhow::Result<()> {
        let boot = BootSource::builder()
            .kernel_image_path("/var/lib/sandcore/vmlinux")
            .boot_args("console=ttyS0")
            .build();
        assert_eq!(
            serde_json::to_value(&boot)?,
            json!({"kernel_image_path": "/var/lib/sandcore/vmlinux", "boot_args": "console=ttyS0"})
        );

        let drive = Drive::builder()
            .drive_id("rootfs")
            .path_on_host("/images/alice/rootfs.ext4")
            .is_root_device(true)
            .build();
        assert_eq!(drive.resource_path(), "/drives/rootfs");
        assert_eq!(
            serde_json::to_value(&drive)?,
            json!({
                "drive_id": "rootfs",
                "path_on_host": "/images/alice/rootfs.ext4",
                "is_root_device": true,
                "is_read_only": false,
            })
        );

        let machine = MachineConfiguration::builder()
            .vcpu_count(2)
            .mem_size_mib(512)
            .build();
        assert_eq!(
            serde_json::to_value(machine)?,
            json!({"vcpu_count": 2, "mem_size_mib": 512})
        );

        assert_eq!(
            serde_json::to_value(InstanceActionInfo::instance_start())?,
            json!({"action_type": "InstanceStart"})
        );

        Ok(())
    }

    #[test]
    fn test_fault_from_body() {
        assert_eq!(
            Fault::from_body(br#"{"fault_message":"Kernel file missing"}"#),
            "Kernel file missing"
        );
        assert_eq!(Fault::from_body(b"  plain text\n"), "plain text");
        assert_eq!(Fault::from_body(b""), "");
    }
}
