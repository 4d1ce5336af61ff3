use std::{path::PathBuf, sync::LazyLock};

use crate::utils::SANDCORE_HOME_DIR;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default number of vCPUs given to a sandbox.
pub const DEFAULT_VCPU_COUNT: u8 = 1;

/// The default guest memory in MiB.
pub const DEFAULT_MEM_SIZE_MIB: u32 = 512;

/// The largest vCPU count the hypervisor accepts.
pub const MAX_VCPU_COUNT: u8 = 32;

/// The default hypervisor executable, looked up on `PATH`.
pub const DEFAULT_HYPERVISOR_BINARY: &str = "firecracker";

/// The default guest kernel, relative to the home directory.
pub const DEFAULT_KERNEL_IMAGE_PATH: &str = "vmlinux";

/// The default shared base image, relative to the home directory.
pub const DEFAULT_BASE_IMAGE_PATH: &str = "rootfs.ext4";

/// The default kernel command line.
pub const DEFAULT_BOOT_ARGS: &str = "console=ttyS0 reboot=k panic=1 pci=off";

/// The id of the root drive.
pub const DEFAULT_ROOT_DRIVE_ID: &str = "rootfs";

/// The default storage key prefix under which tenant snapshots are kept.
pub const DEFAULT_KEY_PREFIX: &str = "tenants";

/// The default number of retries for transient HTTP storage failures.
pub const DEFAULT_STORAGE_MAX_RETRIES: u32 = 3;

/// How many times to poll for a control socket before giving up.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 50;

/// Delay between control socket polls, in milliseconds.
pub const DEFAULT_CONNECT_RETRY_INTERVAL_MS: u64 = 100;

/// How long a single control call may take, in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 5_000;

/// How long to wait after the terminate signal before force-killing, in milliseconds.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 10_000;

/// The path where sandcore keeps its state when `SANDCORE_HOME` is not set.
pub static DEFAULT_SANDCORE_HOME: LazyLock<PathBuf> = LazyLock::new(|| {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(SANDCORE_HOME_DIR)
});
