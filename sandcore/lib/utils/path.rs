use std::path::{Path, PathBuf};

use crate::management::TenantId;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The sub directory of the user's home where sandcore keeps its state.
pub const SANDCORE_HOME_DIR: &str = ".sandcore";

/// The sub directory where control sockets are created.
pub const SOCKETS_SUBDIR: &str = "sockets";

/// The sub directory where per-tenant disk images are cached.
pub const IMAGES_SUBDIR: &str = "images";

/// The sub directory where hypervisor output is logged.
pub const LOGS_SUBDIR: &str = "logs";

/// The file name of a tenant's cached root filesystem.
pub const ROOTFS_FILENAME: &str = "rootfs.ext4";

/// The extension of control socket files.
pub const SOCKET_SUFFIX: &str = "sock";

/// The name of the config file looked up in the home directory.
pub const CONFIG_FILENAME: &str = "config.toml";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Computes every tenant-scoped path under a sandcore home directory.
///
/// ```text
/// <home>/sockets/<tenant>.sock
/// <home>/images/<tenant>/rootfs.ext4
/// <home>/logs/<tenant>.{stdout,stderr}.log
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPaths {
    home: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandboxPaths {
    /// Creates the layout rooted at `home`.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// The home directory.
    pub fn get_home(&self) -> &Path {
        &self.home
    }

    /// The directory holding control sockets.
    pub fn sockets_dir(&self) -> PathBuf {
        self.home.join(SOCKETS_SUBDIR)
    }

    /// The directory holding hypervisor logs.
    pub fn logs_dir(&self) -> PathBuf {
        self.home.join(LOGS_SUBDIR)
    }

    /// The control socket of `tenant`.
    pub fn socket_path(&self, tenant: &TenantId) -> PathBuf {
        self.sockets_dir()
            .join(format!("{}.{}", tenant, SOCKET_SUFFIX))
    }

    /// The image cache directory of `tenant`.
    pub fn image_dir(&self, tenant: &TenantId) -> PathBuf {
        self.home.join(IMAGES_SUBDIR).join(tenant.as_str())
    }

    /// The cached disk image of `tenant`.
    pub fn disk_image_path(&self, tenant: &TenantId) -> PathBuf {
        self.image_dir(tenant).join(ROOTFS_FILENAME)
    }

    /// The config file inside the home directory.
    pub fn config_path(&self) -> PathBuf {
        self.home.join(CONFIG_FILENAME)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_paths_layout() -> anyhow::Result<()> {
        let paths = SandboxPaths::new("/var/lib/sandcore");
        let alice = TenantId::new("alice")?;

        assert_eq!(
            paths.socket_path(&alice),
            Path::new("/var/lib/sandcore/sockets/alice.sock")
        );
        assert_eq!(
            paths.disk_image_path(&alice),
            Path::new("/var/lib/sandcore/images/alice/rootfs.ext4")
        );
        assert_eq!(paths.logs_dir(), Path::new("/var/lib/sandcore/logs"));
        assert_eq!(
            paths.config_path(),
            Path::new("/var/lib/sandcore/config.toml")
        );

        Ok(())
    }
}
