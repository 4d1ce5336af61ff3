//! Sandcore configuration types and helpers.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use getset::Getters;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    utils::{self, SandboxPaths},
    SandcoreError, SandcoreResult,
};

use super::{
    DEFAULT_BASE_IMAGE_PATH, DEFAULT_BOOT_ARGS, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_CONNECT_ATTEMPTS,
    DEFAULT_CONNECT_RETRY_INTERVAL_MS, DEFAULT_HYPERVISOR_BINARY, DEFAULT_KERNEL_IMAGE_PATH,
    DEFAULT_KEY_PREFIX, DEFAULT_MEM_SIZE_MIB, DEFAULT_ROOT_DRIVE_ID, DEFAULT_SANDCORE_HOME,
    DEFAULT_STOP_TIMEOUT_MS, DEFAULT_STORAGE_MAX_RETRIES, DEFAULT_VCPU_COUNT, MAX_VCPU_COUNT,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The sandcore configuration.
///
/// Every field has a default, so an empty TOML document is a valid configuration. Relative
/// paths are resolved against `home_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct SandcoreConfig {
    /// Where sockets, cached images and logs live.
    #[builder(default = DEFAULT_SANDCORE_HOME.clone(), setter(into))]
    home_dir: PathBuf,

    /// The hypervisor process and boot parameters.
    #[builder(default)]
    hypervisor: HypervisorConfig,

    /// Resources given to each sandbox.
    #[builder(default)]
    resources: ResourceConfig,

    /// Image locations.
    #[builder(default)]
    images: ImageConfig,

    /// Snapshot storage.
    #[builder(default)]
    storage: StorageConfig,

    /// Timeouts for connecting, calling and stopping.
    #[builder(default)]
    timeouts: TimeoutConfig,
}

/// How to launch and boot the hypervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct HypervisorConfig {
    /// The hypervisor executable.
    #[builder(default = PathBuf::from(DEFAULT_HYPERVISOR_BINARY), setter(into))]
    binary: PathBuf,

    /// Extra arguments appended after `--api-sock <path>`.
    #[builder(default)]
    extra_args: Vec<String>,

    /// The guest kernel.
    #[builder(default = PathBuf::from(DEFAULT_KERNEL_IMAGE_PATH), setter(into))]
    kernel_image_path: PathBuf,

    /// The kernel command line.
    #[builder(default = DEFAULT_BOOT_ARGS.to_string(), setter(into))]
    boot_args: String,

    /// The id the root drive is attached under.
    #[builder(default = DEFAULT_ROOT_DRIVE_ID.to_string(), setter(into))]
    root_drive_id: String,
}

/// Resources given to each sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct ResourceConfig {
    /// Number of vCPUs.
    #[builder(default = DEFAULT_VCPU_COUNT)]
    vcpu_count: u8,

    /// Guest memory in MiB.
    #[builder(default = DEFAULT_MEM_SIZE_MIB)]
    mem_size_mib: u32,
}

/// Image locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct ImageConfig {
    /// The image new tenants are seeded from.
    #[builder(default = PathBuf::from(DEFAULT_BASE_IMAGE_PATH), setter(into))]
    base_image_path: PathBuf,
}

/// Snapshot storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct StorageConfig {
    /// Where snapshots go.
    #[builder(default)]
    backend: StorageBackend,

    /// Prefix of every snapshot key: `<prefix>/<tenant>/rootfs-image`.
    #[builder(default = DEFAULT_KEY_PREFIX.to_string(), setter(into))]
    key_prefix: String,
}

/// The blob storage backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageBackend {
    /// Snapshots are neither restored nor saved.
    #[default]
    Disabled,

    /// Snapshots are files under `root`.
    Filesystem {
        /// The directory keys are resolved against.
        root: PathBuf,
    },

    /// Snapshots are objects behind a plain HTTP object API (`GET`/`PUT`/`HEAD` on
    /// `<base_url>/<key>`).
    Http {
        /// The bucket URL keys are appended to.
        base_url: String,

        /// Sent as `Authorization: Bearer <token>` when set.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bearer_token: Option<String>,

        /// Retries for transient failures on reads.
        #[serde(default = "StorageBackend::default_max_retries")]
        max_retries: u32,
    },
}

/// Timeouts for connecting, calling and stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct TimeoutConfig {
    /// How many times to poll for the control socket.
    #[builder(default = DEFAULT_CONNECT_ATTEMPTS)]
    connect_attempts: u32,

    /// Delay between polls, in milliseconds.
    #[builder(default = DEFAULT_CONNECT_RETRY_INTERVAL_MS)]
    connect_retry_interval_ms: u64,

    /// Per control call, in milliseconds.
    #[builder(default = DEFAULT_CALL_TIMEOUT_MS)]
    call_timeout_ms: u64,

    /// Grace period between terminate and kill, in milliseconds.
    #[builder(default = DEFAULT_STOP_TIMEOUT_MS)]
    stop_timeout_ms: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandcoreConfig {
    /// Reads and validates a TOML config file.
    pub async fn load(path: impl AsRef<Path>) -> SandcoreResult<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        tracing::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Loads `<home>/config.toml` if it exists, falling back to defaults.
    ///
    /// The home directory comes from `SANDCORE_HOME` or the default, and always wins over a
    /// `home_dir` set inside the file.
    pub async fn load_default() -> SandcoreResult<Self> {
        let home = utils::get_sandcore_home_path();
        let config_path = SandboxPaths::new(&home).config_path();

        let mut config = if tokio::fs::try_exists(&config_path).await? {
            Self::load(&config_path).await?
        } else {
            Self::default()
        };

        config.home_dir = home;
        Ok(config)
    }

    /// Checks the configuration for values the hypervisor or storage would reject.
    pub fn validate(&self) -> SandcoreResult<()> {
        let resources = &self.resources;
        if resources.vcpu_count == 0 || resources.vcpu_count > MAX_VCPU_COUNT {
            return Err(SandcoreError::InvalidConfig(format!(
                "resources.vcpu_count must be between 1 and {}, got {}",
                MAX_VCPU_COUNT, resources.vcpu_count
            )));
        }

        if resources.mem_size_mib == 0 {
            return Err(SandcoreError::InvalidConfig(
                "resources.mem_size_mib must be greater than 0".to_string(),
            ));
        }

        if self.timeouts.connect_attempts == 0 {
            return Err(SandcoreError::InvalidConfig(
                "timeouts.connect_attempts must be greater than 0".to_string(),
            ));
        }

        sandutils::validate_path_segment(&self.hypervisor.root_drive_id).map_err(|e| {
            SandcoreError::InvalidConfig(format!("hypervisor.root_drive_id: {}", e))
        })?;

        if self.storage.key_prefix.is_empty() {
            return Err(SandcoreError::InvalidConfig(
                "storage.key_prefix must not be empty".to_string(),
            ));
        }

        for segment in self.storage.key_prefix.split('/') {
            sandutils::validate_path_segment(segment).map_err(|e| {
                SandcoreError::InvalidConfig(format!("storage.key_prefix: {}", e))
            })?;
        }

        if let StorageBackend::Http { base_url, .. } = &self.storage.backend {
            let url = Url::parse(base_url).map_err(|e| {
                SandcoreError::InvalidConfig(format!("storage.backend.base_url: {}", e))
            })?;

            if !matches!(url.scheme(), "http" | "https") {
                return Err(SandcoreError::InvalidConfig(format!(
                    "storage.backend.base_url must be http or https, got {}",
                    url.scheme()
                )));
            }
        }

        Ok(())
    }

    /// Joins a relative path onto the home directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.home_dir.join(path)
        }
    }

    /// The resolved guest kernel path.
    pub fn kernel_image_path(&self) -> PathBuf {
        self.resolve(&self.hypervisor.kernel_image_path)
    }

    /// The resolved base image path.
    pub fn base_image_path(&self) -> PathBuf {
        self.resolve(&self.images.base_image_path)
    }

    /// The hypervisor binary, resolved against the home directory if it is a relative path with
    /// more than one component. A bare name is left for `PATH` lookup.
    pub fn resolve_binary(&self) -> PathBuf {
        let binary = self.get_hypervisor().get_binary();
        if binary.components().count() > 1 {
            self.resolve(binary)
        } else {
            binary.clone()
        }
    }

    /// The tenant path layout under the home directory.
    pub fn paths(&self) -> SandboxPaths {
        SandboxPaths::new(&self.home_dir)
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml(&self) -> SandcoreResult<String> {
        toml::to_string_pretty(self).map_err(SandcoreError::custom)
    }
}

impl StorageBackend {
    fn default_max_retries() -> u32 {
        DEFAULT_STORAGE_MAX_RETRIES
    }
}

impl TimeoutConfig {
    /// Delay between control socket polls.
    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_millis(self.connect_retry_interval_ms)
    }

    /// Per control call timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Grace period between terminate and kill.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for SandcoreConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() -> anyhow::Result<()> {
        let config: SandcoreConfig = toml::from_str("")?;
        assert_eq!(config, SandcoreConfig::default());

        assert_eq!(*config.get_resources().get_vcpu_count(), 1);
        assert_eq!(*config.get_resources().get_mem_size_mib(), 512);
        assert_eq!(
            config.get_hypervisor().get_boot_args(),
            "console=ttyS0 reboot=k panic=1 pci=off"
        );
        assert_eq!(config.get_hypervisor().get_root_drive_id(), "rootfs");
        assert_eq!(*config.get_storage().get_backend(), StorageBackend::Disabled);
        assert_eq!(config.get_storage().get_key_prefix(), "tenants");
        assert_eq!(*config.get_timeouts().get_connect_attempts(), 50);
        assert_eq!(
            config.get_timeouts().connect_retry_interval(),
            Duration::from_millis(100)
        );
        assert_eq!(config.get_timeouts().stop_timeout(), Duration::from_secs(10));
        config.validate()?;

        Ok(())
    }

    #[test]
    fn test_parse_full_config() -> anyhow::Result<()> {
        let config: SandcoreConfig = toml::from_str(
            r#"
            home_dir = "/srv/sandcore"

            [hypervisor]
            binary = "/usr/local/bin/firecracker"
            extra_args = ["--level", "Debug"]
            kernel_image_path = "kernels/vmlinux-6.1"

            [resources]
            vcpu_count = 2
            mem_size_mib = 1024

            [images]
            base_image_path = "/srv/images/base.ext4"

            [storage]
            key_prefix = "prod/tenants"

            [storage.backend]
            kind = "http"
            base_url = "http://127.0.0.1:9000/snapshots"
            bearer_token = "secret"

            [timeouts]
            call_timeout_ms = 250
            "#,
        )?;
        config.validate()?;

        assert_eq!(config.get_hypervisor().get_extra_args(), &["--level", "Debug"]);
        assert_eq!(
            config.kernel_image_path(),
            Path::new("/srv/sandcore/kernels/vmlinux-6.1")
        );
        assert_eq!(config.base_image_path(), Path::new("/srv/images/base.ext4"));
        assert_eq!(*config.get_resources().get_vcpu_count(), 2);
        assert_eq!(
            *config.get_storage().get_backend(),
            StorageBackend::Http {
                base_url: "http://127.0.0.1:9000/snapshots".to_string(),
                bearer_token: Some("secret".to_string()),
                max_retries: 3,
            }
        );
        assert_eq!(config.get_timeouts().call_timeout(), Duration::from_millis(250));
        assert_eq!(*config.get_timeouts().get_connect_attempts(), 50);

        Ok(())
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_cpus = SandcoreConfig::builder()
            .resources(ResourceConfig::builder().vcpu_count(0).build())
            .build();
        assert!(matches!(
            zero_cpus.validate(),
            Err(SandcoreError::InvalidConfig(_))
        ));

        let zero_mem = SandcoreConfig::builder()
            .resources(ResourceConfig::builder().mem_size_mib(0).build())
            .build();
        assert!(zero_mem.validate().is_err());

        let zero_attempts = SandcoreConfig::builder()
            .timeouts(TimeoutConfig::builder().connect_attempts(0).build())
            .build();
        assert!(zero_attempts.validate().is_err());

        let empty_prefix = SandcoreConfig::builder()
            .storage(StorageConfig::builder().key_prefix("").build())
            .build();
        assert!(empty_prefix.validate().is_err());

        let escaping_prefix = SandcoreConfig::builder()
            .storage(StorageConfig::builder().key_prefix("tenants/../etc").build())
            .build();
        assert!(escaping_prefix.validate().is_err());

        let bad_url = SandcoreConfig::builder()
            .storage(
                StorageConfig::builder()
                    .backend(StorageBackend::Http {
                        base_url: "ftp://example.com".to_string(),
                        bearer_token: None,
                        max_retries: 3,
                    })
                    .build(),
            )
            .build();
        assert!(bad_url.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_file() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.toml");

        tokio::fs::write(&path, "[resources]\nvcpu_count = 0\n").await?;
        assert!(matches!(
            SandcoreConfig::load(&path).await,
            Err(SandcoreError::InvalidConfig(_))
        ));

        tokio::fs::write(&path, "[resources\n").await?;
        assert!(matches!(
            SandcoreConfig::load(&path).await,
            Err(SandcoreError::ConfigParse(_))
        ));

        Ok(())
    }

    #[test]
    fn test_config_toml_round_trip() -> anyhow::Result<()> {
        let config = SandcoreConfig::builder()
            .home_dir("/tmp/sandcore")
            .storage(
                StorageConfig::builder()
                    .backend(StorageBackend::Filesystem {
                        root: PathBuf::from("/tmp/blobs"),
                    })
                    .build(),
            )
            .build();

        let parsed: SandcoreConfig = toml::from_str(&config.to_toml()?)?;
        assert_eq!(parsed, config);

        Ok(())
    }
}
