use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use getset::Getters;
use sandutils::{shutdown_process, ProcessHandle, ProcessSupervisor, Shutdown, SpawnSpec};
use typed_builder::TypedBuilder;

use crate::{
    config::{
        SandcoreConfig, DEFAULT_BOOT_ARGS, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_CONNECT_ATTEMPTS,
        DEFAULT_CONNECT_RETRY_INTERVAL_MS, DEFAULT_HYPERVISOR_BINARY, DEFAULT_ROOT_DRIVE_ID,
    },
    control::{
        BootSource, ControlChannel, Drive, InstanceActionInfo, MachineConfiguration, ACTIONS_PATH,
        BOOT_SOURCE_PATH, MACHINE_CONFIG_PATH,
    },
    management::TenantId,
    SandcoreError, SandcoreResult,
};

use super::{BootStep, LifecycleState};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How to launch a hypervisor process and drive it to a running guest.
#[derive(Debug, Clone, PartialEq, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct LaunchConfig {
    /// The hypervisor executable.
    #[builder(default = PathBuf::from(DEFAULT_HYPERVISOR_BINARY), setter(into))]
    binary: PathBuf,

    /// Arguments appended after `--api-sock <path>`.
    #[builder(default)]
    extra_args: Vec<String>,

    /// The guest kernel.
    #[builder(setter(into))]
    kernel_image_path: PathBuf,

    /// The kernel command line.
    #[builder(default = DEFAULT_BOOT_ARGS.to_string(), setter(into))]
    boot_args: String,

    /// The id the root drive is attached under.
    #[builder(default = DEFAULT_ROOT_DRIVE_ID.to_string(), setter(into))]
    root_drive_id: String,

    /// How many times to poll for the control socket.
    #[builder(default = DEFAULT_CONNECT_ATTEMPTS)]
    connect_attempts: u32,

    /// Delay between polls.
    #[builder(default = Duration::from_millis(DEFAULT_CONNECT_RETRY_INTERVAL_MS))]
    connect_retry_interval: Duration,

    /// Per control call.
    #[builder(default = Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS))]
    call_timeout: Duration,

    /// Where hypervisor stdout/stderr is logged. Only `tracing` gets it when unset.
    #[builder(default, setter(strip_option, into))]
    log_dir: Option<PathBuf>,
}

/// The OS process hosting one tenant's sandbox.
///
/// Owns the process handle and the control channel. A boot either reaches
/// [`LifecycleState::Running`] or leaves no process behind.
pub struct SandboxProcess {
    tenant: TenantId,
    endpoint: PathBuf,
    launch: LaunchConfig,
    supervisor: Arc<dyn ProcessSupervisor>,
    handle: Option<Box<dyn ProcessHandle>>,
    channel: Option<ControlChannel>,
    state: LifecycleState,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LaunchConfig {
    /// Derives the launch settings from the sandcore configuration.
    pub fn from_config(config: &SandcoreConfig) -> Self {
        let hypervisor = config.get_hypervisor();
        let timeouts = config.get_timeouts();

        Self::builder()
            .binary(config.resolve_binary())
            .extra_args(hypervisor.get_extra_args().clone())
            .kernel_image_path(config.kernel_image_path())
            .boot_args(hypervisor.get_boot_args())
            .root_drive_id(hypervisor.get_root_drive_id())
            .connect_attempts(*timeouts.get_connect_attempts())
            .connect_retry_interval(timeouts.connect_retry_interval())
            .call_timeout(timeouts.call_timeout())
            .log_dir(config.paths().logs_dir())
            .build()
    }
}

impl SandboxProcess {
    /// Creates an absent process for `tenant` that will serve its control API at `endpoint`.
    pub fn new(
        tenant: TenantId,
        endpoint: impl Into<PathBuf>,
        launch: LaunchConfig,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> Self {
        Self {
            tenant,
            endpoint: endpoint.into(),
            launch,
            supervisor,
            handle: None,
            channel: None,
            state: LifecycleState::Absent,
        }
    }

    /// The owning tenant.
    pub fn get_tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// The control socket path.
    pub fn get_endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// The current lifecycle state.
    pub fn get_state(&self) -> LifecycleState {
        self.state
    }

    /// The OS process id, while a process exists.
    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(|h| h.pid())
    }

    /// Returns true if a process exists and has not exited.
    pub fn is_running(&mut self) -> bool {
        self.handle.as_mut().is_some_and(|h| h.is_alive())
    }

    /// Spawns the hypervisor and boots the guest from `disk_image_path`.
    ///
    /// The control calls run in a fixed order: boot source, root drive, machine configuration,
    /// start. If any of them fails the process is killed, the socket removed, and
    /// [`SandcoreError::BootFailed`] returned.
    pub async fn start(
        &mut self,
        disk_image_path: &Path,
        vcpu_count: u8,
        mem_size_mib: u32,
    ) -> SandcoreResult<()> {
        if !self.state.can_transition_to(LifecycleState::Spawning) {
            return Err(SandcoreError::InvalidLifecycleTransition {
                from: self.state,
                to: LifecycleState::Spawning,
            });
        }

        if !tokio::fs::try_exists(disk_image_path).await? {
            return Err(SandcoreError::DiskImageMissing(
                disk_image_path.to_path_buf(),
            ));
        }

        self.transition(LifecycleState::Spawning)?;

        if let Err(e) = self.prepare_endpoint().await {
            self.state = LifecycleState::Absent;
            return Err(e);
        }

        let spec = self.spawn_spec();
        match self.supervisor.spawn(&spec).await {
            Ok(handle) => {
                tracing::info!(
                    tenant = %self.tenant,
                    pid = handle.pid(),
                    "spawned sandbox process"
                );
                self.handle = Some(handle);
            }
            Err(source) => {
                self.state = LifecycleState::Absent;
                return Err(SandcoreError::ProcessSpawnFailure {
                    program: self.launch.binary.clone(),
                    source,
                });
            }
        }

        self.transition(LifecycleState::ConfiguringBoot)?;

        match self.configure(disk_image_path, vcpu_count, mem_size_mib).await {
            Ok(channel) => {
                self.channel = Some(channel);
                self.transition(LifecycleState::Running)?;
                tracing::info!(tenant = %self.tenant, "sandbox running");
                Ok(())
            }
            Err((step, source)) => {
                tracing::error!(tenant = %self.tenant, "boot failed at {}: {}", step, source);
                self.abort().await;
                Err(SandcoreError::BootFailed {
                    tenant: self.tenant.to_string(),
                    step,
                    source: Box::new(source),
                })
            }
        }
    }

    /// Terminates the process, force-killing it if it outlives `timeout`.
    ///
    /// The control socket is removed whatever the outcome.
    pub async fn stop(&mut self, timeout: Duration) -> SandcoreResult<()> {
        self.channel = None;

        let Some(mut handle) = self.handle.take() else {
            self.remove_endpoint().await;
            self.state = LifecycleState::Absent;
            return Ok(());
        };

        self.transition(LifecycleState::Stopping)?;

        let outcome = shutdown_process(handle.as_mut(), timeout).await;
        self.remove_endpoint().await;
        self.state = LifecycleState::Absent;

        match outcome? {
            Shutdown::AlreadyExited(exit) => {
                tracing::warn!(tenant = %self.tenant, "sandbox process had already exited: {}", exit)
            }
            Shutdown::Graceful(exit) => {
                tracing::info!(tenant = %self.tenant, "sandbox process stopped: {}", exit)
            }
            Shutdown::Forced(exit) => {
                tracing::warn!(tenant = %self.tenant, "sandbox process force-killed: {}", exit)
            }
        }

        Ok(())
    }

    /// The control channel of a running sandbox.
    ///
    /// Fails with [`SandcoreError::SandboxNotRunning`] once the process has exited or its socket
    /// is gone.
    pub fn control(&mut self) -> SandcoreResult<&mut ControlChannel> {
        if !self.is_running() || !self.endpoint.exists() {
            return Err(SandcoreError::SandboxNotRunning(self.tenant.to_string()));
        }

        self.channel
            .as_mut()
            .ok_or_else(|| SandcoreError::SandboxNotRunning(self.tenant.to_string()))
    }

    fn transition(&mut self, next: LifecycleState) -> SandcoreResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(SandcoreError::InvalidLifecycleTransition {
                from: self.state,
                to: next,
            });
        }

        tracing::debug!(tenant = %self.tenant, "{} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    fn spawn_spec(&self) -> SpawnSpec {
        let mut spec = SpawnSpec::new(&self.launch.binary, self.tenant.as_str())
            .args(["--api-sock".to_string(), self.endpoint.display().to_string()])
            .args(self.launch.extra_args.iter().cloned());

        if let Some(log_dir) = &self.launch.log_dir {
            spec = spec.log_dir(log_dir);
        }

        spec
    }

    async fn prepare_endpoint(&self) -> SandcoreResult<()> {
        if let Some(parent) = self.endpoint.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match tokio::fs::remove_file(&self.endpoint).await {
            Ok(()) => {
                tracing::warn!(
                    tenant = %self.tenant,
                    "removed stale control socket {}",
                    self.endpoint.display()
                );
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn configure(
        &mut self,
        disk_image_path: &Path,
        vcpu_count: u8,
        mem_size_mib: u32,
    ) -> Result<ControlChannel, (BootStep, SandcoreError)> {
        let mut channel = ControlChannel::connect(
            &self.endpoint,
            self.launch.connect_attempts,
            self.launch.connect_retry_interval,
        )
        .await
        .map_err(|e| (BootStep::Connect, e))?
        .with_call_timeout(self.launch.call_timeout);

        let boot_source = BootSource::builder()
            .kernel_image_path(&self.launch.kernel_image_path)
            .boot_args(&self.launch.boot_args)
            .build();
        channel
            .put(BOOT_SOURCE_PATH, &boot_source)
            .await
            .map_err(|e| (BootStep::BootSource, e))?;

        let drive = Drive::builder()
            .drive_id(&self.launch.root_drive_id)
            .path_on_host(disk_image_path)
            .is_root_device(true)
            .is_read_only(false)
            .build();
        channel
            .put(&drive.resource_path(), &drive)
            .await
            .map_err(|e| (BootStep::RootDrive, e))?;

        let machine = MachineConfiguration::builder()
            .vcpu_count(vcpu_count)
            .mem_size_mib(mem_size_mib)
            .build();
        channel
            .put(MACHINE_CONFIG_PATH, &machine)
            .await
            .map_err(|e| (BootStep::MachineConfig, e))?;

        channel
            .put(ACTIONS_PATH, &InstanceActionInfo::instance_start())
            .await
            .map_err(|e| (BootStep::InstanceStart, e))?;

        Ok(channel)
    }

    /// Kills whatever a failed boot left behind.
    async fn abort(&mut self) {
        self.channel = None;

        if let Some(mut handle) = self.handle.take() {
            if let Err(e) = handle.kill().await {
                tracing::error!(tenant = %self.tenant, "failed to kill sandbox process: {}", e);
            }
            if let Err(e) = handle.wait().await {
                tracing::error!(tenant = %self.tenant, "failed to reap sandbox process: {}", e);
            }
        }

        self.remove_endpoint().await;
        self.state = LifecycleState::Absent;
    }

    async fn remove_endpoint(&self) {
        match tokio::fs::remove_file(&self.endpoint).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                tenant = %self.tenant,
                "failed to remove control socket {}: {}",
                self.endpoint.display(),
                e
            ),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Debug for SandboxProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxProcess")
            .field("tenant", &self.tenant)
            .field("endpoint", &self.endpoint)
            .field("pid", &self.pid())
            .field("state", &self.state)
            .finish()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use sandutils::NativeSupervisor;
    use tempfile::TempDir;

    use super::*;

    fn launch(binary: &str) -> LaunchConfig {
        LaunchConfig::builder()
            .binary(binary)
            .kernel_image_path("/nonexistent/vmlinux")
            .connect_attempts(3)
            .connect_retry_interval(Duration::from_millis(20))
            .build()
    }

    #[test]
    fn test_launch_config_from_config() {
        let config = SandcoreConfig::builder().home_dir("/srv/sandcore").build();
        let launch = LaunchConfig::from_config(&config);

        assert_eq!(launch.get_binary(), Path::new("firecracker"));
        assert_eq!(
            launch.get_kernel_image_path(),
            Path::new("/srv/sandcore/vmlinux")
        );
        assert_eq!(launch.get_boot_args(), DEFAULT_BOOT_ARGS);
        assert_eq!(launch.get_root_drive_id(), "rootfs");
        assert_eq!(*launch.get_connect_attempts(), 50);
        assert_eq!(launch.get_log_dir(), &Some(PathBuf::from("/srv/sandcore/logs")));
    }

    #[test_log::test(tokio::test)]
    async fn test_start_requires_disk_image() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut process = SandboxProcess::new(
            TenantId::new("alice")?,
            dir.path().join("alice.sock"),
            launch("sleep"),
            Arc::new(NativeSupervisor::new()),
        );

        let err = process
            .start(&dir.path().join("missing.ext4"), 1, 128)
            .await
            .unwrap_err();
        assert!(matches!(err, SandcoreError::DiskImageMissing(_)));
        assert_eq!(process.get_state(), LifecycleState::Absent);
        assert!(process.pid().is_none());

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_spawn_failure_is_surfaced_directly() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let disk = dir.path().join("rootfs.ext4");
        tokio::fs::write(&disk, b"disk").await?;

        let mut process = SandboxProcess::new(
            TenantId::new("alice")?,
            dir.path().join("alice.sock"),
            launch("/nonexistent/firecracker"),
            Arc::new(NativeSupervisor::new()),
        );

        let err = process.start(&disk, 1, 128).await.unwrap_err();
        assert!(matches!(err, SandcoreError::ProcessSpawnFailure { .. }));
        assert_eq!(process.get_state(), LifecycleState::Absent);
        assert!(!process.is_running());

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_unreachable_endpoint_kills_process() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let disk = dir.path().join("rootfs.ext4");
        tokio::fs::write(&disk, b"disk").await?;
        let endpoint = dir.path().join("sockets/alice.sock");

        // A stale socket file from an earlier crash.
        tokio::fs::create_dir_all(endpoint.parent().unwrap()).await?;
        tokio::fs::write(&endpoint, b"").await?;

        // `sh` rejects `--api-sock` and exits without ever binding the socket.
        let launch = launch("sh");
        let mut process = SandboxProcess::new(
            TenantId::new("alice")?,
            &endpoint,
            launch,
            Arc::new(NativeSupervisor::new()),
        );

        let err = process.start(&disk, 1, 128).await.unwrap_err();
        assert_eq!(err.boot_step(), Some(BootStep::Connect));
        assert!(matches!(
            err,
            SandcoreError::BootFailed { ref source, .. }
                if matches!(**source, SandcoreError::ControlChannelUnavailable { attempts: 3, .. })
        ));
        assert_eq!(process.get_state(), LifecycleState::Absent);
        assert!(process.pid().is_none());
        assert!(!endpoint.exists());

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_control_fails_closed_when_not_running() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut process = SandboxProcess::new(
            TenantId::new("alice")?,
            dir.path().join("alice.sock"),
            launch("sleep"),
            Arc::new(NativeSupervisor::new()),
        );

        assert!(matches!(
            process.control(),
            Err(SandcoreError::SandboxNotRunning(tenant)) if tenant == "alice"
        ));

        // Stopping an absent process is a no-op.
        process.stop(Duration::from_millis(100)).await?;
        assert_eq!(process.get_state(), LifecycleState::Absent);

        Ok(())
    }
}
