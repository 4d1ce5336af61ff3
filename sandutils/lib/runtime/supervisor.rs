use std::{
    fmt,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use async_trait::async_trait;
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tokio::process::{Child, Command};

use crate::{OutputMonitor, ProcessMonitor, SandutilsError, SandutilsResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Describes a child process to launch.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Path to the child executable
    program: PathBuf,

    /// Arguments to pass to the child executable
    args: Vec<String>,

    /// Environment variables for the child process
    envs: Vec<(String, String)>,

    /// Name of the child process, used for log file names and log lines
    name: String,

    /// Directory that receives the child's stdout/stderr logs
    log_dir: Option<PathBuf>,
}

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// The exit code, if the process exited normally.
    pub code: Option<i32>,

    /// The terminating signal, if the process was killed by one.
    pub signal: Option<i32>,
}

/// The outcome of [`shutdown_process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The process had already exited before any signal was sent.
    AlreadyExited(ProcessExit),

    /// The process exited within the grace period after the terminate signal.
    Graceful(ProcessExit),

    /// The process ignored the terminate signal and was force-killed.
    Forced(ProcessExit),
}

/// A live (or recently exited) child process owned by a supervisor.
#[async_trait]
pub trait ProcessHandle: Send + Sync + fmt::Debug {
    /// The OS process id.
    fn pid(&self) -> u32;

    /// Returns true if the process has not exited. Never blocks.
    fn is_alive(&mut self) -> bool;

    /// Asks the process to exit (SIGTERM on Unix). A no-op if it already exited.
    async fn terminate(&mut self) -> SandutilsResult<()>;

    /// Forcibly kills the process (SIGKILL on Unix). A no-op if it already exited.
    async fn kill(&mut self) -> SandutilsResult<()>;

    /// Waits for the process to exit and reaps it.
    async fn wait(&mut self) -> SandutilsResult<ProcessExit>;
}

/// The capability to launch supervised processes.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync + fmt::Debug {
    /// Launches a process described by `spec`.
    async fn spawn(&self, spec: &SpawnSpec) -> SandutilsResult<Box<dyn ProcessHandle>>;
}

/// Supervises real OS processes through `tokio::process`, capturing their output with an
/// [`OutputMonitor`].
#[derive(Debug, Default, Clone)]
pub struct NativeSupervisor;

/// A process launched by [`NativeSupervisor`].
pub struct NativeProcess {
    child: Child,
    pid: u32,
    name: String,
    exit: Option<ProcessExit>,
    monitor: Box<dyn ProcessMonitor + Send + Sync>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SpawnSpec {
    /// Creates a spec for `program`, labelled `name` in logs.
    pub fn new(program: impl AsRef<Path>, name: impl Into<String>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            envs: Vec::new(),
            name: name.into(),
            log_dir: None,
        }
    }

    /// Appends arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends environment variables.
    pub fn envs(
        mut self,
        envs: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.envs
            .extend(envs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the directory that receives stdout/stderr logs.
    pub fn log_dir(mut self, log_dir: impl AsRef<Path>) -> Self {
        self.log_dir = Some(log_dir.as_ref().to_path_buf());
        self
    }

    /// The executable path.
    pub fn get_program(&self) -> &Path {
        &self.program
    }

    /// The arguments.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// The environment variables.
    pub fn get_envs(&self) -> &[(String, String)] {
        &self.envs
    }

    /// The process name.
    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// The log directory, if any.
    pub fn get_log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

impl ProcessExit {
    /// Returns true if the process exited normally with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl NativeSupervisor {
    /// Creates a new native supervisor.
    pub fn new() -> Self {
        Self
    }
}

impl NativeProcess {
    fn record(&mut self, status: ExitStatus) -> ProcessExit {
        let exit = ProcessExit::from(status);
        if self.exit.is_none() {
            tracing::info!("process {} ({}) exited: {}", self.name, self.pid, exit);
        }
        self.exit = Some(exit);
        exit
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Terminates `handle` gracefully, force-killing it if it is still alive after `timeout`.
///
/// The process is always reaped before this returns successfully.
pub async fn shutdown_process(
    handle: &mut dyn ProcessHandle,
    timeout: Duration,
) -> SandutilsResult<Shutdown> {
    if !handle.is_alive() {
        return Ok(Shutdown::AlreadyExited(handle.wait().await?));
    }

    handle.terminate().await?;
    let waited = tokio::time::timeout(timeout, handle.wait()).await;
    match waited {
        Ok(exit) => Ok(Shutdown::Graceful(exit?)),
        Err(_) => {
            tracing::warn!(
                "process {} did not exit within {:?} of SIGTERM, killing",
                handle.pid(),
                timeout
            );
            handle.kill().await?;
            Ok(Shutdown::Forced(handle.wait().await?))
        }
    }
}

fn send_signal(pid: u32, sig: Signal) -> SandutilsResult<()> {
    match signal::kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(source) => Err(SandutilsError::Signal {
            pid,
            signal: sig.as_str().to_string(),
            source,
        }),
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ProcessSupervisor for NativeSupervisor {
    async fn spawn(&self, spec: &SpawnSpec) -> SandutilsResult<Box<dyn ProcessHandle>> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandutilsError::Spawn {
                program: spec.program.display().to_string(),
                source,
            })?;

        let pid = child
            .id()
            .ok_or_else(|| SandutilsError::MissingPid(spec.name.clone()))?;

        let mut monitor = OutputMonitor::new(spec.name.clone(), spec.log_dir.clone());
        if let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) {
            monitor.start(pid, stdout, stderr).await?;
        }

        tracing::info!("spawned {} with pid {}", spec.name, pid);

        Ok(Box::new(NativeProcess {
            child,
            pid,
            name: spec.name.clone(),
            exit: None,
            monitor: Box::new(monitor),
        }))
    }
}

#[async_trait]
impl ProcessHandle for NativeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        if self.exit.is_some() {
            return false;
        }

        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.record(status);
                false
            }
            Err(e) => {
                tracing::error!("failed to poll process {}: {}", self.pid, e);
                false
            }
        }
    }

    async fn terminate(&mut self) -> SandutilsResult<()> {
        if !self.is_alive() {
            return Ok(());
        }

        send_signal(self.pid, Signal::SIGTERM)
    }

    async fn kill(&mut self) -> SandutilsResult<()> {
        if !self.is_alive() {
            return Ok(());
        }

        send_signal(self.pid, Signal::SIGKILL)
    }

    async fn wait(&mut self) -> SandutilsResult<ProcessExit> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }

        let status = self.child.wait().await?;
        let exit = self.record(status);
        self.monitor.stop().await?;

        Ok(exit)
    }
}

impl fmt::Debug for NativeProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeProcess")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("exit", &self.exit)
            .finish()
    }
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
