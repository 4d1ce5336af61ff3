use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{ChildStderr, ChildStdout},
    task::JoinHandle,
};

use crate::{path::LOG_SUFFIX, RotatingLog, SandutilsResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How long [`OutputMonitor::stop`] waits for the pipes to drain before abandoning them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A trait for monitoring the output of supervised processes
#[async_trait]
pub trait ProcessMonitor {
    /// Start monitoring a process
    async fn start(
        &mut self,
        pid: u32,
        stdout: ChildStdout,
        stderr: ChildStderr,
    ) -> SandutilsResult<()>;

    /// Stop monitoring
    async fn stop(&mut self) -> SandutilsResult<()>;
}

/// Forwards each line a child writes to `tracing` and, when a log directory is configured, to
/// `<log_dir>/<name>.stdout.log` and `<log_dir>/<name>.stderr.log`.
#[derive(Debug)]
pub struct OutputMonitor {
    name: String,
    log_dir: Option<PathBuf>,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OutputMonitor {
    /// Creates a monitor for the process called `name`.
    pub fn new(name: impl Into<String>, log_dir: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            log_dir,
            tasks: Vec::new(),
        }
    }

    /// Returns the log file path used for the given stream, if file logging is enabled.
    fn log_path(&self, stream: Stream) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| {
            dir.join(format!("{}.{}.{}", self.name, stream.as_str(), LOG_SUFFIX))
        })
    }

    fn spawn_forwarder<R>(&mut self, pid: u32, reader: R, stream: Stream, log: Option<RotatingLog>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let name = self.name.clone();
        let handle = tokio::spawn(async move {
            let mut log = log;
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match stream {
                    Stream::Stdout => tracing::debug!("[{}/{}/stdout] {}", name, pid, line),
                    Stream::Stderr => tracing::warn!("[{}/{}/stderr] {}", name, pid, line),
                }

                if let Some(file) = log.as_mut() {
                    if let Err(e) = file.write_line(&line).await {
                        tracing::error!("failed to write {} log for {}: {}", stream.as_str(), name, e);
                    }
                }
            }

            if let Some(mut file) = log {
                if let Err(e) = file.flush().await {
                    tracing::error!("failed to flush {} log for {}: {}", stream.as_str(), name, e);
                }
            }
        });

        self.tasks.push(handle);
    }
}

impl Stream {
    fn as_str(&self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ProcessMonitor for OutputMonitor {
    async fn start(
        &mut self,
        pid: u32,
        stdout: ChildStdout,
        stderr: ChildStderr,
    ) -> SandutilsResult<()> {
        if let Some(dir) = &self.log_dir {
            tokio::fs::create_dir_all(dir).await?;
        }

        let stdout_log = match self.log_path(Stream::Stdout) {
            Some(path) => Some(RotatingLog::new(path).await?),
            None => None,
        };
        let stderr_log = match self.log_path(Stream::Stderr) {
            Some(path) => Some(RotatingLog::new(path).await?),
            None => None,
        };

        self.spawn_forwarder(pid, stdout, Stream::Stdout, stdout_log);
        self.spawn_forwarder(pid, stderr, Stream::Stderr, stderr_log);

        Ok(())
    }

    async fn stop(&mut self) -> SandutilsResult<()> {
        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await.is_err() {
                tracing::debug!("output of {} still open after exit, detaching", self.name);
                task.abort();
            }
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
