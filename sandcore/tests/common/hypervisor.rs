//! An in-process stand-in for the hypervisor binary.
//!
//! Each spawned "process" is a tokio task serving the control API on the socket passed with
//! `--api-sock`. Boot-source and drive requests are checked against the filesystem the way the
//! real hypervisor checks them.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use sandutils::{
    ProcessExit, ProcessHandle, ProcessSupervisor, SandutilsError, SandutilsResult, SpawnSpec,
};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
    task::JoinHandle,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const FIRST_PID: u32 = 40_000;

const SIGTERM: i32 = 15;

const SIGKILL: i32 = 9;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A control request the fake hypervisor received.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub tenant: String,
    pub method: String,
    pub path: String,
    pub body: Value,
}

/// Spawns fake hypervisor processes. Clones share all state.
#[derive(Debug, Clone, Default)]
pub struct FakeHypervisor {
    inner: Arc<HypervisorState>,
}

#[derive(Debug, Default)]
struct HypervisorState {
    next_pid: AtomicU32,
    spawns: AtomicU32,
    fail_path: Mutex<Option<String>>,
    truncate_path: Mutex<Option<String>>,
    fail_spawn: AtomicBool,
    ignore_term: AtomicBool,
    calls: Mutex<Vec<RecordedCall>>,
    spawn_args: Mutex<Vec<Vec<String>>>,
    processes: Mutex<HashMap<String, Arc<ProcessState>>>,
}

#[derive(Debug)]
struct ProcessState {
    pid: u32,
    exit: Mutex<Option<ProcessExit>>,
    server: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one fake hypervisor process.
#[derive(Debug)]
pub struct FakeProcess {
    state: Arc<ProcessState>,
    ignore_term: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FakeHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request whose path starts with `prefix` gets a 400 fault.
    pub fn fail_requests_to(&self, prefix: &str) {
        *lock(&self.inner.fail_path) = Some(prefix.to_string());
    }

    /// Every request whose path starts with `prefix` gets a response cut off mid-body.
    pub fn truncate_responses_to(&self, prefix: &str) {
        *lock(&self.inner.truncate_path) = Some(prefix.to_string());
    }

    pub fn fail_spawns(&self) {
        self.inner.fail_spawn.store(true, Ordering::SeqCst);
    }

    /// Processes spawned from now on ignore SIGTERM.
    pub fn ignore_term(&self) {
        self.inner.ignore_term.store(true, Ordering::SeqCst);
    }

    pub fn spawn_count(&self) -> u32 {
        self.inner.spawns.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.inner.calls).clone()
    }

    pub fn calls_for(&self, tenant: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.tenant == tenant)
            .collect()
    }

    pub fn spawn_args(&self) -> Vec<Vec<String>> {
        lock(&self.inner.spawn_args).clone()
    }

    /// The number of fake processes that have not exited.
    pub fn live_processes(&self) -> usize {
        lock(&self.inner.processes)
            .values()
            .filter(|process| process.is_alive())
            .count()
    }

    /// Whether the latest process spawned for `tenant` is alive.
    pub fn is_alive(&self, tenant: &str) -> bool {
        lock(&self.inner.processes)
            .get(tenant)
            .is_some_and(|process| process.is_alive())
    }

    /// How the latest process spawned for `tenant` ended.
    pub fn exit_of(&self, tenant: &str) -> Option<ProcessExit> {
        lock(&self.inner.processes)
            .get(tenant)
            .and_then(|process| *lock(&process.exit))
    }

    /// Makes `tenant`'s process exit on its own.
    pub fn crash(&self, tenant: &str) {
        if let Some(process) = lock(&self.inner.processes).get(tenant) {
            process.exit_with(ProcessExit {
                code: Some(1),
                signal: None,
            });
        }
    }
}

impl ProcessState {
    fn is_alive(&self) -> bool {
        lock(&self.exit).is_none()
    }

    fn exit_with(&self, exit: ProcessExit) {
        let mut current = lock(&self.exit);
        if current.is_none() {
            *current = Some(exit);
        }

        if let Some(server) = lock(&self.server).take() {
            server.abort();
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn api_socket(args: &[String]) -> Option<PathBuf> {
    args.iter()
        .position(|arg| arg == "--api-sock")
        .and_then(|index| args.get(index + 1))
        .map(PathBuf::from)
}

async fn serve(listener: UnixListener, tenant: String, hypervisor: Arc<HypervisorState>) {
    while let Ok((stream, _)) = listener.accept().await {
        let tenant = tenant.clone();
        let hypervisor = hypervisor.clone();
        tokio::spawn(async move {
            let _ = serve_connection(stream, &tenant, &hypervisor).await;
        });
    }
}

async fn serve_connection(
    stream: UnixStream,
    tenant: &str,
    hypervisor: &HypervisorState,
) -> std::io::Result<()> {
    let mut stream = BufReader::new(stream);

    loop {
        let mut request_line = String::new();
        if stream.read_line(&mut request_line).await? == 0 {
            return Ok(());
        }

        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let path = parts.next().unwrap_or_default().to_string();

        let mut content_length = 0;
        loop {
            let mut line = String::new();
            stream.read_line(&mut line).await?;
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }

            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }

        let mut body = vec![0; content_length];
        stream.read_exact(&mut body).await?;
        let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

        lock(&hypervisor.calls).push(RecordedCall {
            tenant: tenant.to_string(),
            method: method.clone(),
            path: path.clone(),
            body: body.clone(),
        });

        let truncate = lock(&hypervisor.truncate_path)
            .as_deref()
            .is_some_and(|prefix| path.starts_with(prefix));
        if truncate {
            let partial = "HTTP/1.1 400 Bad Request\r\nContent-Length: 64\r\n\r\n{\"fault_mess";
            stream.get_mut().write_all(partial.as_bytes()).await?;
            return stream.get_mut().shutdown().await;
        }

        let response = match check_request(hypervisor, &path, &body) {
            Ok(()) => "HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n".to_string(),
            Err(message) => {
                let fault = serde_json::json!({ "fault_message": message }).to_string();
                format!(
                    "HTTP/1.1 400 Bad Request\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                    fault.len(),
                    fault
                )
            }
        };

        stream.get_mut().write_all(response.as_bytes()).await?;
    }
}

fn check_request(hypervisor: &HypervisorState, path: &str, body: &Value) -> Result<(), String> {
    if let Some(prefix) = lock(&hypervisor.fail_path).as_deref() {
        if path.starts_with(prefix) {
            return Err(format!("injected failure for {}", path));
        }
    }

    let file_must_exist = |field: &str| -> Result<(), String> {
        let file = body.get(field).and_then(Value::as_str).unwrap_or_default();
        if Path::new(file).exists() {
            Ok(())
        } else {
            Err(format!("{} not found: {}", field, file))
        }
    };

    if path == "/boot-source" {
        file_must_exist("kernel_image_path")
    } else if path.starts_with("/drives/") {
        file_must_exist("path_on_host")
    } else {
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ProcessSupervisor for FakeHypervisor {
    async fn spawn(&self, spec: &SpawnSpec) -> SandutilsResult<Box<dyn ProcessHandle>> {
        let program = spec.get_program().display().to_string();
        if self.inner.fail_spawn.load(Ordering::SeqCst) {
            return Err(SandutilsError::Spawn {
                program,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such binary"),
            });
        }

        lock(&self.inner.spawn_args).push(spec.get_args().to_vec());

        let socket = api_socket(spec.get_args()).ok_or_else(|| SandutilsError::Spawn {
            program: program.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing --api-sock"),
        })?;
        let listener = UnixListener::bind(&socket).map_err(|source| SandutilsError::Spawn {
            program: program.clone(),
            source,
        })?;

        self.inner.spawns.fetch_add(1, Ordering::SeqCst);
        let pid = FIRST_PID + self.inner.next_pid.fetch_add(1, Ordering::SeqCst);

        let server = tokio::spawn(serve(
            listener,
            spec.get_name().to_string(),
            self.inner.clone(),
        ));
        let state = Arc::new(ProcessState {
            pid,
            exit: Mutex::new(None),
            server: Mutex::new(Some(server)),
        });

        lock(&self.inner.processes).insert(spec.get_name().to_string(), state.clone());

        Ok(Box::new(FakeProcess {
            state,
            ignore_term: self.inner.ignore_term.load(Ordering::SeqCst),
        }))
    }
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn pid(&self) -> u32 {
        self.state.pid
    }

    fn is_alive(&mut self) -> bool {
        self.state.is_alive()
    }

    async fn terminate(&mut self) -> SandutilsResult<()> {
        if !self.ignore_term {
            self.state.exit_with(ProcessExit {
                code: None,
                signal: Some(SIGTERM),
            });
        }
        Ok(())
    }

    async fn kill(&mut self) -> SandutilsResult<()> {
        self.state.exit_with(ProcessExit {
            code: None,
            signal: Some(SIGKILL),
        });
        Ok(())
    }

    async fn wait(&mut self) -> SandutilsResult<ProcessExit> {
        loop {
            let exit = *lock(&self.state.exit);
            if let Some(exit) = exit {
                return Ok(exit);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
