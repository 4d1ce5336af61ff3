use std::{
    error::Error,
    fmt::{self, Display},
    path::PathBuf,
    time::Duration,
};

use sandutils::SandutilsError;
use thiserror::Error;

use crate::{
    control::{ProtocolError, Verb},
    runtime::{BootStep, LifecycleState},
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a sandcore-related operation.
pub type SandcoreResult<T> = Result<T, SandcoreError>;

/// An error that occurred while managing a sandbox, its control channel or its snapshot.
#[derive(Debug, Error)]
pub enum SandcoreError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// An error from the process supervision layer.
    #[error("sandutils error: {0}")]
    Utils(#[from] SandutilsError),

    /// A JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration file could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// An error that occurred during an HTTP request.
    #[error("http request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// An error that occurred during an HTTP middleware operation.
    #[error("http middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// The tenant id cannot be used to namespace paths and keys.
    #[error("invalid tenant id: {0}")]
    InvalidTenantId(String),

    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No snapshot exists under the given storage key. Expected for a new tenant.
    #[error("no snapshot stored at key: {0}")]
    SnapshotNotFound(String),

    /// A snapshot could not be persisted. The sandbox itself has already been stopped.
    #[error("failed to upload snapshot for tenant {tenant}: {source}")]
    SnapshotUploadFailed {
        /// The tenant whose image was being saved.
        tenant: String,

        /// What went wrong.
        #[source]
        source: Box<SandcoreError>,
    },

    /// The blob storage backend returned an unexpected response.
    #[error("storage error: {0}")]
    Storage(String),

    /// The shared base image used to seed new tenants does not exist.
    #[error("base image not found: {0}")]
    BaseImageNotFound(PathBuf),

    /// A sandbox was about to start without a local disk image.
    #[error("disk image missing: {0}")]
    DiskImageMissing(PathBuf),

    /// The control endpoint never became connectable.
    #[error("control endpoint {} unavailable after {attempts} attempts", endpoint.display())]
    ControlChannelUnavailable {
        /// The endpoint path.
        endpoint: PathBuf,

        /// How many connection attempts were made.
        attempts: u32,
    },

    /// Reading from or writing to the control endpoint failed.
    #[error("control transport error: {0}")]
    ControlTransport(#[source] std::io::Error),

    /// The control endpoint sent a malformed or partial response.
    #[error("control protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A control call did not complete in time.
    #[error("control call {verb} {path} timed out after {timeout:?}")]
    ControlTimeout {
        /// The request verb.
        verb: Verb,

        /// The request path.
        path: String,

        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The hypervisor rejected a control call.
    #[error("control call {verb} {path} failed with status {status}: {fault}")]
    ControlApi {
        /// The request verb.
        verb: Verb,

        /// The request path.
        path: String,

        /// The response status code.
        status: u16,

        /// The fault message reported by the hypervisor.
        fault: String,
    },

    /// The hypervisor process could not be launched.
    #[error("failed to spawn sandbox process {}: {source}", program.display())]
    ProcessSpawnFailure {
        /// The hypervisor binary.
        program: PathBuf,

        /// The underlying spawn failure.
        #[source]
        source: SandutilsError,
    },

    /// A boot sequence was aborted. No process is left running.
    #[error("sandbox for tenant {tenant} failed to boot at {step}: {source}")]
    BootFailed {
        /// The tenant whose sandbox failed.
        tenant: String,

        /// The boot step that failed.
        step: BootStep,

        /// The cause.
        #[source]
        source: Box<SandcoreError>,
    },

    /// An operation required a running sandbox.
    #[error("sandbox for tenant {0} is not running")]
    SandboxNotRunning(String),

    /// A lifecycle operation was invoked from the wrong state.
    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidLifecycleTransition {
        /// The current state.
        from: LifecycleState,

        /// The requested state.
        to: LifecycleState,
    },
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandcoreError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> SandcoreError {
        SandcoreError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Returns true if this error means "no snapshot exists yet".
    pub fn is_snapshot_not_found(&self) -> bool {
        matches!(self, SandcoreError::SnapshotNotFound(_))
    }

    /// Returns the boot step that failed, if this is a boot failure.
    pub fn boot_step(&self) -> Option<BootStep> {
        match self {
            SandcoreError::BootFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `SandcoreResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> SandcoreResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
