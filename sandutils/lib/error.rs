//! `sandutils::error` is a module containing error utilities for the sandcore project.

use std::{
    error::Error,
    fmt::{self, Display},
};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a sandutils-related operation.
pub type SandutilsResult<T> = Result<T, SandutilsError>;

/// An error that occurred while supervising a process or validating a path.
#[derive(pretty_error_debug::Debug, Error)]
pub enum SandutilsError {
    /// An error that occurred when validating a path segment
    #[error("path validation error: {0}")]
    PathValidation(String),

    /// The child executable could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// The program that was being spawned.
        program: String,

        /// The underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// A spawned child reported no process id, which means it already exited and was reaped
    #[error("process id unavailable for {0}")]
    MissingPid(String),

    /// A signal could not be delivered to a process
    #[error("failed to send {signal} to process {pid}: {source}")]
    Signal {
        /// The target process id.
        pid: u32,

        /// The signal name.
        signal: String,

        /// The underlying errno.
        #[source]
        source: nix::Error,
    },

    /// An error that occurred when performing an IO operation
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Custom error.
    #[error("Custom error: {0}")]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandutilsError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> SandutilsError {
        SandutilsError::Custom(AnyError {
            error: error.into(),
        })
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

/// Creates an `Ok` `SandutilsResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> SandutilsResult<T> {
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
