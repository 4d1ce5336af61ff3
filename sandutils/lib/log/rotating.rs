//! Size-capped log files for hypervisor output.
//!
//! A [`RotatingLog`] appends lines to a file until the next write would take it past the
//! configured maximum size. At that point:
//! 1. The current file is synced and renamed to the `.old` extension
//! 2. A new empty log file is created at the original path
//! 3. Writing continues into the new file
//!
//! Only one generation of history is kept.

use std::{
    io,
    path::{Path, PathBuf},
};

use tokio::{
    fs::{remove_file, rename, File, OpenOptions},
    io::AsyncWriteExt,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default maximum size of a log file before it is rotated (10 MiB).
pub const DEFAULT_LOG_MAX_SIZE: u64 = 10 * 1024 * 1024;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A log file that rotates itself once it reaches a maximum size.
///
/// # Example
///
/// ```no_run
/// use sandutils::RotatingLog;
///
/// #[tokio::main]
/// async fn main() -> std::io::Result<()> {
///     let mut log = RotatingLog::with_max_size("vmm.stdout.log", 1024 * 1024).await?;
///     log.write_line("booted").await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct RotatingLog {
    /// The current log file being written to
    file: File,

    /// Path to the current log file
    path: PathBuf,

    /// Maximum size in bytes before rotation
    max_size: u64,

    /// Current size of the log file
    current_size: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RotatingLog {
    /// Opens a rotating log with the [`DEFAULT_LOG_MAX_SIZE`] limit.
    pub async fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::with_max_size(path, DEFAULT_LOG_MAX_SIZE).await
    }

    /// Opens (or creates) a rotating log file, appending to any existing content.
    ///
    /// ## Errors
    ///
    /// Will return an error if:
    /// * The file cannot be created or opened
    /// * File metadata cannot be read
    pub async fn with_max_size(path: impl AsRef<Path>, max_size: u64) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let current_size = file.metadata().await?.len();

        Ok(Self {
            file,
            path,
            max_size,
            current_size,
        })
    }

    /// Appends `line` followed by a newline, rotating first if the write would overflow.
    ///
    /// A single line larger than the limit is still written whole into a fresh file.
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let len = line.len() as u64 + 1;
        if self.current_size > 0 && self.current_size + len > self.max_size {
            self.rotate().await?;
        }

        self.file.write_all(line.as_bytes()).await?;
        self.file.write_all(b"\n").await?;
        self.current_size += len;

        Ok(())
    }

    /// Flushes buffered data to the underlying file.
    pub async fn flush(&mut self) -> io::Result<()> {
        self.file.flush().await
    }

    /// Returns the path of the active log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn rotate(&mut self) -> io::Result<()> {
        self.file.sync_all().await?;

        let backup_path = self.path.with_extension("old");
        if backup_path.exists() {
            remove_file(&backup_path).await?;
        }
        rename(&self.path, &backup_path).await?;

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        self.current_size = 0;

        tracing::debug!("rotated log file {}", self.path.display());
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
