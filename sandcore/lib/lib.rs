//! `sandcore` manages one isolated microVM sandbox per tenant on a single host.
//!
//! # Overview
//!
//! A caller asks the [`SandboxManager`](management::SandboxManager) for a tenant's sandbox. The
//! manager restores the tenant's disk snapshot from blob storage (or seeds it from a shared base
//! image), spawns a hypervisor process bound to a tenant-scoped control socket, drives it through
//! the boot sequence and records the live instance. Stopping a sandbox terminates the process and
//! optionally persists the disk image back to blob storage.
//!
//! # Architecture
//!
//! - **Store**: snapshot persistence over pluggable blob backends
//! - **Control**: a typed client for the hypervisor's HTTP-over-Unix-socket control API
//! - **Runtime**: the per-sandbox process state machine and boot sequence
//! - **Management**: the tenant-keyed orchestrator, its registry and per-tenant locks
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use sandcore::{config::SandcoreConfig, management::SandboxManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SandcoreConfig::load_default().await?;
//!     let manager = SandboxManager::from_config(&config)?;
//!
//!     let info = manager.create_or_get("alice").await?;
//!     println!("sandbox {} running with pid {}", info.get_instance_id(), info.get_pid());
//!
//!     manager.stop("alice", true).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Configuration types, defaults and loading
//! - [`control`] - Control channel framing and typed payloads
//! - [`management`] - Tenant-keyed sandbox orchestration
//! - [`runtime`] - Sandbox process supervision and boot
//! - [`store`] - Snapshot storage
//! - [`utils`] - Home directory layout and environment helpers

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod config;
pub mod control;
pub mod management;
pub mod runtime;
pub mod store;
pub mod utils;

pub use error::*;
