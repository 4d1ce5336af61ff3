//! Tenant-keyed sandbox orchestration.
//!
//! [`SandboxManager`] is the entry point. It keeps live [`SandboxInstance`]s in a
//! [`SandboxRegistry`] and serializes work per tenant through [`TenantLocks`].

mod instance;
mod locks;
mod manager;
mod registry;
mod tenant;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use instance::*;
pub use locks::*;
pub use manager::*;
pub use registry::*;
pub use tenant::*;
