//! Sandbox process supervision and boot.

mod process;
mod state;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use process::*;
pub use state::*;
