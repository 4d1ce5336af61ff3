//! Logging utilities for supervised processes.

mod rotating;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use rotating::*;
