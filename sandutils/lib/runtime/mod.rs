//! `sandutils::runtime` is a module containing process supervision utilities for the sandcore
//! project.

mod monitor;
mod supervisor;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use monitor::*;
pub use supervisor::*;
