//! `sandutils` is a library containing process supervision and logging utilities for the
//! sandcore project.

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod error;
pub mod log;
pub mod path;
pub mod runtime;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use error::*;
pub use log::*;
pub use path::*;
pub use runtime::*;
