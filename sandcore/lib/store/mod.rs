//! Snapshot storage.
//!
//! [`ImageStore`] maps tenants to snapshot keys and handles the restore and save paths. The bytes
//! themselves live in a [`BlobStore`]: nowhere ([`DisabledBlobStore`]), on a local or mounted
//! filesystem ([`FsBlobStore`]), or behind an HTTP object API ([`HttpBlobStore`]).

use std::path::{Path, PathBuf};

mod blob;
mod fs;
mod http;
mod image;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use blob::*;
pub use fs::*;
pub use http::*;
pub use image::*;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// A unique hidden path next to `path`, used to stage a file before renaming it into place.
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.partial", name, uuid::Uuid::new_v4().simple()))
}
