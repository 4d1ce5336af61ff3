//! `sandutils::path` is a module containing path utilities for the sandcore project.

use crate::{SandutilsError, SandutilsResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The suffix for log files
pub const LOG_SUFFIX: &str = "log";

/// The maximum length of a single path segment derived from caller input.
pub const MAX_SEGMENT_LEN: usize = 128;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Validates that `segment` can be used verbatim as a single file name component.
///
/// Identifiers supplied by callers end up inside socket, image and log paths, so they must not
/// be able to escape the directory they are joined onto.
///
/// Rules:
/// - Must be non-empty and at most [`MAX_SEGMENT_LEN`] bytes
/// - Must not be `.` or `..`
/// - Must not start with `.` (no hidden files)
/// - May only contain ASCII alphanumerics and `-`, `_`, `.`, `@`, `+`
///
/// # Returns
/// An error describing the first rule the segment violates
pub fn validate_path_segment(segment: &str) -> SandutilsResult<()> {
    if segment.is_empty() {
        return Err(SandutilsError::PathValidation(
            "Path segment cannot be empty".to_string(),
        ));
    }

    if segment.len() > MAX_SEGMENT_LEN {
        return Err(SandutilsError::PathValidation(format!(
            "Path segment exceeds {} bytes",
            MAX_SEGMENT_LEN
        )));
    }

    if segment.starts_with('.') {
        return Err(SandutilsError::PathValidation(format!(
            "Path segment must not start with '.': {}",
            segment
        )));
    }

    if let Some(c) = segment
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '+')))
    {
        return Err(SandutilsError::PathValidation(format!(
            "Invalid character {:?} in path segment: {}",
            c, segment
        )));
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
