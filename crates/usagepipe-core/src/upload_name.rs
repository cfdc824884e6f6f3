//! Upload file-name validation
//!
//! Uploaded usage files are named `<tenant-or-prefix>.<suffix>.<epoch-millis>[.ext]`.
//! The third dot-separated segment is the file's creation timestamp. Names are checked
//! when a file is uploaded so the processing side never sees a malformed one.

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::error::{PipelineError, PipelineResult};

/// Maximum length for an uploaded file name
pub const MAX_FILE_NAME_LENGTH: usize = 255;

static UPLOAD_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_\-@]+\.[A-Za-z0-9_\-]+\.([0-9]{1,19})(\.[A-Za-z0-9]+)?$")
        .expect("upload name pattern is a valid regex")
});

/// Validate an upload file name and return the timestamp it encodes.
pub fn validate_upload_name(file_name: &str) -> PipelineResult<DateTime<Utc>> {
    if file_name.len() > MAX_FILE_NAME_LENGTH {
        return Err(PipelineError::InvalidFileName(format!(
            "'{}' exceeds maximum length of {} characters",
            file_name, MAX_FILE_NAME_LENGTH
        )));
    }

    let captures = UPLOAD_NAME_PATTERN.captures(file_name).ok_or_else(|| {
        PipelineError::InvalidFileName(format!(
            "'{}' does not match <prefix>.<suffix>.<epoch-millis>[.ext]",
            file_name
        ))
    })?;

    let millis: i64 = captures[1].parse().map_err(|_| {
        PipelineError::InvalidFileName(format!("'{}' has an out of range timestamp", file_name))
    })?;

    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        PipelineError::InvalidFileName(format!("'{}' has an out of range timestamp", file_name))
    })
}

/// Timestamp encoded in the third segment of an upload file name.
pub fn parse_upload_timestamp(file_name: &str) -> PipelineResult<i64> {
    validate_upload_name(file_name).map(|ts| ts.timestamp_millis())
}
