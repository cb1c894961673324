//! Output-path resolution: remote filename hints and destination rules.
//!
//! The remote-suggested name comes from `Content-Disposition` when present,
//! else the URL's last path segment, sanitized for the local filesystem.
//! The caller's `Destination` then decides where that name lands.

mod content_disposition;
mod sanitize;

pub use content_disposition::filename_from_content_disposition;
pub use sanitize::sanitize_filename;

use crate::model::Destination;
use std::path::{Path, PathBuf};

/// Fallback when neither the URL path nor Content-Disposition yields a name.
const DEFAULT_FILENAME: &str = "download.bin";

/// Remote-suggested filename: `Content-Disposition` wins over the URL
/// basename; the result is sanitized and never empty.
pub fn suggested_filename(url: &str, content_disposition: Option<&str>) -> String {
    let candidate = content_disposition
        .and_then(filename_from_content_disposition)
        .filter(|s| !s.is_empty())
        .or_else(|| basename_from_url(url));

    let raw = match candidate {
        Some(c) => c,
        None => return DEFAULT_FILENAME.to_string(),
    };

    let sanitized = sanitize_filename(&raw);
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        DEFAULT_FILENAME.to_string()
    } else {
        sanitized
    }
}

/// Last non-empty path segment of the URL, if any.
fn basename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path().split('/').filter(|s| !s.is_empty()).last()?;
    if segment == "." || segment == ".." {
        return None;
    }
    Some(segment.to_string())
}

/// Computes the final output path from the caller's destination and the
/// remote-suggested filename.
///
/// - a directory appends the suggested name,
/// - a full path is used verbatim,
/// - a bare name is appended to the configured default directory.
pub fn resolve_output_path(
    destination: &Destination,
    suggested: &str,
    default_dir: &Path,
) -> PathBuf {
    match destination {
        Destination::Directory(dir) => dir.join(suggested),
        Destination::FilePath(path) => path.clone(),
        Destination::FileName(name) => default_dir.join(name),
    }
}
