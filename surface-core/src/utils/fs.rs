//! Filesystem helpers.
//!
//! The surface stack touches the filesystem in two places: log and config
//! directories, and raw buffer dumps. Both go through here so that a failure
//! carries the offending path as a [`CoreError::Filesystem`].

use crate::error::CoreError;
use std::fs;
use std::io;
use std::path::Path;

fn filesystem_error(message: &str, path: &Path, source: io::Error) -> CoreError {
    CoreError::Filesystem {
        message: message.to_string(),
        path: path.to_path_buf(),
        source,
    }
}

/// Creates `path` and any missing parents. A non-directory already at
/// `path` is an error.
///
/// # Examples
///
/// ```no_run
/// # use surface_core::utils::fs::ensure_dir_exists;
/// let dumps = tempfile::tempdir().unwrap().path().join("dumps");
/// ensure_dir_exists(&dumps).unwrap();
/// assert!(dumps.is_dir());
/// ```
pub fn ensure_dir_exists(path: &Path) -> Result<(), CoreError> {
    if path.is_dir() {
        return Ok(());
    }
    if path.exists() {
        return Err(filesystem_error(
            "Path exists but is not a directory",
            path,
            io::Error::new(io::ErrorKind::AlreadyExists, "not a directory"),
        ));
    }
    fs::create_dir_all(path).map_err(|e| filesystem_error("Failed to create directory", path, e))
}

/// Writes `bytes` to `path`, truncating an existing file. The parent
/// directory must already exist.
pub fn write_bytes_to_file(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    fs::write(path, bytes).map_err(|e| filesystem_error("Failed to write file", path, e))
}
