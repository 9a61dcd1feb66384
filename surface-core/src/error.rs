//! Error handling for the surface core layer.
//!
//! This module defines the ambient error types shared by the surface crates,
//! using the `thiserror` crate for ergonomic error definition.
//!
//! The main error type is [`CoreError`], which wraps the more specific
//! [`ConfigError`] and [`LoggingError`]. Buffer protocol failures are not
//! represented here; they live next to the queue as `SurfaceError`.
//!
//! # Examples
//!
//! ```rust
//! use surface_core::error::{CoreError, ConfigError};
//!
//! fn check_queue_size(size: u32) -> Result<(), CoreError> {
//!     if size == 0 {
//!         return Err(ConfigError::ValidationError("queue size must be positive".into()).into());
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_queue_size(0).is_err());
//! ```

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for the surface infrastructure.
///
/// Used by configuration loading, logging initialization and filesystem
/// helpers. Specific failures are wrapped rather than flattened.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Errors related to configuration loading, parsing, or validation.
    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),

    /// Errors raised while installing the global `tracing` subscriber.
    #[error("Logging Error: {0}")]
    Logging(#[from] LoggingError),

    /// Filesystem operations (creating directories, writing dumps) that failed
    /// for a specific path.
    #[error("Filesystem Error: {message} (Path: {path:?})")]
    Filesystem {
        message: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Error type for configuration-related operations.
///
/// Typically wrapped by [`CoreError::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading a configuration file failed.
    #[error("Failed to read configuration file from {path:?}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration document is not valid TOML or does not match the schema.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Values parsed fine but are out of range or otherwise invalid.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// A required base directory (e.g. XDG config home) could not be determined.
    #[error("Could not determine base directory for {dir_type}")]
    DirectoryUnavailable { dir_type: String },
}

/// Error type for logging initialization.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The subscriber could not be built or installed.
    #[error("Failed to initialize logging: {0}")]
    InitializationFailure(String),

    /// A configured level or filter directive could not be parsed.
    #[error("Failed to set log filter: {0}")]
    FilterError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_core_error_config_variant() {
        let core_err = CoreError::Config(ConfigError::ValidationError("queue size".to_string()));

        assert_eq!(
            format!("{}", core_err),
            "Configuration Error: Configuration validation failed: queue size"
        );
        match core_err.source().and_then(|s| s.downcast_ref::<ConfigError>()) {
            Some(ConfigError::ValidationError(msg)) => assert_eq!(msg, "queue size"),
            _ => panic!("Incorrect source for CoreError::Config"),
        }
    }

    #[test]
    fn test_core_error_logging_variant() {
        let core_err: CoreError = LoggingError::InitializationFailure("already set".to_string()).into();
        assert_eq!(
            format!("{}", core_err),
            "Logging Error: Failed to initialize logging: already set"
        );
        assert!(core_err.source().is_some());
    }

    #[test]
    fn test_core_error_filesystem_variant() {
        let path = PathBuf::from("/data/dumpimage.raw");
        let core_err = CoreError::Filesystem {
            message: "Dump write failed".to_string(),
            path: path.clone(),
            source: IoError::new(ErrorKind::PermissionDenied, "denied"),
        };

        assert_eq!(
            format!("{}", core_err),
            format!("Filesystem Error: Dump write failed (Path: {:?})", path)
        );
        let kind = core_err
            .source()
            .and_then(|s| s.downcast_ref::<IoError>())
            .map(|e| e.kind());
        assert_eq!(kind, Some(ErrorKind::PermissionDenied));
    }

    #[test]
    fn test_config_error_parse_error_variant() {
        let toml_err: toml::de::Error = toml::from_str::<toml::Value>("this is not = = toml").unwrap_err();
        let display = format!("{}", toml_err);
        let config_err = ConfigError::ParseError(toml_err);

        assert_eq!(
            format!("{}", config_err),
            format!("Failed to parse configuration file: {}", display)
        );
        assert!(config_err.source().map(|s| s.is::<toml::de::Error>()).unwrap_or(false));
    }

    #[test]
    fn test_config_error_directory_unavailable_variant() {
        let config_err = ConfigError::DirectoryUnavailable { dir_type: "config".to_string() };
        assert_eq!(format!("{}", config_err), "Could not determine base directory for config");
        assert!(config_err.source().is_none());
    }

    #[test]
    fn test_logging_error_filter_error_variant() {
        let log_err = LoggingError::FilterError("bogus=level".to_string());
        assert_eq!(format!("{}", log_err), "Failed to set log filter: bogus=level");
    }
}
