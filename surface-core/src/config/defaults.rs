//! Default configuration values.
//!
//! These functions back `serde`'s `default` attributes in [`super::types`].

use crate::config::{DumpConfig, LoggingConfig, QueueConfig};
use crate::limits::SURFACE_DEFAULT_QUEUE_SIZE;
use std::path::PathBuf;

/// Returns the default `LoggingConfig`.
pub(super) fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        file_path: default_log_file_path(),
        format: default_log_format(),
    }
}

/// Returns the default log level string (`"info"`).
pub(super) fn default_log_level() -> String {
    "info".to_string()
}

/// No log file by default.
pub(super) fn default_log_file_path() -> Option<PathBuf> {
    None
}

/// Returns the default log format string (`"text"`).
pub(super) fn default_log_format() -> String {
    "text".to_string()
}

/// Returns the default `QueueConfig`.
pub(super) fn default_queue_config() -> QueueConfig {
    QueueConfig {
        default_queue_size: default_queue_size(),
        default_width: 0,
        default_height: 0,
        default_usage: 0,
        dump: default_dump_config(),
    }
}

pub(super) fn default_queue_size() -> u32 {
    SURFACE_DEFAULT_QUEUE_SIZE
}

/// Returns the default `DumpConfig`.
pub(super) fn default_dump_config() -> DumpConfig {
    DumpConfig {
        sentinel_path: default_dump_sentinel_path(),
        output_dir: default_dump_output_dir(),
    }
}

pub(super) fn default_dump_sentinel_path() -> PathBuf {
    PathBuf::from("/data/bq_dump")
}

pub(super) fn default_dump_output_dir() -> PathBuf {
    PathBuf::from("/data")
}
