//! Configuration Data Structures.
//!
//! These structures are populated by deserializing a TOML document. Missing
//! fields take their values from [`super::defaults`], and unknown fields are
//! rejected via `#[serde(deny_unknown_fields)]`.
//!
//! # Key Structs
//! - [`SurfaceConfig`]: The root configuration structure.
//! - [`LoggingConfig`]: Settings for the logging subsystem.
//! - [`QueueConfig`]: Defaults applied to every buffer queue built from it.
//! - [`DumpConfig`]: Locations used by the raw-pixel debug dump.

use super::defaults;
use serde::Deserialize;
use std::path::PathBuf;

/// Configuration settings for the logging subsystem.
///
/// # Examples
///
/// ```
/// use surface_core::config::LoggingConfig;
/// use std::path::PathBuf;
///
/// let default_log_config = LoggingConfig::default();
/// assert_eq!(default_log_config.level, "info");
/// assert_eq!(default_log_config.file_path, None);
/// assert_eq!(default_log_config.format, "text");
///
/// let log_config: LoggingConfig = toml::from_str(r#"
/// level = "debug"
/// file_path = "/var/log/surface.log"
/// format = "json"
/// "#).unwrap();
/// assert_eq!(log_config.level, "debug");
/// assert_eq!(log_config.file_path, Some(PathBuf::from("/var/log/surface.log")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Minimum level: "trace", "debug", "info", "warn" or "error" (case-insensitive).
    #[serde(default = "defaults::default_log_level")]
    pub level: String,
    /// Optional log file. `None` disables file logging.
    #[serde(default = "defaults::default_log_file_path")]
    pub file_path: Option<PathBuf>,
    /// "text" or "json".
    #[serde(default = "defaults::default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        defaults::default_logging_config()
    }
}

/// Where the flush-time raw-pixel dump looks for its trigger and writes files.
///
/// The dump only runs while `sentinel_path` exists on disk.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DumpConfig {
    #[serde(default = "defaults::default_dump_sentinel_path")]
    pub sentinel_path: PathBuf,
    #[serde(default = "defaults::default_dump_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for DumpConfig {
    fn default() -> Self {
        defaults::default_dump_config()
    }
}

/// Per-queue defaults.
///
/// # Examples
///
/// ```
/// use surface_core::config::QueueConfig;
///
/// let queue: QueueConfig = toml::from_str("default_queue_size = 4").unwrap();
/// assert_eq!(queue.default_queue_size, 4);
/// assert_eq!(queue.default_width, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Initial queue size, in `[1, SURFACE_MAX_QUEUE_SIZE]`.
    #[serde(default = "defaults::default_queue_size")]
    pub default_queue_size: u32,
    /// Default width advertised to producers; 0 means unset.
    #[serde(default)]
    pub default_width: i32,
    /// Default height advertised to producers; 0 means unset.
    #[serde(default)]
    pub default_height: i32,
    /// Default usage bits advertised to producers.
    #[serde(default)]
    pub default_usage: u64,
    #[serde(default = "defaults::default_dump_config")]
    pub dump: DumpConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        defaults::default_queue_config()
    }
}

/// Root configuration structure.
///
/// # Examples
///
/// ```
/// use surface_core::config::SurfaceConfig;
///
/// let loaded: SurfaceConfig = toml::from_str(r#"
/// [logging]
/// level = "warn"
///
/// [queue]
/// default_queue_size = 5
/// "#).unwrap();
/// assert_eq!(loaded.logging.level, "warn");
/// assert_eq!(loaded.queue.default_queue_size, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SurfaceConfig {
    #[serde(default = "defaults::default_logging_config")]
    pub logging: LoggingConfig,
    #[serde(default = "defaults::default_queue_config")]
    pub queue: QueueConfig,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            logging: defaults::default_logging_config(),
            queue: defaults::default_queue_config(),
        }
    }
}
