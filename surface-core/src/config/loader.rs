//! Configuration Loading.
//!
//! [`ConfigLoader`] locates, parses and validates [`SurfaceConfig`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use surface_core::config::ConfigLoader;
//!
//! match ConfigLoader::load() {
//!     Ok(config) => println!("queue size: {}", config.queue.default_queue_size),
//!     Err(e) => {
//!         surface_core::logging::init_minimal_logging();
//!         tracing::error!("Configuration loading failed: {}", e);
//!     }
//! }
//! ```
//!
//! ## Configuration File Location
//!
//! `ConfigLoader::load()` reads two layers and merges them key by key, the
//! user layer winning:
//! 1. The system file, `/etc/surface/config.toml`, or the path named by
//!    `SURFACE_SYSTEM_CONFIG_PATH`.
//! 2. `config.toml` in the per-user configuration directory resolved through
//!    `directories-next`.
//!
//! Missing files are not an error; defaults fill in.
//!
//! ## Validation
//!
//! - Log level and format are normalized to lowercase and checked.
//! - A relative log file path is resolved against the per-user data directory
//!   and its parent directory is created.
//! - `queue.default_queue_size` must lie in `[1, SURFACE_MAX_QUEUE_SIZE]`.
//! - `queue.default_width`/`default_height` must be 0 (unset) or within
//!   `(0, SURFACE_MAX_WIDTH]`/`(0, SURFACE_MAX_HEIGHT]`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use directories_next::ProjectDirs;
use toml::Value;

use crate::config::{QueueConfig, SurfaceConfig};
use crate::error::{ConfigError, CoreError};
use crate::limits::{SURFACE_MAX_HEIGHT, SURFACE_MAX_QUEUE_SIZE, SURFACE_MAX_WIDTH};
use crate::utils::fs as surface_fs;

const QUALIFIER: &str = "org";
const ORGANIZATION: &str = "Surface";
const APPLICATION: &str = "surface";

/// Environment variable overriding the system configuration path.
pub const SYSTEM_CONFIG_PATH_ENV: &str = "SURFACE_SYSTEM_CONFIG_PATH";
const DEFAULT_SYSTEM_CONFIG_PATH: &str = "/etc/surface/config.toml";

/// Namespace for configuration loading.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the merged system and user configuration and validates it.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ReadError`] if a file exists but cannot be read.
    /// - [`ConfigError::ParseError`] for malformed TOML or schema mismatches.
    /// - [`ConfigError::ValidationError`] for out-of-range values.
    /// - [`ConfigError::DirectoryUnavailable`] if no per-user directory exists.
    pub fn load() -> Result<SurfaceConfig, CoreError> {
        let system_value = Self::read_toml_value(&Self::system_config_path())?;
        let user_value = Self::read_toml_value(&Self::user_config_dir()?.join("config.toml"))?;

        let mut config = match Self::merge_toml_values(system_value, user_value) {
            Some(value) => value.try_into().map_err(ConfigError::ParseError)?,
            None => SurfaceConfig::default(),
        };

        Self::validate_config(&mut config)?;
        Ok(config)
    }

    /// Parses a single TOML document and validates it.
    pub fn load_from_str(content: &str) -> Result<SurfaceConfig, CoreError> {
        let mut config: SurfaceConfig = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Self::validate_config(&mut config)?;
        Ok(config)
    }

    /// Reads, parses and validates one configuration file.
    pub fn load_from_path(path: &Path) -> Result<SurfaceConfig, CoreError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::load_from_str(&content)
    }

    fn system_config_path() -> PathBuf {
        env::var_os(SYSTEM_CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSTEM_CONFIG_PATH))
    }

    fn project_dirs() -> Result<ProjectDirs, CoreError> {
        ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION).ok_or_else(|| {
            ConfigError::DirectoryUnavailable {
                dir_type: "application".to_string(),
            }
            .into()
        })
    }

    fn user_config_dir() -> Result<PathBuf, CoreError> {
        Ok(Self::project_dirs()?.config_dir().to_path_buf())
    }

    /// Reads a TOML file into a generic value; a missing or blank file yields `None`.
    fn read_toml_value(path: &Path) -> Result<Option<Value>, CoreError> {
        match fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => Ok(None),
            Ok(content) => Ok(Some(content.parse::<Value>().map_err(ConfigError::ParseError)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }
            .into()),
        }
    }

    /// Merges two optional TOML values. `override_val` takes precedence.
    fn merge_toml_values(base: Option<Value>, override_val: Option<Value>) -> Option<Value> {
        match (base, override_val) {
            (None, None) => None,
            (Some(b), None) => Some(b),
            (None, Some(o)) => Some(o),
            (Some(Value::Table(mut base_table)), Some(Value::Table(override_table))) => {
                Self::merge_toml_tables(&mut base_table, &override_table);
                Some(Value::Table(base_table))
            }
            (_, Some(o)) => Some(o),
        }
    }

    /// Recursively merges `override_table` into `base_table`.
    fn merge_toml_tables(
        base_table: &mut toml::map::Map<String, Value>,
        override_table: &toml::map::Map<String, Value>,
    ) {
        for (key, override_item) in override_table {
            match base_table.get_mut(key) {
                Some(base_item) => {
                    if let (Value::Table(bt), Value::Table(ot)) = (&mut *base_item, override_item) {
                        Self::merge_toml_tables(bt, ot);
                    } else {
                        *base_item = override_item.clone();
                    }
                }
                None => {
                    base_table.insert(key.clone(), override_item.clone());
                }
            }
        }
    }

    fn validate_config(config: &mut SurfaceConfig) -> Result<(), CoreError> {
        let level_lower = config.logging.level.to_lowercase();
        if !matches!(level_lower.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: '{}'. Must be one of trace, debug, info, warn, error.",
                config.logging.level
            ))
            .into());
        }
        config.logging.level = level_lower;

        let format_lower = config.logging.format.to_lowercase();
        if !matches!(format_lower.as_str(), "text" | "json") {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log format: '{}'. Must be one of text, json.",
                config.logging.format
            ))
            .into());
        }
        config.logging.format = format_lower;

        if let Some(path) = &config.logging.file_path {
            let absolute_path = if path.is_absolute() {
                path.clone()
            } else {
                Self::project_dirs()?.data_local_dir().join(path)
            };
            if let Some(parent_dir) = absolute_path.parent() {
                if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                    surface_fs::ensure_dir_exists(parent_dir)?;
                }
            }
            config.logging.file_path = Some(absolute_path);
        }

        Self::validate_queue_config(&config.queue)
    }

    fn validate_queue_config(queue: &QueueConfig) -> Result<(), CoreError> {
        if queue.default_queue_size == 0 || queue.default_queue_size > SURFACE_MAX_QUEUE_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "queue.default_queue_size must be in [1, {}], got {}",
                SURFACE_MAX_QUEUE_SIZE, queue.default_queue_size
            ))
            .into());
        }

        if queue.default_width < 0 || queue.default_width > SURFACE_MAX_WIDTH {
            return Err(ConfigError::ValidationError(format!(
                "queue.default_width must be 0 or in (0, {}], got {}",
                SURFACE_MAX_WIDTH, queue.default_width
            ))
            .into());
        }

        if queue.default_height < 0 || queue.default_height > SURFACE_MAX_HEIGHT {
            return Err(ConfigError::ValidationError(format!(
                "queue.default_height must be 0 or in (0, {}], got {}",
                SURFACE_MAX_HEIGHT, queue.default_height
            ))
            .into());
        }

        Ok(())
    }
}
