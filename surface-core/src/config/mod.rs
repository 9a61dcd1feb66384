//! Configuration Management.
//!
//! - [`types`]: the schema ([`SurfaceConfig`], [`LoggingConfig`], [`QueueConfig`], [`DumpConfig`]).
//! - [`defaults`]: default values used by `serde` for missing fields.
//! - [`loader`]: [`ConfigLoader`], which reads, merges and validates TOML files.
//!
//! # Examples
//!
//! ```rust
//! use surface_core::config::ConfigLoader;
//!
//! let config = ConfigLoader::load_from_str("[queue]\ndefault_queue_size = 4").unwrap();
//! assert_eq!(config.queue.default_queue_size, 4);
//! ```

pub mod defaults;
pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::{DumpConfig, LoggingConfig, QueueConfig, SurfaceConfig};
