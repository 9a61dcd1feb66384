//! # Surface Core Library (`surface-core`)
//!
//! `surface-core` holds the ambient pieces shared by the surface crates:
//!
//! - **Error Handling**: [`CoreError`] with the specific [`ConfigError`] and
//!   [`LoggingError`] types.
//! - **Configuration**: TOML loading with defaults and validation through
//!   [`ConfigLoader`] and [`SurfaceConfig`].
//! - **Logging**: `tracing` based console and file output, configured from
//!   [`LoggingConfig`].
//! - **Limits**: protocol bounds for buffer geometry and queue sizes.
//! - **Types**: small value types such as [`Rect`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use surface_core::config::ConfigLoader;
//! use surface_core::logging::init_logging;
//! use surface_core::error::CoreError;
//!
//! fn main() -> Result<(), CoreError> {
//!     let config = ConfigLoader::load()?;
//!     init_logging(&config.logging, false)?;
//!     tracing::info!("surface core initialized");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod limits;
pub mod logging;
pub mod types;
pub mod utils;

pub use config::{ConfigLoader, DumpConfig, LoggingConfig, QueueConfig, SurfaceConfig};
pub use error::{ConfigError, CoreError, LoggingError};
pub use logging::{init_logging, init_minimal_logging};
pub use types::Rect;
