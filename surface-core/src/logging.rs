//! Logging setup for the surface stack.
//!
//! Built on the `tracing` ecosystem: a console layer (text or JSON) and an
//! optional daily-rolling file layer through `tracing-appender`. The buffer
//! queue only emits `tracing` events; hosts decide here where they go.

use crate::config::LoggingConfig;
use crate::error::{CoreError, LoggingError};
use crate::utils;

use once_cell::sync::Lazy;
use std::io::stdout;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Holds the file writer's guard for the lifetime of the process so that
/// buffered lines are flushed on shutdown.
static LOG_WORKER_GUARD: Lazy<Mutex<Option<WorkerGuard>>> = Lazy::new(|| Mutex::new(None));

/// Installs `guard`, dropping (and thereby flushing) the previous one.
fn replace_worker_guard(guard: Option<WorkerGuard>) {
    let mut slot = LOG_WORKER_GUARD.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = guard;
}

/// Initializes a minimal logging setup, directing messages to `stderr`.
///
/// Intended for tests and early startup before configuration is loaded.
/// Filters by `RUST_LOG`, defaulting to `info`. Errors (e.g. a subscriber is
/// already installed) are ignored.
pub fn init_minimal_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .try_init();
}

/// Maps a configured level name to a `tracing` level.
fn parse_level(level: &str) -> Result<Level, CoreError> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        invalid_level => Err(CoreError::Logging(LoggingError::FilterError(format!(
            "Invalid log level in config: {}",
            invalid_level
        )))),
    }
}

/// Creates a file logging layer writing to a daily-rolling file.
///
/// The parent directory is created if needed. `format` is "json" or
/// anything else for plain text.
fn create_file_layer(log_path: &Path, format: &str) -> Result<(BoxedLayer, WorkerGuard), CoreError> {
    let directory = match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    utils::fs::ensure_dir_exists(directory)?;

    let file_name = log_path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("surface.log"));
    let file_appender = tracing_appender::rolling::daily(directory, file_name);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let layer: BoxedLayer = if format.eq_ignore_ascii_case("json") {
        fmt::layer().json().with_writer(non_blocking_writer).with_ansi(false).boxed()
    } else {
        fmt::layer().with_writer(non_blocking_writer).with_ansi(false).boxed()
    };
    Ok((layer, guard))
}

/// Initializes the global logging system from a [`LoggingConfig`].
///
/// Installs a registry with a stdout layer and, if `file_path` is set, a
/// file layer. On reload (`is_reload == true`) a failure to replace the
/// already-installed subscriber is reported on stderr and not as an error.
///
/// # Errors
///
/// Returns [`LoggingError::FilterError`] for an invalid level and
/// [`LoggingError::InitializationFailure`] when, on first initialization, a
/// global subscriber is already set.
pub fn init_logging(config: &LoggingConfig, is_reload: bool) -> Result<(), CoreError> {
    let level = parse_level(&config.level)?;

    let stdout_filter = EnvFilter::new(level.to_string());
    let stdout_layer: BoxedLayer = if config.format.eq_ignore_ascii_case("json") {
        fmt::layer()
            .json()
            .with_writer(stdout)
            .with_ansi(false)
            .with_filter(stdout_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(stdout)
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_filter(stdout_filter)
            .boxed()
    };

    let mut layers: Vec<BoxedLayer> = vec![stdout_layer];
    let mut new_file_guard: Option<WorkerGuard> = None;
    if let Some(log_path) = &config.file_path {
        let (file_layer, guard) = create_file_layer(log_path, &config.format)?;
        layers.push(file_layer.with_filter(EnvFilter::new(level.to_string())).boxed());
        new_file_guard = Some(guard);
    }

    let result = Registry::default().with(layers).try_init();

    // A new guard replaces the old one; disabling file logging clears it.
    replace_worker_guard(new_file_guard);

    match result {
        Ok(()) => Ok(()),
        Err(e) if is_reload => {
            eprintln!(
                "[INFO] Re-initializing logging configuration attempted. Previous logger may persist. Error: {}",
                e
            );
            Ok(())
        }
        Err(e) => Err(CoreError::Logging(LoggingError::InitializationFailure(format!(
            "Failed to set global tracing subscriber. Was it already initialized? Error: {}",
            e
        )))),
    }
}
