//! # Logging Utilities
//!
//! Logging bootstrap for Rendezvous hosts using `tracing`.
//!
//! Supports pretty output for development, JSON for production, `RUST_LOG`
//! filtering, and an optional log file.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rendezvous_utils::init_logging;
//!
//! // Reads RUST_LOG, RENDEZVOUS_LOG_FORMAT and RENDEZVOUS_LOG_FILE
//! init_logging().expect("Failed to initialize logging");
//!
//! tracing::info!("Host started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Level filter (e.g., `RUST_LOG=debug`, `RUST_LOG=rendezvous_core=debug`)
//! - `RENDEZVOUS_LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
//! - `RENDEZVOUS_LOG_FILE`: Optional log file written next to console output
//!
//! ## Embedded hosts
//!
//! A process that links `rendezvous-core` may already write to stdout for its
//! own purposes. [`init_logging_to_file`] keeps attach diagnostics out of it.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io, process};

use chrono::Utc;
use tracing::Level;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "RENDEZVOUS_LOG_FORMAT";

/// Environment variable naming an additional log file.
pub const LOG_FILE_ENV: &str = "RENDEZVOUS_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default for development)
    #[default]
    Pretty,
    /// JSON format (default for production)
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(format!("{s}. Use 'pretty' or 'json'"))),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(format!(
                "{s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            ))),
        }
    }
}

/// Initialize logging with default settings
///
/// Reads configuration from environment variables:
/// - `RUST_LOG`: Log level filter (e.g., `debug`, `rendezvous_core=debug`)
/// - `RENDEZVOUS_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
/// - `RENDEZVOUS_LOG_FILE`: Optional path to an additional log file
///
/// An unrecognised format falls back to `pretty`.
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging() -> Result<(), LoggingError>
{
    let format = env::var(LOG_FORMAT_ENV)
        .ok()
        .and_then(|s| LogFormat::from_str(&s).ok())
        .unwrap_or_default();

    let filter = filter_from_env(None);
    let log_file = env::var(LOG_FILE_ENV).ok().map(PathBuf::from);

    let mut layers = vec![console_layer(format, filter.clone())];
    if let Some(path) = log_file {
        layers.push(file_layer(&path, format, filter, Rotation::Daily));
    }
    install(layers)
}

/// Initialize logging with explicit level and format
///
/// `RUST_LOG` is ignored; the given level applies to every target.
///
/// ```rust,no_run
/// use rendezvous_utils::{LogFormat, LogLevel, init_logging_with_level};
///
/// init_logging_with_level(LogLevel::Debug, LogFormat::Json).expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<(), LoggingError>
{
    let filter = EnvFilter::new(Level::from(level).to_string());
    install(vec![console_layer(format, filter)])
}

/// Initialize file-only logging (nothing on stdout/stderr)
///
/// The file is `~/.rendezvous/YYYY-MM-DD-<pid>.log`, or the same name under
/// `/tmp` when `HOME` is not set. Returns the chosen path.
///
/// ## Arguments
///
/// * `level` - Optional log level. If `None`, uses `RUST_LOG` or defaults to `INFO`.
///
/// ## Errors
///
/// Returns an error if the log directory cannot be created or a global
/// subscriber is already installed.
pub fn init_logging_to_file(level: Option<LogLevel>) -> Result<PathBuf, LoggingError>
{
    let today = Utc::now().format("%Y-%m-%d");
    let file_name = format!("{today}-{}.log", process::id());
    let log_file = if let Ok(home) = env::var("HOME") {
        let dir = PathBuf::from(home).join(".rendezvous");
        std::fs::create_dir_all(&dir).map_err(LoggingError::FileError)?;
        dir.join(file_name)
    } else {
        PathBuf::from("/tmp").join(file_name)
    };

    let filter = filter_from_env(level.map(Into::into));
    install(vec![file_layer(&log_file, LogFormat::Pretty, filter, Rotation::Never)])?;
    Ok(log_file)
}

/// Priority:
/// 1. An explicit level (from a CLI flag)
/// 2. `RUST_LOG`, which allows per-target filters like `rendezvous_core=debug`
/// 3. `INFO`
fn filter_from_env(explicit: Option<Level>) -> EnvFilter
{
    if let Some(level) = explicit {
        return EnvFilter::new(level.to_string());
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()))
}

#[derive(Debug, Clone, Copy)]
enum Rotation
{
    Daily,
    Never,
}

fn console_layer(format: LogFormat, filter: EnvFilter) -> BoxedLayer
{
    formatted_layer(format, io::stdout, true, filter)
}

fn file_layer(path: &Path, format: LogFormat, filter: EnvFilter, rotation: Rotation) -> BoxedLayer
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path.file_name().unwrap_or_default();
    let appender = match rotation {
        Rotation::Daily => tracing_appender::rolling::daily(dir, name),
        Rotation::Never => tracing_appender::rolling::never(dir, name),
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    // The worker must outlive the subscriber, which lives for the process.
    std::mem::forget(guard);

    formatted_layer(format, non_blocking, false, filter)
}

fn formatted_layer<W>(format: LogFormat, writer: W, ansi: bool, filter: EnvFilter) -> BoxedLayer
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let base = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339());

    match format {
        LogFormat::Pretty => base.with_ansi(ansi).with_filter(filter).boxed(),
        LogFormat::Json => base
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

fn install(layers: Vec<BoxedLayer>) -> Result<(), LoggingError>
{
    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
