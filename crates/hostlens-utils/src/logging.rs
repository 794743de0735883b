//! # Logging Utilities
//!
//! `tracing-subscriber` setup for hostlens.
//!
//! - Pretty output for development, JSON for collection
//! - `RUST_LOG` filters (`hostlens_core=debug`, `hostlens_core::imports=trace`)
//! - Optional file output through `tracing-appender`, flushed on a worker thread
//!
//! Every initializer returns a [`LogGuard`]. File output stops when it is
//! dropped, so keep it alive for as long as logging should run.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hostlens_utils::init_logging;
//!
//! let _guard = init_logging().expect("Failed to initialize logging");
//! tracing::info!("attached");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: level filter (default `info`)
//! - `HOSTLENS_LOG_FORMAT`: `pretty` (default) or `json`
//! - `HOSTLENS_LOG_FILE`: also write to this file, rotated daily
//!
//! ## Inside a Host
//!
//! ```rust,no_run
//! use hostlens_utils::{init_logging_to_file, LogLevel};
//!
//! let (path, _guard) = init_logging_to_file("/tmp/hostlens", Some(LogLevel::Debug)).unwrap();
//! tracing::debug!(path = %path.display(), "logging to file");
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fs, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Output format selector
pub const FORMAT_ENV: &str = "HOSTLENS_LOG_FORMAT";
/// Extra log file
pub const FILE_ENV: &str = "HOSTLENS_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" | "dev" => Ok(Self::Pretty),
            "json" | "prod" => Ok(Self::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    Error,
    Warn,
    Info,
    Debug,
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
        match s.trim().to_ascii_lowercase().as_str() {
            "error" | "err" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" | "dbg" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Keeps file output flushing; drop it to stop
#[must_use = "file output stops when the guard is dropped"]
#[derive(Debug, Default)]
pub struct LogGuard
{
    _file: Option<WorkerGuard>,
}

/// Initialize from the environment
///
/// ## Errors
///
/// - [`LoggingError::InvalidFormat`] for an unknown `HOSTLENS_LOG_FORMAT`
/// - [`LoggingError::FileError`] if the `HOSTLENS_LOG_FILE` directory cannot be created
/// - [`LoggingError::InitializationFailed`] if a global subscriber is already set
pub fn init_logging() -> Result<LogGuard, LoggingError>
{
    let format = match env::var(FORMAT_ENV) {
        Ok(value) => value.parse()?,
        Err(_) => LogFormat::default(),
    };
    let file = env::var_os(FILE_ENV).map(PathBuf::from);
    init(format, None, file.as_deref(), true)
}

/// Initialize console logging with an explicit level; `RUST_LOG` is ignored
///
/// ## Errors
///
/// [`LoggingError::InitializationFailed`] if a global subscriber is already set.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LogGuard, LoggingError>
{
    init(format, Some(level.into()), None, true)
}

/// Initialize file-only logging into `dir`
///
/// The file is named `YYYY-MM-DD-hostlens.log` and never rotated. Nothing is
/// written to stdout or stderr. Without `level`, `RUST_LOG` applies.
///
/// ## Errors
///
/// [`LoggingError::FileError`] if `dir` cannot be created, otherwise as for
/// [`init_logging_with_level`].
pub fn init_logging_to_file(
    dir: impl AsRef<Path>,
    level: Option<LogLevel>,
) -> Result<(PathBuf, LogGuard), LoggingError>
{
    let path = dir.as_ref().join(dated_file_name(&Utc::now().format("%Y-%m-%d").to_string()));
    let guard = init(LogFormat::Pretty, level.map(Into::into), Some(&path), false)?;
    Ok((path, guard))
}

fn dated_file_name(date: &str) -> String
{
    format!("{date}-hostlens.log")
}

/// `explicit` wins; then `RUST_LOG`; then `info`
fn build_filter(explicit: Option<Level>) -> EnvFilter
{
    match explicit {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
    }
}

fn build_layer<W>(format: LogFormat, writer: W, ansi: bool, filter: EnvFilter) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339());
    match format {
        LogFormat::Pretty => layer.with_ansi(ansi).with_filter(filter).boxed(),
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

fn init(format: LogFormat, explicit: Option<Level>, file: Option<&Path>, console: bool) -> Result<LogGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = Vec::with_capacity(2);
    let mut guard = LogGuard::default();

    if console {
        layers.push(build_layer(format, io::stdout, true, build_filter(explicit)));
    }

    if let Some(path) = file {
        let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| LoggingError::InitializationFailed(format!("not a file path: {}", path.display())))?;
        fs::create_dir_all(dir)?;
        let appender = if console {
            tracing_appender::rolling::daily(dir, name)
        } else {
            // The name already carries the date
            tracing_appender::rolling::never(dir, name)
        };
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(build_layer(format, writer, false, build_filter(explicit)));
        guard._file = Some(worker);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(guard)
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    #[error("Invalid log format: {0} (expected 'pretty' or 'json')")]
    InvalidFormat(String),

    #[error("Invalid log level: {0} (expected error, warn, info, debug or trace)")]
    InvalidLevel(String),

    /// A global subscriber is already installed, or the file path is unusable
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
