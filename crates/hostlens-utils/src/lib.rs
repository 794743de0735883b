//! # Hostlens Utilities
//!
//! Logging setup shared by hostlens consumers.
//!
//! `hostlens-core` only emits `tracing` events; whoever embeds it decides
//! where they go. The helpers here cover the usual cases: console output
//! while developing, and a dated file when running inside a host process
//! whose stdout belongs to someone else.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{init_logging, init_logging_to_file, init_logging_with_level, LogFormat, LogGuard, LogLevel, LoggingError};
pub use tracing::{debug, error, info, trace, warn};
