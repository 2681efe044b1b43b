//! Telemetry
//!
//! Structured logging for the retention engine.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
