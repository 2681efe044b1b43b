//! Structured Logging
//!
//! JSON output for production, pretty output for development.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

/// Log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Log format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty-printed for development
    #[default]
    Pretty,
    /// JSON for production
    Json,
    /// Compact single-line
    Compact,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Include source file/line
    pub include_source: bool,
    pub include_thread_id: bool,
    pub include_span_events: bool,
    /// Filter directive (e.g. "jctc_storage=debug,jctc_core=info"), overrides `level`
    pub filter: Option<String>,
    /// Crate targets `level` applies to
    pub targets: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            include_source: true,
            include_thread_id: false,
            include_span_events: false,
            filter: None,
            targets: vec!["jctc_core".into(), "jctc_storage".into(), "jctc_cli".into()],
        }
    }
}

impl LogConfig {
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            include_source: false,
            include_thread_id: true,
            include_span_events: true,
            ..Self::default()
        }
    }

    pub fn development() -> Self {
        Self {
            level: LogLevel::Debug,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Filter directive this config resolves to
    pub fn directive(&self) -> String {
        match &self.filter {
            Some(f) => f.clone(),
            None => self
                .targets
                .iter()
                .map(|t| format!("{}={}", t, self.level))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Initialize the global subscriber
pub fn init_logging(config: &LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_new(config.directive())?;

    let span_events = if config.include_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match config.format {
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .json()
                    .with_span_events(span_events)
                    .with_thread_ids(config.include_thread_id)
                    .with_file(config.include_source)
                    .with_line_number(config.include_source),
            );
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Pretty => {
            let subscriber = tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .pretty()
                    .with_span_events(span_events)
                    .with_thread_ids(config.include_thread_id)
                    .with_file(config.include_source)
                    .with_line_number(config.include_source),
            );
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Compact => {
            let subscriber = tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .compact()
                    .with_span_events(span_events)
                    .with_thread_ids(config.include_thread_id)
                    .with_file(config.include_source)
                    .with_line_number(config.include_source),
            );
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}
