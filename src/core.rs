//! Core domain types and the sink capability trait.
//!
//! This module defines the log levels and records that flow through the
//! dispatcher, the set of known sink kinds, and the `Sink` trait every
//! backend implements.

use crate::error::{ConfigError, SinkError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity of a log record, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    #[serde(alias = "debug")]
    Debug,
    #[serde(alias = "info")]
    Info,
    #[serde(alias = "warning", alias = "WARN", alias = "warn")]
    Warning,
    #[serde(alias = "error")]
    Error,
    #[serde(alias = "critical")]
    Critical,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warning,
        LogLevel::Error,
        LogLevel::Critical,
    ];

    /// The canonical upper-case name of the level.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    /// Numeric value of the level (10 for DEBUG through 50 for CRITICAL).
    pub fn value(&self) -> u8 {
        match self {
            LogLevel::Debug => 10,
            LogLevel::Info => 20,
            LogLevel::Warning => 30,
            LogLevel::Error => 40,
            LogLevel::Critical => 50,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    /// Accepts level names in any case, `WARN`, and the numeric values.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "DEBUG" | "10" => Ok(LogLevel::Debug),
            "INFO" | "20" => Ok(LogLevel::Info),
            "WARNING" | "WARN" | "30" => Ok(LogLevel::Warning),
            "ERROR" | "40" => Ok(LogLevel::Error),
            "CRITICAL" | "50" => Ok(LogLevel::Critical),
            _ => Err(ConfigError::InvalidLevel(trimmed.to_string())),
        }
    }
}

/// The known sink backends. The derived ordering is the registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Local,
    Telemetry,
    Webhook,
}

impl SinkKind {
    pub const ALL: [SinkKind; 3] = [SinkKind::Local, SinkKind::Telemetry, SinkKind::Webhook];

    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Local => "local",
            SinkKind::Telemetry => "telemetry",
            SinkKind::Webhook => "webhook",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SinkKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(SinkKind::Local),
            "telemetry" => Ok(SinkKind::Telemetry),
            "webhook" => Ok(SinkKind::Webhook),
            other => Err(ConfigError::UnknownSink(other.to_string())),
        }
    }
}

/// A single log call as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    /// Formatted error chain captured with the call, if any.
    pub error_trace: Option<String>,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            error_trace: None,
        }
    }

    pub fn with_error(mut self, err: &(dyn std::error::Error + 'static)) -> Self {
        self.error_trace = Some(format_error_chain(err));
        self
    }

    /// The text handed to sinks: the message followed by the error trace.
    pub fn body(&self) -> String {
        match &self.error_trace {
            Some(trace) => format!("{}\n{}", self.message, trace),
            None => self.message.clone(),
        }
    }
}

/// Renders an error and its `source()` chain, one cause per line.
pub fn format_error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = format!("Error: {}", err);
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(&format!("\nCaused by: {}", cause));
        source = cause.source();
    }
    out
}

// =============================================================================
// Sink Trait
// =============================================================================

/// A logging backend.
///
/// `log` and the leveled helpers are synchronous and must never block on I/O
/// owned by a background task; sinks that deliver asynchronously enqueue and
/// return. `initialize` and `cleanup` are the only suspension points.
#[async_trait]
pub trait Sink: Send + Sync {
    /// A unique, descriptive name for the sink (e.g., "local", "webhook").
    fn name(&self) -> &str;

    /// Performs any asynchronous setup. Called once by the sink manager
    /// before the dispatcher becomes ready.
    async fn initialize(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Whether the sink currently accepts records.
    fn is_active(&self) -> bool {
        true
    }

    /// Records a message at the given level.
    fn log(&self, level: LogLevel, message: &str) -> Result<(), SinkError>;

    fn debug(&self, message: &str) -> Result<(), SinkError> {
        self.log(LogLevel::Debug, message)
    }

    fn info(&self, message: &str) -> Result<(), SinkError> {
        self.log(LogLevel::Info, message)
    }

    fn warning(&self, message: &str) -> Result<(), SinkError> {
        self.log(LogLevel::Warning, message)
    }

    fn error(&self, message: &str) -> Result<(), SinkError> {
        self.log(LogLevel::Error, message)
    }

    fn critical(&self, message: &str) -> Result<(), SinkError> {
        self.log(LogLevel::Critical, message)
    }

    /// Records an error together with some context, at ERROR level.
    fn exception(
        &self,
        err: &(dyn std::error::Error + 'static),
        message: &str,
    ) -> Result<(), SinkError> {
        self.log(LogLevel::Error, &format!("{}: {}", message, err))
    }

    /// Records a structured result value at INFO level.
    fn result_data(&self, data: &serde_json::Value) -> Result<(), SinkError> {
        let formatted =
            serde_json::to_string_pretty(data).map_err(|e| SinkError::Format(e.to_string()))?;
        self.log(LogLevel::Info, &format!("Result Data: {}", formatted))
    }

    /// Records that a unit of work failed. Only sinks with a dedicated
    /// result channel act on this.
    fn result_failed(&self, _message: &str) -> Result<(), SinkError> {
        Ok(())
    }

    /// Releases the sink's resources. Must be safe to call more than once.
    async fn cleanup(&self);
}
