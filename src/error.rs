//! Error types for configuration, sinks and the dispatcher.

use thiserror::Error;

/// Invalid or missing configuration. Raised at construction time and never
/// partially applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one sink must be enabled")]
    NoSinksEnabled,

    #[error("unknown sink '{0}', expected one of: local, telemetry, webhook")]
    UnknownSink(String),

    #[error("invalid log level '{0}', expected one of: DEBUG, INFO, WARNING, ERROR, CRITICAL")]
    InvalidLevel(String),

    #[error("webhook sink enabled but no webhook URL provided")]
    MissingWebhookUrl,

    #[error("local sink enabled but no log directory provided")]
    MissingLogDir,

    #[error("local sink enabled but no log file name provided")]
    MissingLogFileName,

    #[error("max_message_length must be positive")]
    InvalidMessageLength,

    #[error("invalid filter pattern '{pattern}': {reason}")]
    InvalidFilterPattern { pattern: String, reason: String },

    #[error("invalid batching setting: {0}")]
    InvalidBatching(String),

    #[error("invalid configuration attribute: {0}")]
    UnknownAttribute(String),

    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Failures raised by an individual sink. These never escape the dispatcher's
/// logging methods.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to format record: {0}")]
    Format(String),

    #[error("sink '{sink}' is disabled: {reason}")]
    Disabled { sink: String, reason: String },

    #[error("sink '{0}' has been cleaned up")]
    Closed(String),
}

impl SinkError {
    pub fn disabled(sink: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Disabled {
            sink: sink.into(),
            reason: reason.into(),
        }
    }
}

/// Failures surfaced by the dispatcher and the sink manager.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no sink could be initialized")]
    NoUsableSinks,

    #[error("a sink named '{0}' is already registered")]
    DuplicateSink(String),

    #[error("operation not allowed while the dispatcher is {0}")]
    InvalidState(&'static str),
}
