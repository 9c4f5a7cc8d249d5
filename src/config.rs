//! Configuration management for unilog
//!
//! This module defines the `SinkConfig` struct, responsible for holding every
//! setting the dispatcher and its sinks need. It uses the `figment` crate to
//! layer defaults, a `unilog.toml` file, environment variables and
//! command-line arguments, and then validates the merged result.

use crate::cli::Cli;
use crate::core::{LogLevel, SinkKind};
use crate::error::ConfigError;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// The default prefix every webhook URL must start with.
pub const DEFAULT_WEBHOOK_URL_PREFIX: &str = "https://discord.com/api/webhooks/";

/// The main configuration struct.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SinkConfig {
    /// The sinks to construct. Accepts a list or a comma-separated string.
    #[serde(deserialize_with = "deserialize_sink_set")]
    pub enabled_sinks: BTreeSet<SinkKind>,
    /// Name used for the local sink and as the webhook username.
    pub logger_name: String,
    /// Records below this level are not dispatched.
    #[serde(deserialize_with = "deserialize_level")]
    pub log_level: LogLevel,
    /// Mirror local records to the terminal.
    pub enable_terminal_output: bool,
    /// Minimum level printed to the terminal.
    #[serde(deserialize_with = "deserialize_level")]
    pub terminal_level: LogLevel,
    /// Messages longer than this many characters are truncated.
    pub max_message_length: usize,
    /// Messages matching any of these regular expressions are suppressed.
    pub filter_patterns: Vec<String>,
    /// Directory holding the local log file.
    pub log_dir: PathBuf,
    /// File name of the local log file.
    pub log_file_name: String,
    /// The webhook endpoint.
    pub webhook_url: Option<String>,
    /// Prefix the webhook endpoint must start with.
    pub webhook_url_prefix: String,
    /// Queue length that triggers a flush.
    pub batch_size: usize,
    /// Maximum age of queued records before a flush, in milliseconds.
    pub batch_interval_ms: u64,
    /// Retry budget for a single delivery.
    pub max_retries: u32,
    /// Base delay between retries, in milliseconds.
    pub retry_delay_ms: u64,
    /// Per-request timeout, in milliseconds.
    pub request_timeout_ms: u64,
    /// How often the flush worker wakes up, in milliseconds.
    pub flush_tick_ms: u64,
    /// Maximum length of a webhook embed description.
    pub max_embed_length: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            enabled_sinks: BTreeSet::from([SinkKind::Local]),
            logger_name: "unified_logger".to_string(),
            log_level: LogLevel::Info,
            enable_terminal_output: false,
            terminal_level: LogLevel::Warning,
            max_message_length: 10_000,
            filter_patterns: vec![],
            log_dir: PathBuf::from("logs"),
            log_file_name: "app.log".to_string(),
            webhook_url: None,
            webhook_url_prefix: DEFAULT_WEBHOOK_URL_PREFIX.to_string(),
            batch_size: 5,
            batch_interval_ms: 5_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            request_timeout_ms: 5_000,
            flush_tick_ms: 1_000,
            max_embed_length: 1_900,
        }
    }
}

impl SinkConfig {
    /// Creates a default configuration with the given sinks enabled.
    pub fn with_sinks(sinks: impl IntoIterator<Item = SinkKind>) -> Self {
        Self {
            enabled_sinks: sinks.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Loads and validates the configuration.
    ///
    /// Sources are layered, lowest priority first: built-in defaults, the TOML
    /// file (`--config`, or `unilog.toml` if present), `UNILOG_`-prefixed
    /// environment variables, and command-line arguments.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from("unilog.toml"));

        let mut config: SinkConfig = Figment::new()
            .merge(Serialized::defaults(SinkConfig::default()))
            .merge(Toml::file(config_path))
            // e.g. UNILOG_LOG_LEVEL=debug, UNILOG_ENABLED_SINKS=local,webhook
            .merge(Env::prefixed("UNILOG_"))
            .merge(cli.clone())
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every rule and normalizes the terminal level.
    ///
    /// Fails on the first violation. The only adjustment made is raising a
    /// more verbose terminal level to the base log level.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.enabled_sinks.is_empty() {
            return Err(ConfigError::NoSinksEnabled);
        }

        if self.enable_terminal_output && self.terminal_level < self.log_level {
            self.terminal_level = self.log_level;
        }

        if self.max_message_length == 0 {
            return Err(ConfigError::InvalidMessageLength);
        }

        if self.enabled_sinks.contains(&SinkKind::Webhook) {
            match &self.webhook_url {
                Some(url) if !url.trim().is_empty() => {}
                _ => return Err(ConfigError::MissingWebhookUrl),
            }
            if self.batch_size == 0 {
                return Err(ConfigError::InvalidBatching(
                    "batch_size must be positive".to_string(),
                ));
            }
            if self.flush_tick_ms == 0 {
                return Err(ConfigError::InvalidBatching(
                    "flush_tick_ms must be positive".to_string(),
                ));
            }
            if self.max_embed_length < 4 {
                return Err(ConfigError::InvalidBatching(
                    "max_embed_length must be at least 4".to_string(),
                ));
            }
        }

        if self.enabled_sinks.contains(&SinkKind::Local) {
            if self.log_dir.as_os_str().is_empty() {
                return Err(ConfigError::MissingLogDir);
            }
            if self.log_file_name.trim().is_empty() {
                return Err(ConfigError::MissingLogFileName);
            }
        }

        self.compile_filters()?;
        Ok(())
    }

    /// Applies a partial update given as a JSON object.
    ///
    /// Unknown attribute names are rejected. The merged configuration is fully
    /// re-validated and only replaces `self` if it passes.
    pub fn update(&mut self, changes: serde_json::Value) -> Result<(), ConfigError> {
        let serde_json::Value::Object(changes) = changes else {
            return Err(ConfigError::InvalidValue(
                "configuration update must be an object".to_string(),
            ));
        };

        let mut merged =
            serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        let fields = merged.as_object_mut().ok_or_else(|| {
            ConfigError::InvalidValue("configuration did not serialize to an object".to_string())
        })?;
        for (key, value) in changes {
            if !fields.contains_key(&key) {
                return Err(ConfigError::UnknownAttribute(key));
            }
            fields.insert(key, value);
        }

        let mut candidate: SinkConfig =
            serde_json::from_value(merged).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    /// Compiles the filter patterns in order, failing on the first invalid one.
    pub fn compile_filters(&self) -> Result<Vec<Regex>, ConfigError> {
        self.filter_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidFilterPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    /// Whether a record at `level` should be printed to the terminal.
    pub fn should_log_to_terminal(&self, level: LogLevel) -> bool {
        self.enable_terminal_output && level >= self.terminal_level
    }

    pub fn is_enabled(&self, kind: SinkKind) -> bool {
        self.enabled_sinks.contains(&kind)
    }

    /// Full path of the local log file.
    pub fn log_file_path(&self) -> PathBuf {
        self.log_dir.join(&self.log_file_name)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn flush_tick(&self) -> Duration {
        Duration::from_millis(self.flush_tick_ms)
    }
}

fn deserialize_sink_set<'de, D>(deserializer: D) -> Result<BTreeSet<SinkKind>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Joined(String),
        List(Vec<String>),
    }

    let names: Vec<String> = match Raw::deserialize(deserializer)? {
        Raw::Joined(joined) => joined
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect(),
        Raw::List(list) => list,
    };

    names
        .iter()
        .map(|name| name.parse::<SinkKind>())
        .collect::<Result<BTreeSet<_>, _>>()
        .map_err(de::Error::custom)
}

fn deserialize_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Name(String),
        Value(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Name(name) => name.parse().map_err(de::Error::custom),
        Raw::Value(value) => value.to_string().parse().map_err(de::Error::custom),
    }
}
