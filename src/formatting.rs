use crate::config::SinkConfig;
use crate::error::ConfigError;
use regex::Regex;
use serde::Serialize;
use std::fmt::Debug;

/// Marker appended to truncated text.
pub const ELLIPSIS: &str = "...";

/// Filters and truncates message text before it is handed to any sink.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    max_length: usize,
    filters: Vec<Regex>,
}

impl MessageFormatter {
    pub fn new(max_length: usize, filters: Vec<Regex>) -> Self {
        Self {
            max_length,
            filters,
        }
    }

    pub fn from_config(config: &SinkConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.max_message_length, config.compile_filters()?))
    }

    /// Returns `None` if the message matches a filter pattern, otherwise the
    /// message truncated to the configured length.
    pub fn process(&self, message: &str) -> Option<String> {
        if self.is_filtered(message) {
            return None;
        }
        Some(truncate_chars(message, self.max_length))
    }

    pub fn is_filtered(&self, message: &str) -> bool {
        self.filters.iter().any(|re| re.is_match(message))
    }

    /// Pretty-prints a structured value, falling back to its `Debug` form
    /// when it cannot be serialized.
    pub fn format_data<T: Serialize + Debug + ?Sized>(data: &T) -> String {
        serde_json::to_string_pretty(data).unwrap_or_else(|_| format!("{:?}", data))
    }
}

/// Cuts `text` to at most `max` characters, ending with [`ELLIPSIS`] when it
/// was shortened.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}
