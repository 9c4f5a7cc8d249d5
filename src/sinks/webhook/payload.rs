//! Wire format of the webhook service.

use crate::core::LogLevel;
use crate::formatting::truncate_chars;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// The service accepts at most this many embeds per message.
pub const MAX_EMBEDS_PER_MESSAGE: usize = 10;

/// Embed color for each level.
pub fn level_color(level: LogLevel) -> u32 {
    match level {
        LogLevel::Debug => 0x7F7F7F,
        LogLevel::Info => 0x3498DB,
        LogLevel::Warning => 0xF1C40F,
        LogLevel::Error => 0xE74C3C,
        LogLevel::Critical => 0x992D22,
    }
}

/// One formatted record, rendered by the service as a colored card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Embed {
    pub fn for_record(level: LogLevel, message: &str, max_length: usize) -> Self {
        Self {
            title: format!("{} Log", level),
            description: truncate_chars(message, max_length),
            color: level_color(level),
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    /// The card sent by the connectivity check during initialization.
    pub fn validation() -> Self {
        Self {
            title: "Logger Initialization".to_string(),
            description: "Testing webhook connectivity".to_string(),
            color: level_color(LogLevel::Info),
            timestamp: None,
        }
    }
}

/// Request body of a webhook POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub username: String,
    pub embeds: Vec<Embed>,
}

impl WebhookPayload {
    pub fn new(username: impl Into<String>, embeds: Vec<Embed>) -> Self {
        Self {
            username: username.into(),
            embeds,
        }
    }
}
