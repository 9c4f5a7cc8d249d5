//! Shared setup for the integration tests.
#![allow(dead_code)]

use std::path::Path;
use unilog::{LogLevel, SinkConfig, SinkKind};

/// A webhook URL accepted by the default prefix check.
pub const WEBHOOK_URL: &str = "https://discord.com/api/webhooks/123/token";

/// A configuration writing to `<dir>/app.log`, with the given sinks enabled.
pub fn config_in(dir: &Path, sinks: &[SinkKind]) -> SinkConfig {
    SinkConfig {
        enabled_sinks: sinks.iter().copied().collect(),
        log_dir: dir.to_path_buf(),
        log_level: LogLevel::Debug,
        webhook_url: sinks
            .contains(&SinkKind::Webhook)
            .then(|| WEBHOOK_URL.to_string()),
        ..Default::default()
    }
}

/// Lines of the local log file, or nothing if it does not exist.
pub fn log_lines(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("app.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
