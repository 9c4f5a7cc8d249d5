//! Local file and terminal output.

use crate::config::SinkConfig;
use crate::core::{LogLevel, Sink};
use crate::error::SinkError;
use async_trait::async_trait;
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

const RESET: &str = "\x1b[0m";

/// Terminal color for each level.
fn level_color(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "\x1b[36m",
        LogLevel::Info => "\x1b[32m",
        LogLevel::Warning => "\x1b[33m",
        LogLevel::Error => "\x1b[31m",
        LogLevel::Critical => "\x1b[31;47m",
    }
}

/// Writes records to a log file and, optionally, to the terminal.
///
/// Every record handed to `log` goes to the file; the dispatcher owns the
/// level threshold. The terminal has its own, separate threshold.
pub struct LocalSink {
    name: String,
    path: PathBuf,
    terminal_level: Option<LogLevel>,
    file: Mutex<Option<File>>,
    console: Mutex<Box<dyn Write + Send>>,
}

impl LocalSink {
    /// Opens (creating if needed) `<log_dir>/<log_file_name>` for appending.
    pub fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        let path = config.log_file_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "Opened local log file");

        Ok(Self {
            name: config.logger_name.clone(),
            path,
            terminal_level: config
                .enable_terminal_output
                .then_some(config.terminal_level),
            file: Mutex::new(Some(file)),
            console: Mutex::new(Box::new(io::stderr())),
        })
    }

    /// Replaces the terminal writer (stderr by default).
    pub fn with_console_writer(self, writer: Box<dyn Write + Send>) -> Self {
        Self {
            console: Mutex::new(writer),
            ..self
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn prefix() -> String {
        format!("{} - [{}]", Utc::now().to_rfc3339(), std::process::id())
    }

    fn write_file(&self, line: &str) -> io::Result<()> {
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(file) => {
                file.write_all(line.as_bytes())?;
                file.flush()
            }
            None => Ok(()),
        }
    }

    fn write_console(&self, level: LogLevel, prefix: &str, message: &str) -> io::Result<()> {
        let color = level_color(level);
        let mut console = self.console.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(
            console,
            "{} - {}{}{} - {}{}{}",
            prefix, color, level, RESET, color, message, RESET
        )?;
        console.flush()
    }
}

#[async_trait]
impl Sink for LocalSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn log(&self, level: LogLevel, message: &str) -> Result<(), SinkError> {
        let prefix = Self::prefix();
        self.write_file(&format!("{} - {} - {}\n", prefix, level, message))?;
        if let Some(terminal_level) = self.terminal_level {
            if level >= terminal_level {
                self.write_console(level, &prefix, message)?;
            }
        }
        Ok(())
    }

    fn result_data(&self, data: &serde_json::Value) -> Result<(), SinkError> {
        let formatted = match serde_json::to_string_pretty(data) {
            Ok(formatted) => formatted,
            Err(e) => {
                warn!(error = %e, "Failed to format result data");
                data.to_string()
            }
        };
        self.log(LogLevel::Info, &format!("Result Data: {}", formatted))
    }

    async fn cleanup(&self) {
        if let Some(mut file) = self.file.lock().unwrap_or_else(PoisonError::into_inner).take() {
            if let Err(e) = file.flush() {
                warn!(path = %self.path.display(), error = %e, "Error closing local log file");
            }
            debug!(path = %self.path.display(), "Closed local log file");
        }
    }
}
