//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the demo binary using
//! the `clap` crate. These arguments are merged on top of the `unilog.toml`
//! file and environment variables when the configuration is loaded.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Fan a set of sample log records out to the configured sinks.
#[derive(Parser, Debug, Default, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Comma-separated list of sinks to enable (local, telemetry, webhook).
    #[arg(long, value_name = "SINKS", value_delimiter = ',')]
    pub sinks: Option<Vec<String>>,

    /// Minimum level to dispatch (DEBUG, INFO, WARNING, ERROR, CRITICAL).
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Webhook endpoint for the webhook sink.
    #[arg(long, value_name = "URL")]
    pub webhook_url: Option<String>,

    /// Directory for the local log file.
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Mirror local records to the terminal.
    #[arg(long)]
    pub terminal: bool,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(sinks) = &self.sinks {
            dict.insert("enabled_sinks".into(), Value::from(sinks.clone()));
        }

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        if let Some(url) = &self.webhook_url {
            dict.insert("webhook_url".into(), Value::from(url.clone()));
        }

        if let Some(dir) = &self.log_dir {
            dict.insert("log_dir".into(), Value::from(dir.display().to_string()));
        }

        // A bare flag can only switch terminal output on; the file and
        // environment still decide when it is absent.
        if self.terminal {
            dict.insert("enable_terminal_output".into(), Value::from(true));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
