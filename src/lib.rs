//! unilog - a unified logging dispatcher
//!
//! One log call is fanned out to a local file/terminal sink, an internal
//! telemetry sink, and a batched chat webhook. [`manager::SinkManager`]
//! builds and tears down the sink set; [`dispatcher::Dispatcher`] is the
//! handle applications log through.

pub mod cli;
pub mod clock;
pub mod config;
pub mod core;
pub mod dispatcher;
pub mod error;
pub mod formatting;
pub mod manager;
pub mod sinks;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export core types for convenience
pub use crate::core::*;
pub use config::SinkConfig;
pub use dispatcher::{Dispatcher, DispatcherState};
pub use error::{ConfigError, DispatchError, SinkError};
pub use manager::{SinkManager, SinkManagerBuilder};
