//! The dispatcher fans each log call out to every registered sink.
//!
//! Records are filtered, truncated, and then handed to the sinks in
//! registration order. A failing sink is reported and skipped; it never
//! prevents the others from receiving the record, and no sink error ever
//! reaches the caller.

use crate::config::SinkConfig;
use crate::core::{LogLevel, LogRecord, Sink, SinkKind};
use crate::error::{ConfigError, DispatchError, SinkError};
use crate::formatting::MessageFormatter;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Lifecycle of a [`Dispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

impl DispatcherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatcherState::Uninitialized => "uninitialized",
            DispatcherState::Initializing => "initializing",
            DispatcherState::Ready => "ready",
            DispatcherState::Closed => "closed",
        }
    }
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live configuration, swapped as a whole on update.
struct Runtime {
    config: SinkConfig,
    formatter: MessageFormatter,
}

impl Runtime {
    fn new(config: SinkConfig) -> Result<Self, ConfigError> {
        let formatter = MessageFormatter::from_config(&config)?;
        Ok(Self { config, formatter })
    }
}

struct RegisteredSink {
    name: String,
    kind: Option<SinkKind>,
    sink: Arc<dyn Sink>,
}

pub struct Dispatcher {
    state: Mutex<DispatcherState>,
    sinks: RwLock<Vec<RegisteredSink>>,
    runtime: ArcSwap<Runtime>,
}

impl Dispatcher {
    /// Validates `config` and creates an empty, uninitialized dispatcher.
    pub fn new(mut config: SinkConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            state: Mutex::new(DispatcherState::Uninitialized),
            sinks: RwLock::new(Vec::new()),
            runtime: ArcSwap::from_pointee(Runtime::new(config)?),
        })
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves from `Uninitialized` to `Initializing`.
    pub fn begin_initialization(&self) -> Result<(), DispatchError> {
        self.transition(DispatcherState::Uninitialized, DispatcherState::Initializing)
    }

    /// Moves from `Initializing` to `Ready`.
    pub fn mark_ready(&self) -> Result<(), DispatchError> {
        self.transition(DispatcherState::Initializing, DispatcherState::Ready)
    }

    fn transition(&self, from: DispatcherState, to: DispatcherState) -> Result<(), DispatchError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return Err(DispatchError::InvalidState(state.as_str()));
        }
        debug!(from = %from, to = %to, "Dispatcher state change");
        *state = to;
        Ok(())
    }

    /// Adds one of the built-in sinks. Registration order is fan-out order.
    pub fn register(&self, kind: SinkKind, sink: Arc<dyn Sink>) -> Result<(), DispatchError> {
        self.insert(Some(kind), sink)
    }

    /// Adds an application-provided sink.
    pub fn register_custom(&self, sink: Arc<dyn Sink>) -> Result<(), DispatchError> {
        self.insert(None, sink)
    }

    fn insert(&self, kind: Option<SinkKind>, sink: Arc<dyn Sink>) -> Result<(), DispatchError> {
        let state = self.state();
        if state == DispatcherState::Closed {
            return Err(DispatchError::InvalidState(state.as_str()));
        }
        let name = sink.name().to_string();
        let mut sinks = self.sinks.write().unwrap_or_else(PoisonError::into_inner);
        if sinks.iter().any(|entry| entry.name == name) {
            return Err(DispatchError::DuplicateSink(name));
        }
        debug!(sink = %name, "Registered sink");
        sinks.push(RegisteredSink { name, kind, sink });
        Ok(())
    }

    pub fn sink(&self, name: &str) -> Option<Arc<dyn Sink>> {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.sink.clone())
    }

    /// Names of the registered sinks in fan-out order.
    pub fn sink_names(&self) -> Vec<String> {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// A copy of the live configuration.
    pub fn config(&self) -> SinkConfig {
        self.runtime.load().config.clone()
    }

    pub fn log_level(&self) -> LogLevel {
        self.runtime.load().config.log_level
    }

    fn accepting(&self) -> bool {
        matches!(
            self.state(),
            DispatcherState::Initializing | DispatcherState::Ready
        )
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.dispatch(LogRecord::new(level, message));
    }

    /// Logs `message` with the error and its causes appended as a trace.
    pub fn log_with_error(
        &self,
        level: LogLevel,
        message: &str,
        err: &(dyn std::error::Error + 'static),
    ) {
        self.dispatch(LogRecord::new(level, message).with_error(err));
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn critical(&self, message: &str) {
        self.log(LogLevel::Critical, message);
    }

    /// Logs `"<message>: <err>"` at ERROR level, with the error trace.
    pub fn exception(&self, err: &(dyn std::error::Error + 'static), message: &str) {
        self.log_with_error(LogLevel::Error, &format!("{}: {}", message, err), err);
    }

    fn dispatch(&self, mut record: LogRecord) {
        if !self.accepting() {
            return;
        }
        let runtime = self.runtime.load();
        if record.level < runtime.config.log_level {
            return;
        }
        let Some(message) = runtime.formatter.process(&record.message) else {
            metrics::counter!("unilog_records_filtered_total").increment(1);
            return;
        };
        record.message = message;
        let text = record.body();

        metrics::counter!("unilog_records_dispatched_total", "level" => record.level.as_str())
            .increment(1);
        self.fan_out(|_, sink| sink.log(record.level, &text));
    }

    /// Sends a structured value to every sink at INFO level, and to the
    /// telemetry sink's result channel.
    ///
    /// Values that cannot be serialized are sent as their `Debug` form.
    pub fn result_data<T: Serialize + Debug + ?Sized>(&self, data: &T) {
        if !self.accepting() {
            return;
        }
        let runtime = self.runtime.load();
        if LogLevel::Info < runtime.config.log_level {
            return;
        }
        let value = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Result data is not serializable, sending its debug form");
                serde_json::Value::String(format!("{:?}", data))
            }
        };
        let rendered = MessageFormatter::format_data(&value);
        if runtime.formatter.is_filtered(&rendered) {
            metrics::counter!("unilog_records_filtered_total").increment(1);
            return;
        }

        metrics::counter!("unilog_records_dispatched_total", "level" => LogLevel::Info.as_str())
            .increment(1);
        self.fan_out(|kind, sink| match kind {
            Some(SinkKind::Telemetry) => {
                sink.log(LogLevel::Info, &format!("Result Data: {}", rendered))?;
                sink.result_data(&value)
            }
            _ => sink.result_data(&value),
        });
    }

    /// Reports a failed unit of work on the telemetry result channel only.
    pub fn result_failed_message(&self, message: &str) {
        if !self.accepting() {
            return;
        }
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        let telemetry = sinks
            .iter()
            .filter(|entry| entry.kind == Some(SinkKind::Telemetry));
        for entry in telemetry {
            if let Err(e) = entry.sink.result_failed(message) {
                report_failure(&entry.name, &e);
            }
        }
    }

    fn fan_out<F>(&self, deliver: F)
    where
        F: Fn(Option<SinkKind>, &dyn Sink) -> Result<(), SinkError>,
    {
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        for entry in sinks.iter() {
            if let Err(e) = deliver(entry.kind, entry.sink.as_ref()) {
                report_failure(&entry.name, &e);
            }
        }
    }

    /// Re-validates the merged configuration and swaps in the new threshold,
    /// filters and length limit. Other sink settings keep the values they
    /// were built with.
    pub fn update_config(&self, changes: serde_json::Value) -> Result<(), ConfigError> {
        let mut config = self.runtime.load().config.clone();
        config.update(changes)?;
        self.runtime.store(Arc::new(Runtime::new(config)?));
        info!("Dispatcher configuration updated");
        Ok(())
    }

    /// Changes the level threshold until the returned guard is dropped.
    pub fn scoped_level(&self, level: LogLevel) -> LevelGuard<'_> {
        let previous = self.runtime.load_full();
        let mut config = previous.config.clone();
        config.log_level = level;
        let formatter = previous.formatter.clone();
        self.runtime.store(Arc::new(Runtime { config, formatter }));
        debug!(level = %level, "Temporary log level set");
        LevelGuard {
            dispatcher: self,
            previous,
        }
    }

    /// Stops accepting records and hands back the sinks in registration
    /// order. Returns nothing if already closed.
    pub fn close(&self) -> Vec<Arc<dyn Sink>> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == DispatcherState::Closed {
                return Vec::new();
            }
            *state = DispatcherState::Closed;
        }
        let sinks = std::mem::take(&mut *self.sinks.write().unwrap_or_else(PoisonError::into_inner));
        info!(sinks = sinks.len(), "Dispatcher closed");
        sinks.into_iter().map(|entry| entry.sink).collect()
    }
}

fn report_failure(sink: &str, err: &SinkError) {
    metrics::counter!("unilog_sink_failures_total", "sink" => sink.to_string()).increment(1);
    warn!(sink = %sink, error = %err, "Sink failed to handle record");
}

/// Restores the previous configuration when dropped.
#[must_use = "the previous level is restored as soon as the guard is dropped"]
pub struct LevelGuard<'a> {
    dispatcher: &'a Dispatcher,
    previous: Arc<Runtime>,
}

impl Drop for LevelGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.runtime.store(self.previous.clone());
    }
}
