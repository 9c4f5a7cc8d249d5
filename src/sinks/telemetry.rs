//! Internal telemetry integration.
//!
//! The sink forwards records to a `TelemetryBackend`. The default backend
//! turns them into structured `tracing` events and `metrics` counters so an
//! embedding application's subscriber and recorder pick them up.

use crate::core::{LogLevel, Sink};
use crate::error::SinkError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// The receiving end of the telemetry sink.
pub trait TelemetryBackend: Send + Sync {
    /// Receives an ordinary log record.
    fn record(&self, level: LogLevel, message: &str);

    /// Receives a structured result on the dedicated result channel.
    fn result_data(&self, data: &serde_json::Value);

    /// Receives a failure report on the dedicated result channel.
    fn result_failed(&self, message: &str);

    fn flush(&self) {}
}

/// Emits telemetry as `tracing` events under the `unilog::telemetry` target.
#[derive(Debug, Default, Clone)]
pub struct TracingTelemetry;

impl TelemetryBackend for TracingTelemetry {
    fn record(&self, level: LogLevel, message: &str) {
        metrics::counter!("unilog_telemetry_records_total", "level" => level.as_str())
            .increment(1);
        match level {
            LogLevel::Debug => debug!(target: "unilog::telemetry", %message),
            LogLevel::Info => info!(target: "unilog::telemetry", %message),
            LogLevel::Warning => warn!(target: "unilog::telemetry", %message),
            LogLevel::Error | LogLevel::Critical => {
                error!(target: "unilog::telemetry", severity = %level, %message)
            }
        }
    }

    fn result_data(&self, data: &serde_json::Value) {
        metrics::counter!("unilog_telemetry_results_total", "outcome" => "success").increment(1);
        info!(target: "unilog::telemetry::result", result = %data, "Result data");
    }

    fn result_failed(&self, message: &str) {
        metrics::counter!("unilog_telemetry_results_total", "outcome" => "failed").increment(1);
        warn!(target: "unilog::telemetry::result", %message, "Result failed");
    }

    fn flush(&self) {
        trace!(target: "unilog::telemetry", "Telemetry flushed");
    }
}

/// Sink adapter over a [`TelemetryBackend`].
pub struct TelemetrySink {
    backend: Arc<dyn TelemetryBackend>,
    closed: AtomicBool,
}

impl TelemetrySink {
    pub fn new(backend: Arc<dyn TelemetryBackend>) -> Self {
        Self {
            backend,
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for TelemetrySink {
    fn default() -> Self {
        Self::new(Arc::new(TracingTelemetry))
    }
}

#[async_trait]
impl Sink for TelemetrySink {
    fn name(&self) -> &str {
        "telemetry"
    }

    fn is_active(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn log(&self, level: LogLevel, message: &str) -> Result<(), SinkError> {
        if self.is_active() {
            self.backend.record(level, message);
        }
        Ok(())
    }

    fn result_data(&self, data: &serde_json::Value) -> Result<(), SinkError> {
        if self.is_active() {
            self.backend.result_data(data);
        }
        Ok(())
    }

    fn result_failed(&self, message: &str) -> Result<(), SinkError> {
        if self.is_active() {
            self.backend.result_failed(message);
        }
        Ok(())
    }

    async fn cleanup(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.backend.flush();
        }
    }
}
