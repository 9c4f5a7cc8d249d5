//! Fakes for exercising sinks and the dispatcher without real I/O.

use crate::clock::Clock;
use crate::core::{LogLevel, Sink};
use crate::error::SinkError;
use crate::sinks::telemetry::TelemetryBackend;
use crate::sinks::webhook::payload::WebhookPayload;
use crate::sinks::webhook::transport::{DeliveryOutcome, WebhookTransport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// An in-memory writer whose clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Everything a [`RecordingTelemetry`] has been handed.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Record(LogLevel, String),
    Result(serde_json::Value),
    Failed(String),
    Flushed,
}

#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: TelemetryEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl TelemetryBackend for RecordingTelemetry {
    fn record(&self, level: LogLevel, message: &str) {
        self.push(TelemetryEvent::Record(level, message.to_string()));
    }

    fn result_data(&self, data: &serde_json::Value) {
        self.push(TelemetryEvent::Result(data.clone()));
    }

    fn result_failed(&self, message: &str) {
        self.push(TelemetryEvent::Failed(message.to_string()));
    }

    fn flush(&self) {
        self.push(TelemetryEvent::Flushed);
    }
}

/// A tokio-backed clock that remembers every requested sleep.
#[derive(Debug, Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        tokio::time::sleep(duration).await;
    }
}

/// Fake webhook endpoint. Answers with the scripted outcomes in order, then
/// with `Success` once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    // The front of the queue is the next answer.
    outcomes: Mutex<VecDeque<DeliveryOutcome>>,
    payloads: Mutex<Vec<WebhookPayload>>,
    resets: AtomicUsize,
    closes: AtomicUsize,
    latency: Duration,
}

impl ScriptedTransport {
    pub fn new(outcomes: impl IntoIterator<Item = DeliveryOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Makes every POST take `latency` before it answers.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push_outcome(&self, outcome: DeliveryOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Every payload posted so far, retries included.
    pub fn payloads(&self) -> Vec<WebhookPayload> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn post_count(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookTransport for ScriptedTransport {
    async fn post(&self, payload: &WebhookPayload) -> DeliveryOutcome {
        self.payloads.lock().unwrap().push(payload.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DeliveryOutcome::Success)
    }

    async fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Shared journal of sink cleanups, used to check shutdown order.
pub type CleanupJournal = Arc<Mutex<Vec<String>>>;

/// A sink that keeps every record it receives.
pub struct RecordingSink {
    name: String,
    records: Mutex<Vec<(LogLevel, String)>>,
    closed: AtomicBool,
    journal: Option<CleanupJournal>,
}

impl RecordingSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            journal: None,
        }
    }

    /// Appends the sink's name to `journal` when it is cleaned up.
    pub fn with_journal(mut self, journal: CleanupJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn records(&self) -> Vec<(LogLevel, String)> {
        self.records.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.records().into_iter().map(|(_, m)| m).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        !self.is_closed()
    }

    fn log(&self, level: LogLevel, message: &str) -> Result<(), SinkError> {
        self.records
            .lock()
            .unwrap()
            .push((level, message.to_string()));
        Ok(())
    }

    async fn cleanup(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(journal) = &self.journal {
                journal.lock().unwrap().push(self.name.clone());
            }
        }
    }
}

/// A sink whose every write fails.
#[derive(Debug, Default)]
pub struct FailingSink {
    attempts: AtomicUsize,
}

impl FailingSink {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    fn log(&self, _level: LogLevel, _message: &str) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Io(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "sink unavailable",
        )))
    }

    async fn cleanup(&self) {}
}
