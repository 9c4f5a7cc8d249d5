//! Sink backends.

pub mod local;
pub mod telemetry;
pub mod webhook;

pub use local::LocalSink;
pub use telemetry::{TelemetryBackend, TelemetrySink, TracingTelemetry};
pub use webhook::{WebhookSettings, WebhookSink, WebhookState};
