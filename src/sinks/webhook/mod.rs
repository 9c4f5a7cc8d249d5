//! Batched delivery of log records to a chat webhook.
//!
//! `log()` only formats and enqueues. A background worker, started once the
//! endpoint has accepted a validation message, sends the queue in batches of
//! at most ten embeds, honoring rate limits and retrying transient failures.

pub mod payload;
pub mod transport;
mod worker;

use crate::clock::{Clock, TokioClock};
use crate::config::SinkConfig;
use crate::core::{LogLevel, Sink};
use crate::error::{ConfigError, SinkError};
use async_trait::async_trait;
use payload::{Embed, WebhookPayload};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use transport::{ReqwestTransport, WebhookTransport};
use worker::{Delivery, Shared};

/// Delivery parameters of a webhook sink, resolved from [`SinkConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookSettings {
    pub url: String,
    pub url_prefix: String,
    pub username: String,
    pub batch_size: usize,
    pub batch_interval: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub tick: Duration,
    pub max_embed_length: usize,
}

impl WebhookSettings {
    pub fn from_config(config: &SinkConfig) -> Result<Self, ConfigError> {
        let url = config
            .webhook_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingWebhookUrl)?;
        Ok(Self {
            url,
            url_prefix: config.webhook_url_prefix.clone(),
            username: config.logger_name.clone(),
            batch_size: config.batch_size,
            batch_interval: config.batch_interval(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            request_timeout: config.request_timeout(),
            tick: config.flush_tick(),
            max_embed_length: config.max_embed_length,
        })
    }
}

/// Lifecycle of a webhook sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookState {
    /// Not started, disabled, or closed. Records are discarded.
    Stopped,
    /// The connectivity check is in flight. Records are queued.
    Validating,
    /// The worker is flushing the queue.
    Running,
    /// Cleanup is sending what is left.
    Draining,
}

pub struct WebhookSink {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
    cleaned: AtomicBool,
}

impl WebhookSink {
    pub fn new(
        settings: WebhookSettings,
        transport: Arc<dyn WebhookTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(settings, transport, clock)),
            worker: Mutex::new(None),
            initialized: AtomicBool::new(false),
            cleaned: AtomicBool::new(false),
        }
    }

    /// Builds a sink that posts over HTTP with the configured timeout.
    pub fn from_config(config: &SinkConfig) -> Result<Self, ConfigError> {
        let settings = WebhookSettings::from_config(config)?;
        let transport = Arc::new(ReqwestTransport::new(
            settings.url.clone(),
            settings.request_timeout,
        ));
        Ok(Self::new(settings, transport, Arc::new(TokioClock)))
    }

    pub fn settings(&self) -> &WebhookSettings {
        &self.shared.settings
    }

    pub fn state(&self) -> WebhookState {
        self.shared.state()
    }

    /// Number of records waiting to be sent.
    pub fn queue_len(&self) -> usize {
        self.shared.queue_len()
    }

    /// Whether the background flush worker is still running.
    pub fn worker_active(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn disabled(&self, reason: impl Into<String>) -> SinkError {
        SinkError::disabled(self.name(), reason)
    }

    fn start_worker(&self) {
        let shutdown_rx = self.shared.subscribe_shutdown();
        let handle = tokio::spawn(worker::run(self.shared.clone(), shutdown_rx));
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }
}

#[async_trait]
impl Sink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    /// Checks the URL, sends the validation message, and starts the flush
    /// worker. Any failure leaves the sink permanently disabled.
    async fn initialize(&self) -> Result<(), SinkError> {
        if self.cleaned.load(Ordering::SeqCst) {
            return Err(SinkError::Closed(self.name().to_string()));
        }
        if self.initialized.swap(true, Ordering::SeqCst) {
            return match self.state() {
                WebhookState::Stopped => Err(self.disabled("initialization failed earlier")),
                _ => Ok(()),
            };
        }

        let settings = &self.shared.settings;
        if !settings.url.starts_with(&settings.url_prefix) {
            error!(
                prefix = %settings.url_prefix,
                "Invalid webhook URL format, webhook logging will be disabled"
            );
            self.shared.disable();
            return Err(self.disabled("webhook URL does not match the expected prefix"));
        }

        self.shared.set_state(WebhookState::Validating);
        let payload = WebhookPayload::new(settings.username.clone(), vec![Embed::validation()]);
        match self.shared.deliver(&payload, settings.max_retries).await {
            Delivery::Delivered => {
                self.shared.mark_flushed();
                self.shared.set_state(WebhookState::Running);
                self.start_worker();
                info!("Webhook validated successfully");
                Ok(())
            }
            Delivery::Rejected(status) => {
                error!(status, "Webhook validation failed, webhook logging will be disabled");
                self.shared.disable();
                Err(self.disabled(format!("validation rejected with status {}", status)))
            }
            Delivery::Exhausted => {
                error!(
                    retries = settings.max_retries,
                    "Webhook unreachable, webhook logging will be disabled"
                );
                self.shared.disable();
                Err(self.disabled("validation retries exhausted"))
            }
            Delivery::Interrupted => {
                warn!("Shut down while validating the webhook");
                self.shared.disable();
                Err(self.disabled("shut down during validation"))
            }
        }
    }

    fn is_active(&self) -> bool {
        matches!(
            self.state(),
            WebhookState::Validating | WebhookState::Running
        )
    }

    fn log(&self, level: LogLevel, message: &str) -> Result<(), SinkError> {
        if self.is_active() {
            self.shared.enqueue(Embed::for_record(
                level,
                message,
                self.shared.settings.max_embed_length,
            ));
        }
        Ok(())
    }

    fn result_data(&self, data: &serde_json::Value) -> Result<(), SinkError> {
        let formatted =
            serde_json::to_string_pretty(data).map_err(|e| SinkError::Format(e.to_string()))?;
        self.log(
            LogLevel::Info,
            &format!("Result Data:\n```json\n{}\n```", formatted),
        )
    }

    /// Stops the worker, then gives the head of the queue one delivery
    /// attempt before closing the HTTP session.
    async fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }

        let was_running = self.state() == WebhookState::Running;
        if was_running {
            self.shared.set_state(WebhookState::Draining);
        }

        self.shared.request_shutdown();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Webhook flush worker ended abnormally");
            }
        }

        if was_running {
            self.shared.drain().await;
        }
        self.shared.transport.close().await;
        self.shared.set_state(WebhookState::Stopped);
        info!("Webhook sink closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingClock, ScriptedTransport};
    use super::transport::DeliveryOutcome;
    use super::worker::FlushResult;

    const URL: &str = "https://discord.com/api/webhooks/123/token";

    fn settings() -> WebhookSettings {
        WebhookSettings::from_config(&SinkConfig {
            webhook_url: Some(URL.to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    fn sink_with(transport: Arc<ScriptedTransport>) -> WebhookSink {
        WebhookSink::new(settings(), transport, Arc::new(TokioClock))
    }

    fn embed(n: usize) -> Embed {
        Embed::for_record(LogLevel::Info, &format!("record {}", n), 1900)
    }

    #[test]
    fn test_settings_require_url() {
        assert_eq!(
            WebhookSettings::from_config(&SinkConfig::default()),
            Err(ConfigError::MissingWebhookUrl)
        );
        let settings = settings();
        assert_eq!(settings.username, "unified_logger");
        assert_eq!(settings.batch_size, 5);
        assert_eq!(settings.tick, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_sends_at_most_ten_embeds() {
        let transport = Arc::new(ScriptedTransport::default());
        let shared = Shared::new(settings(), transport.clone(), Arc::new(TokioClock));
        for n in 0..12 {
            shared.enqueue(embed(n));
        }

        assert_eq!(shared.flush_once(3).await, FlushResult::Delivered(10));
        assert_eq!(shared.queue_len(), 2);

        let sent = transport.payloads();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].embeds.len(), 10);
        assert_eq!(sent[0].embeds[0].description, "record 0");
        assert_eq!(sent[0].username, "unified_logger");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_retry_after_and_resends_same_batch() {
        let transport = Arc::new(ScriptedTransport::new([
            DeliveryOutcome::RateLimited {
                retry_after: Some(Duration::from_secs(2)),
            },
            DeliveryOutcome::Success,
        ]));
        let clock = Arc::new(RecordingClock::default());
        let shared = Shared::new(settings(), transport.clone(), clock.clone());
        shared.enqueue(embed(1));
        shared.enqueue(embed(2));

        assert_eq!(shared.flush_once(3).await, FlushResult::Delivered(2));

        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
        let sent = transport.payloads();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
        assert_eq!(shared.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_back_off_linearly_then_drop() {
        let transport = Arc::new(ScriptedTransport::new(
            std::iter::repeat(DeliveryOutcome::Transient { status: 503 }).take(4),
        ));
        let clock = Arc::new(RecordingClock::default());
        let shared = Shared::new(settings(), transport.clone(), clock.clone());
        shared.enqueue(embed(1));
        shared.enqueue(embed(2));

        assert_eq!(shared.flush_once(3).await, FlushResult::Dropped(2));
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3)
            ]
        );
        assert_eq!(transport.post_count(), 4);

        // The dropped batch is not sent again.
        assert_eq!(shared.flush_once(3).await, FlushResult::Idle);
        assert_eq!(transport.post_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhaustion_drops_batch() {
        let transport = Arc::new(ScriptedTransport::new(
            std::iter::repeat(DeliveryOutcome::RateLimited {
                retry_after: Some(Duration::from_secs(2)),
            })
            .take(4),
        ));
        let clock = Arc::new(RecordingClock::default());
        let shared = Shared::new(settings(), transport.clone(), clock.clone());
        shared.enqueue(embed(1));
        shared.enqueue(embed(2));

        assert_eq!(shared.flush_once(3).await, FlushResult::Dropped(2));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2); 3]);
        assert_eq!(transport.post_count(), 4);

        assert_eq!(shared.flush_once(3).await, FlushResult::Idle);
        assert_eq!(transport.post_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cuts_backoff_and_keeps_batch() {
        let transport = Arc::new(ScriptedTransport::new([DeliveryOutcome::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        }]));
        let shared = Arc::new(Shared::new(settings(), transport.clone(), Arc::new(TokioClock)));
        shared.enqueue(embed(1));

        let flushing = tokio::spawn({
            let shared = shared.clone();
            async move { shared.flush_once(3).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        shared.request_shutdown();

        assert_eq!(flushing.await.unwrap(), FlushResult::Interrupted);
        assert_eq!(shared.queue_len(), 1);
        assert_eq!(transport.post_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_resets_session() {
        let transport = Arc::new(ScriptedTransport::new([
            DeliveryOutcome::NetworkFailure("connection reset".to_string()),
            DeliveryOutcome::Success,
        ]));
        let shared = Shared::new(settings(), transport.clone(), Arc::new(TokioClock));
        shared.enqueue(embed(1));

        assert_eq!(shared.flush_once(3).await, FlushResult::Delivered(1));
        assert_eq!(transport.reset_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_request_drops_batch_but_keeps_sink() {
        let transport = Arc::new(ScriptedTransport::new([DeliveryOutcome::Fatal {
            status: 400,
        }]));
        let shared = Shared::new(settings(), transport.clone(), Arc::new(TokioClock));
        shared.set_state(WebhookState::Running);
        for n in 0..12 {
            shared.enqueue(embed(n));
        }

        assert_eq!(shared.flush_once(3).await, FlushResult::Dropped(10));
        assert_eq!(shared.queue_len(), 2);
        assert_eq!(shared.state(), WebhookState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_validates_and_starts_worker() {
        let transport = Arc::new(ScriptedTransport::default());
        let sink = sink_with(transport.clone());

        sink.initialize().await.unwrap();

        assert_eq!(sink.state(), WebhookState::Running);
        assert!(sink.worker_active());
        let sent = transport.payloads();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].embeds, vec![Embed::validation()]);

        sink.cleanup().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_is_flushed_on_next_tick() {
        let transport = Arc::new(ScriptedTransport::default());
        let sink = sink_with(transport.clone());
        sink.initialize().await.unwrap();

        for n in 0..5 {
            sink.info(&format!("record {}", n)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(transport.post_count(), 2);
        assert_eq!(transport.payloads()[1].embeds.len(), 5);
        assert_eq!(sink.queue_len(), 0);

        sink.cleanup().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_waits_for_interval() {
        let transport = Arc::new(ScriptedTransport::default());
        let sink = sink_with(transport.clone());
        sink.initialize().await.unwrap();

        sink.warning("lonely record").unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(transport.post_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.post_count(), 2);
        assert_eq!(transport.payloads()[1].embeds[0].title, "WARNING Log");

        sink.cleanup().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_during_validation_disables_sink() {
        let transport = Arc::new(ScriptedTransport::new([DeliveryOutcome::Fatal {
            status: 404,
        }]));
        let sink = sink_with(transport.clone());

        let err = sink.initialize().await.unwrap_err();
        assert!(matches!(err, SinkError::Disabled { .. }));
        assert_eq!(sink.state(), WebhookState::Stopped);
        assert!(!sink.worker_active());

        sink.error("ignored").unwrap();
        assert_eq!(sink.queue_len(), 0);
        assert_eq!(transport.post_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_during_delivery_stops_worker() {
        let transport = Arc::new(ScriptedTransport::new([
            DeliveryOutcome::Success,
            DeliveryOutcome::Fatal { status: 404 },
        ]));
        let sink = sink_with(transport.clone());
        sink.initialize().await.unwrap();

        for n in 0..7 {
            sink.info(&format!("record {}", n)).unwrap();
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(sink.state(), WebhookState::Stopped);
        assert_eq!(sink.queue_len(), 0);
        assert!(!sink.worker_active());
        assert_eq!(transport.post_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_url_prefix_mismatch_disables_without_network() {
        let transport = Arc::new(ScriptedTransport::default());
        let mut settings = settings();
        settings.url = "https://example.com/hooks/1".to_string();
        let sink = WebhookSink::new(settings, transport.clone(), Arc::new(TokioClock));

        assert!(sink.initialize().await.is_err());
        assert_eq!(sink.state(), WebhookState::Stopped);
        assert_eq!(transport.post_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drains_queue_once() {
        let transport = Arc::new(ScriptedTransport::default());
        let sink = sink_with(transport.clone());
        sink.initialize().await.unwrap();

        for n in 0..3 {
            sink.info(&format!("record {}", n)).unwrap();
        }
        sink.cleanup().await;

        assert_eq!(transport.post_count(), 2);
        assert_eq!(transport.payloads()[1].embeds.len(), 3);
        assert_eq!(sink.state(), WebhookState::Stopped);
        assert!(!sink.worker_active());
        assert_eq!(transport.close_count(), 1);

        sink.cleanup().await;
        sink.info("after close").unwrap();
        assert_eq!(transport.post_count(), 2);
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_lets_in_flight_post_finish() {
        let transport =
            Arc::new(ScriptedTransport::default().with_latency(Duration::from_secs(5)));
        let sink = sink_with(transport.clone());
        sink.initialize().await.unwrap();

        for n in 0..5 {
            sink.info(&format!("record {}", n)).unwrap();
        }
        // The worker posts on its next tick; the POST takes five seconds.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(transport.post_count(), 2);

        sink.cleanup().await;

        assert_eq!(transport.post_count(), 2);
        assert_eq!(sink.queue_len(), 0);
        assert!(!sink.worker_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_sends_one_final_batch_and_discards_the_rest() {
        let transport = Arc::new(ScriptedTransport::default());
        let mut settings = settings();
        settings.batch_size = 50;
        let sink = WebhookSink::new(settings, transport.clone(), Arc::new(TokioClock));
        sink.initialize().await.unwrap();

        for n in 0..13 {
            sink.info(&format!("record {}", n)).unwrap();
        }
        sink.cleanup().await;

        let sent = transport.payloads();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].embeds.len(), 10);
        assert_eq!(sent[1].embeds[9].description, "record 9");
        assert_eq!(sink.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_data_is_fenced_json() {
        let transport = Arc::new(ScriptedTransport::default());
        let sink = sink_with(transport.clone());
        sink.initialize().await.unwrap();

        sink.result_data(&serde_json::json!({ "ok": true })).unwrap();
        sink.cleanup().await;

        let description = &transport.payloads()[1].embeds[0].description;
        assert!(description.starts_with("Result Data:\n```json\n"));
        assert!(description.ends_with("\n```"));
    }
}
