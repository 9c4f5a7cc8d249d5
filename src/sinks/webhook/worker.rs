//! The outbound queue and the background flush worker.
//!
//! `log()` appends to the queue from any thread; everything else (reading the
//! head of the queue, delivering it, removing it) happens under `flush_lock`,
//! so the worker and the final drain never interleave.
//!
//! Shutdown only cuts a retry backoff short. A POST that is already in
//! flight runs to completion, so an accepted batch is never sent twice.

use super::payload::{Embed, WebhookPayload, MAX_EMBEDS_PER_MESSAGE};
use super::transport::{disables_sink, DeliveryOutcome, WebhookTransport};
use super::{WebhookSettings, WebhookState};
use crate::clock::Clock;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How a delivery with retries ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Delivery {
    Delivered,
    Rejected(u16),
    Exhausted,
    /// Shutdown was requested while waiting to retry.
    Interrupted,
}

/// Result of one flush cycle.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FlushResult {
    /// Nothing was queued.
    Idle,
    /// The batch of this many records was accepted.
    Delivered(usize),
    /// The batch of this many records was dropped.
    Dropped(usize),
    /// The endpoint rejected the batch permanently; the sink is now stopped.
    Disabled,
    /// Shutdown cut a retry short. The batch is still at the head of the queue.
    Interrupted,
}

pub(crate) struct Shared {
    pub(crate) settings: WebhookSettings,
    pub(crate) transport: Arc<dyn WebhookTransport>,
    pub(crate) clock: Arc<dyn Clock>,
    queue: Mutex<VecDeque<Embed>>,
    state: Mutex<WebhookState>,
    last_flush: Mutex<Instant>,
    flush_lock: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    pub(crate) fn new(
        settings: WebhookSettings,
        transport: Arc<dyn WebhookTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            settings,
            transport,
            clock,
            queue: Mutex::new(VecDeque::new()),
            state: Mutex::new(WebhookState::Stopped),
            last_flush: Mutex::new(now),
            flush_lock: tokio::sync::Mutex::new(()),
            shutdown: watch::channel(false).0,
        }
    }

    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Tells the worker to stop and cuts any pending retry backoff short.
    pub(crate) fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub(crate) fn state(&self) -> WebhookState {
        *lock(&self.state)
    }

    pub(crate) fn set_state(&self, state: WebhookState) {
        *lock(&self.state) = state;
    }

    pub(crate) fn enqueue(&self, embed: Embed) {
        lock(&self.queue).push_back(embed);
    }

    pub(crate) fn queue_len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub(crate) fn mark_flushed(&self) {
        *lock(&self.last_flush) = self.clock.now();
    }

    /// Stops the sink for good and discards whatever is queued.
    pub(crate) fn disable(&self) {
        self.set_state(WebhookState::Stopped);
        let discarded = {
            let mut queue = lock(&self.queue);
            let len = queue.len();
            queue.clear();
            len
        };
        if discarded > 0 {
            metrics::counter!("unilog_webhook_records_dropped_total").increment(discarded as u64);
        }
    }

    /// A flush is due when the queue reached the batch size, or when it holds
    /// anything and the batch interval has passed since the last success.
    pub(crate) fn flush_due(&self) -> bool {
        let len = self.queue_len();
        if len >= self.settings.batch_size {
            return true;
        }
        let since_last = self
            .clock
            .now()
            .saturating_duration_since(*lock(&self.last_flush));
        len > 0 && since_last >= self.settings.batch_interval
    }

    /// Sends the head of the queue (at most ten records) and removes it once
    /// the delivery succeeded or was given up on.
    pub(crate) async fn flush_once(&self, max_retries: u32) -> FlushResult {
        let _guard = self.flush_lock.lock().await;

        let batch: Vec<Embed> = lock(&self.queue)
            .iter()
            .take(MAX_EMBEDS_PER_MESSAGE)
            .cloned()
            .collect();
        if batch.is_empty() {
            return FlushResult::Idle;
        }
        let count = batch.len();
        let payload = WebhookPayload::new(self.settings.username.clone(), batch);

        match self.deliver(&payload, max_retries).await {
            Delivery::Delivered => {
                self.remove_head(count);
                self.mark_flushed();
                metrics::counter!("unilog_webhook_batches_sent_total").increment(1);
                debug!(count, "Successfully sent batch");
                FlushResult::Delivered(count)
            }
            Delivery::Rejected(status) if disables_sink(status) => {
                error!(
                    status,
                    "Webhook rejected delivery permanently, webhook logging will be disabled"
                );
                self.disable();
                FlushResult::Disabled
            }
            Delivery::Rejected(status) => {
                self.remove_head(count);
                metrics::counter!("unilog_webhook_records_dropped_total").increment(count as u64);
                error!(status, count, "Webhook rejected batch, dropping it");
                FlushResult::Dropped(count)
            }
            Delivery::Exhausted => {
                self.remove_head(count);
                metrics::counter!("unilog_webhook_records_dropped_total").increment(count as u64);
                warn!(count, max_retries, "Retries exhausted, dropping batch");
                FlushResult::Dropped(count)
            }
            Delivery::Interrupted => {
                debug!(count, "Retry interrupted by shutdown, batch kept for the final flush");
                FlushResult::Interrupted
            }
        }
    }

    fn remove_head(&self, count: usize) {
        let mut queue = lock(&self.queue);
        let count = count.min(queue.len());
        queue.drain(..count);
    }

    /// Posts `payload` until it is accepted, rejected, or the retry budget
    /// is spent. The same payload is resent on every attempt. A shutdown
    /// request ends the wait between attempts, never an attempt itself.
    pub(crate) async fn deliver(&self, payload: &WebhookPayload, max_retries: u32) -> Delivery {
        let mut shutdown_rx = self.subscribe_shutdown();
        let mut attempt: u32 = 0;
        loop {
            debug!(attempt, "Attempting to send batch");
            let delay = match self.transport.post(payload).await {
                DeliveryOutcome::Success => return Delivery::Delivered,
                DeliveryOutcome::Fatal { status } => return Delivery::Rejected(status),
                DeliveryOutcome::RateLimited { retry_after } => {
                    let delay = retry_after.unwrap_or(self.settings.retry_delay);
                    warn!(retry_after = ?delay, "Rate limited by webhook");
                    delay
                }
                DeliveryOutcome::Transient { status } => {
                    warn!(status, "Gateway error from webhook");
                    self.settings.retry_delay * (attempt + 1)
                }
                DeliveryOutcome::NetworkFailure(reason) => {
                    warn!(error = %reason, "Error sending batch, recreating session");
                    self.transport.reset().await;
                    self.settings.retry_delay
                }
            };

            if attempt >= max_retries {
                return Delivery::Exhausted;
            }
            metrics::counter!("unilog_webhook_retries_total").increment(1);
            tokio::select! {
                biased;
                _ = shutdown_rx.wait_for(|stop| *stop) => return Delivery::Interrupted,
                _ = self.clock.sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Final best-effort flush: one attempt, without retries, for the head
    /// of the queue. Whatever is still queued afterwards is discarded.
    pub(crate) async fn drain(&self) {
        if let FlushResult::Dropped(count) = self.flush_once(0).await {
            warn!(count, "Failed to send final batch during cleanup");
        }
        let remaining = self.queue_len();
        if remaining > 0 {
            warn!(remaining, "Discarding records left after the final flush");
            self.disable();
        }
    }
}

/// The background flush loop. Wakes every tick, flushes when due, and exits
/// on the shutdown signal or when the sink has been disabled.
pub(crate) async fn run(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    info!("Webhook flush worker started.");
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.wait_for(|stop| *stop) => {
                info!("Webhook flush worker received shutdown signal.");
                break;
            }
            _ = shared.clock.sleep(shared.settings.tick) => {}
        }

        if shared.state() != WebhookState::Running {
            debug!("Webhook sink no longer running, stopping worker.");
            break;
        }

        if shared.flush_due() {
            match shared.flush_once(shared.settings.max_retries).await {
                FlushResult::Disabled => break,
                FlushResult::Interrupted => {
                    debug!("Flush interrupted by shutdown.");
                    break;
                }
                _ => {}
            }
        }
    }
    info!("Webhook flush worker finished.");
}
