//! Construction and teardown of the sink set.
//!
//! The manager builds every enabled sink, waits for the webhook's
//! connectivity check, and only then marks the dispatcher ready. Cleanup runs
//! in reverse registration order and is the point at which the webhook
//! worker is guaranteed to have stopped.

use crate::clock::{Clock, TokioClock};
use crate::config::SinkConfig;
use crate::core::{Sink, SinkKind};
use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, SinkError};
use crate::sinks::local::LocalSink;
use crate::sinks::telemetry::{TelemetryBackend, TelemetrySink, TracingTelemetry};
use crate::sinks::webhook::transport::{ReqwestTransport, WebhookTransport};
use crate::sinks::webhook::{WebhookSettings, WebhookSink};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Configures the collaborators of a [`SinkManager`] before initialization.
///
/// Every override is optional; by default the webhook posts over HTTP, the
/// telemetry sink emits `tracing` events, and the console is stderr.
pub struct SinkManagerBuilder {
    config: SinkConfig,
    webhook_transport: Option<Arc<dyn WebhookTransport>>,
    telemetry_backend: Option<Arc<dyn TelemetryBackend>>,
    clock: Option<Arc<dyn Clock>>,
    console: Option<Box<dyn Write + Send>>,
    custom_sinks: Vec<Arc<dyn Sink>>,
}

impl SinkManagerBuilder {
    pub fn new(config: SinkConfig) -> Self {
        Self {
            config,
            webhook_transport: None,
            telemetry_backend: None,
            clock: None,
            console: None,
            custom_sinks: Vec::new(),
        }
    }

    pub fn with_webhook_transport(mut self, transport: Arc<dyn WebhookTransport>) -> Self {
        self.webhook_transport = Some(transport);
        self
    }

    pub fn with_telemetry_backend(mut self, backend: Arc<dyn TelemetryBackend>) -> Self {
        self.telemetry_backend = Some(backend);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_console_writer(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.console = Some(writer);
        self
    }

    /// Registers an extra sink after the built-in ones.
    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.custom_sinks.push(sink);
        self
    }

    /// Builds and initializes every enabled sink.
    ///
    /// A sink that cannot be constructed is left out. A webhook sink that
    /// fails its connectivity check stays registered but disabled. Fails
    /// only if the configuration is invalid or no sink is usable.
    #[instrument(skip_all, fields(sinks = ?self.config.enabled_sinks))]
    pub async fn initialize(mut self) -> Result<SinkManager, DispatchError> {
        let dispatcher = Arc::new(Dispatcher::new(self.config.clone())?);
        dispatcher.begin_initialization()?;
        let config = dispatcher.config();

        let mut usable = 0usize;
        let mut webhook = None;

        for kind in &config.enabled_sinks {
            let sink: Arc<dyn Sink> = match kind {
                SinkKind::Local => match self.local_sink(&config) {
                    Ok(sink) => Arc::new(sink),
                    Err(e) => {
                        error!(sink = %kind, error = %e, "Failed to create sink, omitting it");
                        continue;
                    }
                },
                SinkKind::Telemetry => Arc::new(self.telemetry_sink()),
                SinkKind::Webhook => match self.webhook_sink(&config) {
                    Ok(sink) => {
                        let sink = Arc::new(sink);
                        webhook = Some(sink.clone());
                        sink
                    }
                    Err(e) => {
                        error!(sink = %kind, error = %e, "Failed to create sink, omitting it");
                        continue;
                    }
                },
            };

            if let Err(e) = dispatcher.register(*kind, sink.clone()) {
                error!(sink = %kind, error = %e, "Failed to register sink, omitting it");
                continue;
            }
            if initialize_sink(sink.as_ref()).await {
                usable += 1;
            }
        }

        for sink in std::mem::take(&mut self.custom_sinks) {
            if let Err(e) = dispatcher.register_custom(sink.clone()) {
                error!(sink = %sink.name(), error = %e, "Failed to register sink, omitting it");
                continue;
            }
            if initialize_sink(sink.as_ref()).await {
                usable += 1;
            }
        }

        if usable == 0 {
            error!("No sink could be initialized");
            for sink in dispatcher.close().into_iter().rev() {
                sink.cleanup().await;
            }
            return Err(DispatchError::NoUsableSinks);
        }

        dispatcher.mark_ready()?;
        info!(
            usable,
            sinks = ?dispatcher.sink_names(),
            "Logging initialized"
        );
        Ok(SinkManager {
            dispatcher,
            webhook,
            cleaned: AtomicBool::new(false),
        })
    }

    fn local_sink(&mut self, config: &SinkConfig) -> Result<LocalSink, SinkError> {
        let sink = LocalSink::new(config)?;
        Ok(match self.console.take() {
            Some(writer) => sink.with_console_writer(writer),
            None => sink,
        })
    }

    fn telemetry_sink(&self) -> TelemetrySink {
        let backend = self
            .telemetry_backend
            .clone()
            .unwrap_or_else(|| Arc::new(TracingTelemetry));
        TelemetrySink::new(backend)
    }

    fn webhook_sink(&self, config: &SinkConfig) -> Result<WebhookSink, SinkError> {
        let settings = WebhookSettings::from_config(config)?;
        let transport = match &self.webhook_transport {
            Some(transport) => transport.clone(),
            None => Arc::new(ReqwestTransport::new(
                settings.url.clone(),
                settings.request_timeout,
            )),
        };
        let clock = self
            .clock
            .clone()
            .unwrap_or_else(|| Arc::new(TokioClock));
        Ok(WebhookSink::new(settings, transport, clock))
    }
}

async fn initialize_sink(sink: &dyn Sink) -> bool {
    match sink.initialize().await {
        Ok(()) => true,
        Err(e) => {
            warn!(sink = %sink.name(), error = %e, "Sink failed to initialize and is disabled");
            false
        }
    }
}

/// Owns the initialized sink set.
pub struct SinkManager {
    dispatcher: Arc<Dispatcher>,
    webhook: Option<Arc<WebhookSink>>,
    cleaned: AtomicBool,
}

impl SinkManager {
    pub fn builder(config: SinkConfig) -> SinkManagerBuilder {
        SinkManagerBuilder::new(config)
    }

    /// Initializes the enabled sinks with their default collaborators.
    pub async fn initialize(config: SinkConfig) -> Result<Self, DispatchError> {
        SinkManagerBuilder::new(config).initialize().await
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// The webhook sink, if one was constructed.
    pub fn webhook(&self) -> Option<&Arc<WebhookSink>> {
        self.webhook.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }

    /// Closes the dispatcher and cleans the sinks up, last registered first.
    /// Safe to call more than once.
    #[instrument(skip_all)]
    pub async fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        let sinks = self.dispatcher.close();
        for sink in sinks.iter().rev() {
            sink.cleanup().await;
        }
        info!(sinks = sinks.len(), "Logging shut down");
    }
}
