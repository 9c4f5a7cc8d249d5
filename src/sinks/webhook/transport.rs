//! HTTP delivery of webhook payloads.

use super::payload::WebhookPayload;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, instrument};

/// What happened to a single POST.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Any 2xx response; the service answers 204.
    Success,
    /// 429, with the server-supplied wait if it sent one.
    RateLimited { retry_after: Option<Duration> },
    /// 502, 503 or 504.
    Transient { status: u16 },
    /// Any other non-2xx status.
    Fatal { status: u16 },
    /// Connection failure or timeout.
    NetworkFailure(String),
}

impl DeliveryOutcome {
    /// Classifies a response by status code, reading `retry_after` (seconds)
    /// from the body of a 429.
    pub fn from_response(status: u16, body: &str) -> Self {
        match status {
            200..=299 => DeliveryOutcome::Success,
            429 => DeliveryOutcome::RateLimited {
                retry_after: parse_retry_after(body),
            },
            502..=504 => DeliveryOutcome::Transient { status },
            _ => DeliveryOutcome::Fatal { status },
        }
    }
}

/// Whether a fatal status means the endpoint itself is unusable.
pub fn disables_sink(status: u16) -> bool {
    matches!(status, 401 | 404)
}

fn parse_retry_after(body: &str) -> Option<Duration> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let seconds = value.get("retry_after")?.as_f64()?;
    Duration::try_from_secs_f64(seconds).ok()
}

/// Sends payloads to the webhook endpoint.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, payload: &WebhookPayload) -> DeliveryOutcome;

    /// Discards the current session; the next `post` opens a fresh one.
    async fn reset(&self) {}

    /// Releases the session for good.
    async fn close(&self) {}
}

/// `reqwest`-backed transport with a per-request timeout.
pub struct ReqwestTransport {
    url: String,
    timeout: Duration,
    client: Mutex<Option<reqwest::Client>>,
}

impl ReqwestTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            client: Mutex::new(None),
        }
    }

    fn session(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut guard = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        debug!("Creating new HTTP session");
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        *guard = Some(client.clone());
        Ok(client)
    }

    fn drop_session(&self) {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    #[instrument(skip(self, payload), fields(embeds = payload.embeds.len()))]
    async fn post(&self, payload: &WebhookPayload) -> DeliveryOutcome {
        let client = match self.session() {
            Ok(client) => client,
            Err(e) => return DeliveryOutcome::NetworkFailure(e.to_string()),
        };

        match client.post(&self.url).json(payload).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                debug!(status, "Got webhook response");
                let body = if status == 429 {
                    response.text().await.unwrap_or_default()
                } else {
                    String::new()
                };
                DeliveryOutcome::from_response(status, &body)
            }
            Err(e) => DeliveryOutcome::NetworkFailure(e.to_string()),
        }
    }

    async fn reset(&self) {
        self.drop_session();
    }

    async fn close(&self) {
        self.drop_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LogLevel;
    use crate::sinks::webhook::payload::Embed;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> WebhookPayload {
        WebhookPayload::new(
            "unified_logger",
            vec![Embed::for_record(LogLevel::Error, "disk full", 1900)],
        )
    }

    async fn post_to(server: &MockServer, timeout: Duration) -> DeliveryOutcome {
        let transport = ReqwestTransport::new(format!("{}/hook", server.uri()), timeout);
        transport.post(&payload()).await
    }

    #[tokio::test]
    async fn test_post_sends_json_payload() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({
                "username": "unified_logger",
                "embeds": [{ "title": "ERROR Log", "description": "disk full", "color": 0xE74C3C }]
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        // Act
        let outcome = post_to(&server, Duration::from_secs(5)).await;

        // Assert
        assert_eq!(outcome, DeliveryOutcome::Success);
    }

    #[tokio::test]
    async fn test_post_reads_rate_limit_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429).set_body_json(json!({ "retry_after": 1.5, "global": false })),
            )
            .mount(&server)
            .await;

        assert_eq!(
            post_to(&server, Duration::from_secs(5)).await,
            DeliveryOutcome::RateLimited {
                retry_after: Some(Duration::from_millis(1500))
            }
        );
    }

    #[tokio::test]
    async fn test_post_classifies_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert_eq!(
            post_to(&server, Duration::from_secs(5)).await,
            DeliveryOutcome::Transient { status: 503 }
        );
        assert_eq!(
            post_to(&server, Duration::from_secs(5)).await,
            DeliveryOutcome::Fatal { status: 404 }
        );
    }

    #[tokio::test]
    async fn test_post_timeout_is_network_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let outcome = post_to(&server, Duration::from_millis(200)).await;

        assert!(matches!(outcome, DeliveryOutcome::NetworkFailure(_)));
    }

    #[tokio::test]
    async fn test_reset_recreates_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .expect(2)
            .mount(&server)
            .await;
        let transport =
            ReqwestTransport::new(format!("{}/hook", server.uri()), Duration::from_secs(5));

        assert_eq!(transport.post(&payload()).await, DeliveryOutcome::Success);
        transport.reset().await;
        assert!(transport.client.lock().unwrap().is_none());
        assert_eq!(transport.post(&payload()).await, DeliveryOutcome::Success);
        transport.close().await;
    }

    #[test]
    fn test_classifies_status_codes() {
        assert_eq!(DeliveryOutcome::from_response(204, ""), DeliveryOutcome::Success);
        assert_eq!(DeliveryOutcome::from_response(200, ""), DeliveryOutcome::Success);
        assert_eq!(
            DeliveryOutcome::from_response(503, ""),
            DeliveryOutcome::Transient { status: 503 }
        );
        assert_eq!(
            DeliveryOutcome::from_response(500, ""),
            DeliveryOutcome::Fatal { status: 500 }
        );
        assert_eq!(
            DeliveryOutcome::from_response(404, ""),
            DeliveryOutcome::Fatal { status: 404 }
        );
    }

    #[test]
    fn test_rate_limit_reads_retry_after() {
        assert_eq!(
            DeliveryOutcome::from_response(429, r#"{"retry_after": 2.5, "global": false}"#),
            DeliveryOutcome::RateLimited {
                retry_after: Some(Duration::from_millis(2500))
            }
        );
        assert_eq!(
            DeliveryOutcome::from_response(429, "not json"),
            DeliveryOutcome::RateLimited { retry_after: None }
        );
        assert_eq!(
            DeliveryOutcome::from_response(429, r#"{"retry_after": -1}"#),
            DeliveryOutcome::RateLimited { retry_after: None }
        );
    }

    #[test]
    fn test_unrepresentable_retry_after_falls_back_to_default_wait() {
        assert_eq!(
            DeliveryOutcome::from_response(429, r#"{"retry_after": 1e20}"#),
            DeliveryOutcome::RateLimited { retry_after: None }
        );
        assert_eq!(
            DeliveryOutcome::from_response(429, r#"{"retry_after": 1.7976931348623157e308}"#),
            DeliveryOutcome::RateLimited { retry_after: None }
        );
    }

    #[test]
    fn test_only_missing_or_unauthorized_endpoints_disable() {
        assert!(disables_sink(404));
        assert!(disables_sink(401));
        assert!(!disables_sink(400));
        assert!(!disables_sink(500));
    }
}
