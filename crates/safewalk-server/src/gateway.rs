//! Messaging gateway adapters.
//!
//! The core only knows the [`MessagingGateway`] trait. The server delivers
//! alerts by posting them to an SMS relay webhook, or refuses to deliver when
//! no relay is configured.

use std::time::Duration;

use async_trait::async_trait;
use safewalk_core::config::MessagingConfig;
use safewalk_core::{DeliveryOutcome, MessagingGateway};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Errors building a gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The webhook URL did not parse or is not http(s).
    #[error("invalid webhook URL '{url}': {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// JSON body posted to the relay.
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Ten-digit recipient numbers.
    pub recipients: Vec<String>,
    /// Message text.
    pub body: String,
}

/// Optional JSON reply from the relay.
#[derive(Debug, Default, Deserialize)]
struct WebhookReply {
    #[serde(default)]
    status: Option<String>,
}

/// Posts alerts to an HTTP SMS relay.
///
/// A 2xx response counts as sent unless its JSON body reports
/// `{"status": "cancelled"}`. Any other response, or a transport error, is a
/// failure. One request per alert; nothing is retried.
#[derive(Debug, Clone)]
pub struct WebhookGateway {
    client: reqwest::Client,
    endpoint: Url,
}

impl WebhookGateway {
    /// Build a gateway posting to `endpoint` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidUrl`] for a malformed or non-http(s) URL.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let endpoint = Url::parse(endpoint).map_err(|e| GatewayError::InvalidUrl {
            url: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(GatewayError::InvalidUrl {
                url: endpoint.to_string(),
                reason: "scheme must be http or https".to_string(),
            });
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    /// The relay endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl MessagingGateway for WebhookGateway {
    async fn send(&self, recipients: &[String], body: &str) -> DeliveryOutcome {
        let payload = WebhookPayload {
            recipients: recipients.to_vec(),
            body: body.to_string(),
        };

        let response = match self
            .client
            .post(self.endpoint.clone())
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) if error.is_timeout() => {
                warn!(endpoint = %self.endpoint, "Messaging relay timed out");
                return DeliveryOutcome::Failed {
                    reason: "messaging relay timed out".to_string(),
                };
            }
            Err(error) => {
                warn!(endpoint = %self.endpoint, %error, "Messaging relay unreachable");
                return DeliveryOutcome::Failed {
                    reason: error.to_string(),
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(endpoint = %self.endpoint, %status, "Messaging relay rejected alert");
            return DeliveryOutcome::Failed {
                reason: format!("messaging relay responded with {status}"),
            };
        }

        let reply: WebhookReply = response.json().await.unwrap_or_default();
        debug!(%status, reply_status = ?reply.status, "Messaging relay accepted alert");
        match reply.status.as_deref() {
            Some(s) if s.eq_ignore_ascii_case("cancelled") => DeliveryOutcome::Cancelled,
            _ => DeliveryOutcome::Sent,
        }
    }
}

/// Gateway used when no relay is configured. Every send fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredGateway;

#[async_trait]
impl MessagingGateway for UnconfiguredGateway {
    async fn send(&self, recipients: &[String], _body: &str) -> DeliveryOutcome {
        warn!(
            recipients = recipients.len(),
            "Alert not delivered: messaging.webhook_url is not configured"
        );
        DeliveryOutcome::Failed {
            reason: "no messaging gateway configured".to_string(),
        }
    }
}

/// Build the gateway described by `config`.
///
/// # Errors
///
/// Returns an error if the configured webhook cannot be used.
pub fn from_config(
    config: &MessagingConfig,
) -> Result<std::sync::Arc<dyn MessagingGateway>, GatewayError> {
    match &config.webhook_url {
        Some(url) => Ok(std::sync::Arc::new(WebhookGateway::new(
            url,
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => Ok(std::sync::Arc::new(UnconfiguredGateway)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    async fn serve(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[test]
    fn test_rejects_malformed_url() {
        let err = WebhookGateway::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidUrl { .. }));
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        let err = WebhookGateway::new("ftp://relay.example/sms", Duration::from_secs(1)).unwrap_err();
        assert!(err.to_string().contains("http"));
    }

    #[tokio::test]
    async fn test_unconfigured_gateway_fails() {
        let outcome = UnconfiguredGateway
            .send(&["5551234567".to_string()], "help")
            .await;
        assert!(matches!(outcome, DeliveryOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_posts_payload_to_relay() {
        let received: Arc<Mutex<Vec<WebhookPayload>>> = Arc::default();
        let sink = Arc::clone(&received);
        let router = Router::new().route(
            "/sms",
            post(move |Json(payload): Json<WebhookPayload>| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().await.push(payload);
                    StatusCode::ACCEPTED
                }
            }),
        );
        let addr = serve(router).await;

        let gateway =
            WebhookGateway::new(&format!("http://{addr}/sms"), Duration::from_secs(5)).unwrap();
        let outcome = gateway
            .send(
                &["5551234567".to_string(), "5559876543".to_string()],
                "Alex needs help",
            )
            .await;

        assert_eq!(outcome, DeliveryOutcome::Sent);
        let received = received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].recipients.len(), 2);
        assert_eq!(received[0].body, "Alex needs help");
    }

    #[tokio::test]
    async fn test_relay_cancellation_and_failure() {
        let router = Router::new()
            .route(
                "/cancel",
                post(|| async { Json(serde_json::json!({ "status": "cancelled" })) }),
            )
            .route(
                "/broken",
                post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            );
        let addr = serve(router).await;
        let recipients = ["5551234567".to_string()];

        let cancel =
            WebhookGateway::new(&format!("http://{addr}/cancel"), Duration::from_secs(5)).unwrap();
        assert_eq!(
            cancel.send(&recipients, "help").await,
            DeliveryOutcome::Cancelled
        );

        let broken =
            WebhookGateway::new(&format!("http://{addr}/broken"), Duration::from_secs(5)).unwrap();
        match broken.send(&recipients, "help").await {
            DeliveryOutcome::Failed { reason } => assert!(reason.contains("500")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_from_config_without_webhook() {
        let config = MessagingConfig {
            webhook_url: None,
            timeout_secs: 10,
        };
        assert!(from_config(&config).is_ok());
    }
}
