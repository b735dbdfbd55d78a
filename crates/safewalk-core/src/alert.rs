//! Alert message composition and dispatch.
//!
//! The dispatcher reads the profile, builds a fresh [`AlertMessage`] and makes
//! exactly one delivery attempt through the [`MessagingGateway`]. Nothing is
//! retried here; the outcome goes back to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::contacts::{Contact, ContactError, Profile, ProfileStore};
use crate::location::Coordinate;

/// Result reported by a messaging gateway for one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The message was handed off for delivery.
    Sent,
    /// Sending was cancelled before delivery.
    Cancelled,
    /// Delivery failed.
    Failed {
        /// Gateway-provided reason.
        reason: String,
    },
}

/// Something that can deliver a text message to a set of phone numbers.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Attempt delivery of `body` to every recipient.
    async fn send(&self, recipients: &[String], body: &str) -> DeliveryOutcome;
}

/// Alert dispatch failures.
#[derive(Debug, Error)]
pub enum AlertError {
    /// No usable contact in the profile; nothing was sent.
    #[error("no emergency contacts configured")]
    NoRecipients,

    /// The gateway reported cancellation.
    #[error("alert delivery cancelled")]
    DeliveryCancelled,

    /// The gateway reported failure.
    #[error("alert delivery failed: {reason}")]
    DeliveryFailed {
        /// Gateway-provided reason.
        reason: String,
    },

    /// The profile could not be read.
    #[error("failed to load profile: {0}")]
    Store(#[from] ContactError),
}

/// An emergency message, built fresh for every send.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    /// Name the message is signed with.
    pub sender_name: String,
    /// Recipients in profile order, without blanks or duplicates.
    pub recipients: Vec<Contact>,
    /// Location to include, if one was resolved.
    pub coordinate: Option<Coordinate>,
}

impl AlertMessage {
    /// Build a message from an ordered list of raw contact strings.
    ///
    /// Blank contacts are dropped, duplicates keep their first position, and
    /// malformed numbers are skipped with a warning.
    #[must_use]
    pub fn new<I, S>(
        sender_name: impl Into<String>,
        contacts: I,
        coordinate: Option<Coordinate>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut recipients: Vec<Contact> = Vec::new();
        for raw in contacts {
            let raw = raw.as_ref().trim();
            if raw.is_empty() {
                continue;
            }
            match Contact::parse(raw) {
                Ok(contact) if !recipients.contains(&contact) => recipients.push(contact),
                Ok(_) => {}
                Err(error) => warn!(%error, "Skipping malformed stored contact"),
            }
        }

        Self {
            sender_name: sender_name.into(),
            recipients,
            coordinate,
        }
    }

    /// Build a message from the stored profile.
    #[must_use]
    pub fn compose(profile: &Profile, coordinate: Option<Coordinate>) -> Self {
        Self::new(profile.username.clone(), profile.contacts(), coordinate)
    }

    /// Render the message body. The location clause is omitted without a coordinate.
    #[must_use]
    pub fn body(&self, maps_base_url: &str) -> String {
        let greeting = format!(
            "Hey it's me {}. I am in Danger, this is my location, Please help!!",
            self.sender_name
        );
        match &self.coordinate {
            Some(coordinate) => format!(
                "{greeting}\n\nLocation: {maps_base_url}{},{}",
                coordinate.latitude, coordinate.longitude
            ),
            None => greeting,
        }
    }

    /// Recipient phone numbers as plain strings.
    #[must_use]
    pub fn recipient_numbers(&self) -> Vec<String> {
        self.recipients.iter().map(ToString::to_string).collect()
    }
}

/// Proof of a successful hand-off to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeliveryReceipt {
    /// Numbers the message was sent to.
    #[schema(example = json!(["5551234567"]))]
    pub recipients: Vec<String>,
    /// Whether the body carried a location link.
    pub included_location: bool,
    /// When the gateway accepted the message.
    pub sent_at: DateTime<Utc>,
}

/// Composes and sends alert messages.
#[derive(Clone)]
pub struct AlertDispatcher {
    gateway: Arc<dyn MessagingGateway>,
    profiles: ProfileStore,
    maps_base_url: String,
}

impl AlertDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn MessagingGateway>,
        profiles: ProfileStore,
        maps_base_url: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            profiles,
            maps_base_url: maps_base_url.into(),
        }
    }

    /// Send one alert.
    ///
    /// # Errors
    ///
    /// - [`AlertError::NoRecipients`] if the profile has no usable contact (no send attempted)
    /// - [`AlertError::DeliveryCancelled`] / [`AlertError::DeliveryFailed`] per gateway outcome
    /// - [`AlertError::Store`] if the profile cannot be read
    pub async fn dispatch(
        &self,
        coordinate: Option<Coordinate>,
    ) -> Result<DeliveryReceipt, AlertError> {
        let profile = self.profiles.load()?;
        let message = AlertMessage::compose(&profile, coordinate);
        if message.recipients.is_empty() {
            warn!("Alert aborted: no recipients");
            return Err(AlertError::NoRecipients);
        }

        let recipients = message.recipient_numbers();
        let body = message.body(&self.maps_base_url);
        info!(
            recipients = recipients.len(),
            with_location = message.coordinate.is_some(),
            "Dispatching alert"
        );

        match self.gateway.send(&recipients, &body).await {
            DeliveryOutcome::Sent => Ok(DeliveryReceipt {
                recipients,
                included_location: message.coordinate.is_some(),
                sent_at: Utc::now(),
            }),
            DeliveryOutcome::Cancelled => Err(AlertError::DeliveryCancelled),
            DeliveryOutcome::Failed { reason } => Err(AlertError::DeliveryFailed { reason }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingGateway {
        outcome: Option<DeliveryOutcome>,
        sent: Mutex<Vec<(Vec<String>, String)>>,
    }

    #[async_trait]
    impl MessagingGateway for RecordingGateway {
        async fn send(&self, recipients: &[String], body: &str) -> DeliveryOutcome {
            self.sent
                .lock()
                .await
                .push((recipients.to_vec(), body.to_string()));
            self.outcome.clone().unwrap_or(DeliveryOutcome::Sent)
        }
    }

    fn profile(contact1: &str, contact2: &str) -> Profile {
        Profile {
            username: "Alex".into(),
            contact1: contact1.into(),
            contact2: contact2.into(),
        }
    }

    fn build_dispatcher(profile: &Profile, gateway: Arc<RecordingGateway>) -> AlertDispatcher {
        let profiles = ProfileStore::new(Arc::new(MemoryStore::new()));
        profiles.save(profile).unwrap();
        AlertDispatcher::new(gateway, profiles, "https://maps.example/?q=")
    }

    #[test]
    fn test_compose_filters_blank_and_preserves_order() {
        let message = AlertMessage::new("Alex", ["5551234567", "", "5559876543"], None);
        assert_eq!(message.recipient_numbers(), vec!["5551234567", "5559876543"]);

        let message = AlertMessage::compose(&profile("", "5559876543"), None);
        assert_eq!(message.recipient_numbers(), vec!["5559876543"]);
        assert!(message.recipients.iter().all(|c| !c.as_str().is_empty()));
    }

    #[test]
    fn test_compose_deduplicates() {
        let message = AlertMessage::compose(&profile("5551234567", "5551234567"), None);
        assert_eq!(message.recipient_numbers(), vec!["5551234567"]);
    }

    #[test]
    fn test_compose_skips_malformed_stored_contacts() {
        let message = AlertMessage::compose(&profile("call me", "5559876543"), None);
        assert_eq!(message.recipient_numbers(), vec!["5559876543"]);
    }

    #[test]
    fn test_body_with_and_without_location() {
        let coordinate = Coordinate::now(12.5, -45.25);
        let with = AlertMessage::compose(&profile("5551234567", ""), Some(coordinate));
        assert_eq!(
            with.body("https://maps.example/?q="),
            "Hey it's me Alex. I am in Danger, this is my location, Please help!!\n\n\
             Location: https://maps.example/?q=12.5,-45.25"
        );

        let without = AlertMessage::compose(&profile("5551234567", ""), None);
        let body = without.body("https://maps.example/?q=");
        assert!(body.ends_with("Please help!!"));
        assert!(!body.contains("Location:"));
    }

    #[tokio::test]
    async fn test_dispatch_without_location_still_sends() {
        let gateway = Arc::new(RecordingGateway::default());
        let dispatcher = build_dispatcher(&profile("5551234567", "5559876543"), gateway.clone());

        let receipt = dispatcher.dispatch(None).await.unwrap();
        assert!(!receipt.included_location);
        assert_eq!(receipt.recipients.len(), 2);

        let sent = gateway.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].1.contains("Location:"));
    }

    #[tokio::test]
    async fn test_dispatch_no_recipients_skips_gateway() {
        let gateway = Arc::new(RecordingGateway::default());
        let dispatcher = build_dispatcher(&profile("", ""), gateway.clone());

        let err = dispatcher.dispatch(None).await.unwrap_err();
        assert!(matches!(err, AlertError::NoRecipients));
        assert!(gateway.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_reports_gateway_failures() {
        let gateway = Arc::new(RecordingGateway {
            outcome: Some(DeliveryOutcome::Failed {
                reason: "no signal".into(),
            }),
            ..RecordingGateway::default()
        });
        let dispatcher = build_dispatcher(&profile("5551234567", ""), gateway.clone());
        let err = dispatcher.dispatch(None).await.unwrap_err();
        assert!(matches!(err, AlertError::DeliveryFailed { ref reason } if reason == "no signal"));
        assert_eq!(gateway.sent.lock().await.len(), 1);

        let gateway = Arc::new(RecordingGateway {
            outcome: Some(DeliveryOutcome::Cancelled),
            ..RecordingGateway::default()
        });
        let dispatcher = build_dispatcher(&profile("5551234567", ""), gateway);
        assert!(matches!(
            dispatcher.dispatch(None).await.unwrap_err(),
            AlertError::DeliveryCancelled
        ));
    }
}
