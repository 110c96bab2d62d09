//! Event Grid notification envelopes
//!
//! The webhook body is a JSON array of events. Each event is kept with its
//! `data` undecoded; the handler bound to the event type decides what shape
//! `data` must have.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event type for a newly created storage blob
pub const BLOB_CREATED: &str = "Microsoft.Storage.BlobCreated";

/// Event type Event Grid sends when a subscription is being validated
pub const SUBSCRIPTION_VALIDATION: &str = "Microsoft.EventGrid.SubscriptionValidationEvent";

/// Header naming the delivery phase (`SubscriptionValidation` or `Notification`)
pub const EVENT_TYPE_HEADER: &str = "aeg-event-type";

/// Header value marking a handshake delivery
pub const SUBSCRIPTION_VALIDATION_PHASE: &str = "SubscriptionValidation";

/// One event as it appears on the wire
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    pub id: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub data_version: Option<String>,
    #[serde(default)]
    pub metadata_version: Option<String>,
}

/// A received notification, immutable once cached
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEnvelope {
    pub id: String,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_version: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl NotificationEnvelope {
    /// Minimal envelope, stamped as received now
    pub fn new(id: impl Into<String>, event_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            topic: None,
            subject: None,
            event_time: None,
            data,
            data_version: None,
            metadata_version: None,
            received_at: Utc::now(),
        }
    }

    /// Stamp a wire event with its receipt time
    pub fn received(event: WireEvent, received_at: DateTime<Utc>) -> Self {
        Self {
            id: event.id,
            event_type: event.event_type,
            topic: event.topic,
            subject: event.subject,
            event_time: event.event_time,
            data: event.data,
            data_version: event.data_version,
            metadata_version: event.metadata_version,
            received_at,
        }
    }

    pub fn is_subscription_validation(&self) -> bool {
        self.event_type.eq_ignore_ascii_case(SUBSCRIPTION_VALIDATION)
    }
}

/// Decode a webhook body into envelopes, all stamped with the same receipt time
pub fn decode_batch(body: &[u8]) -> Result<Vec<NotificationEnvelope>, serde_json::Error> {
    let events: Vec<WireEvent> = serde_json::from_slice(body)?;
    let received_at = Utc::now();
    Ok(events
        .into_iter()
        .map(|event| NotificationEnvelope::received(event, received_at))
        .collect())
}

/// `data` of a subscription validation event
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionValidationData {
    #[serde(default)]
    pub validation_code: Option<String>,
    #[serde(default)]
    pub validation_url: Option<String>,
}

/// Handshake answer; the code is echoed verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionValidationResponse {
    pub validation_response: String,
}
