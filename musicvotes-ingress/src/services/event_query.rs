//! Read-only view of received notifications

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::eventgrid::cache::EventCache;
use crate::eventgrid::envelope::NotificationEnvelope;

/// One line of the event listing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub id: String,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}

impl From<&NotificationEnvelope> for EventSummary {
    fn from(envelope: &NotificationEnvelope) -> Self {
        Self {
            id: envelope.id.clone(),
            event_type: envelope.event_type.clone(),
            subject: envelope.subject.clone(),
            event_time: envelope.event_time,
            received_at: envelope.received_at,
        }
    }
}

/// A single event with its payload, plus the payload pretty-printed
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetail {
    #[serde(flatten)]
    pub envelope: NotificationEnvelope,
    pub formatted_data: String,
}

/// Query facade over the event cache
#[derive(Debug, Clone)]
pub struct EventQueryService {
    cache: Arc<EventCache>,
}

impl EventQueryService {
    pub fn new(cache: Arc<EventCache>) -> Self {
        Self { cache }
    }

    /// Summaries in receipt order
    pub async fn list(&self) -> Vec<EventSummary> {
        self.cache
            .list()
            .await
            .iter()
            .map(|envelope| EventSummary::from(envelope.as_ref()))
            .collect()
    }

    /// Event by identifier (case-insensitive); unknown ids are 404
    pub async fn get(&self, id: &str) -> ApiResult<EventDetail> {
        let envelope = self
            .cache
            .get(id)
            .await
            .ok_or_else(|| ApiError::NotFound(format!("event not found: {}", id)))?;

        tracing::debug!(event_id = %envelope.id, "Matching event found");

        let formatted_data = format_data(&envelope.data)?;
        Ok(EventDetail {
            envelope: envelope.as_ref().clone(),
            formatted_data,
        })
    }
}

fn format_data(data: &Value) -> ApiResult<String> {
    serde_json::to_string_pretty(data)
        .map_err(|e| ApiError::Internal(format!("unable to format event data: {}", e)))
}
