//! Event handlers and the type → handler registry
//!
//! Handlers are bound once at startup. After [`HandlerRegistryBuilder::build`]
//! the registry is immutable and shared read-only by every request.

use async_trait::async_trait;
use musicvotes_common::db::Song;
use sqlx::{Sqlite, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::envelope::NotificationEnvelope;
use crate::error::IngestError;

/// Per-envelope unit of work handed to a handler
///
/// The dispatcher opens the transaction and commits it only when the
/// handler succeeds.
pub struct RequestScope {
    pub tx: Transaction<'static, Sqlite>,
    pub cancel: CancellationToken,
}

impl RequestScope {
    pub fn new(tx: Transaction<'static, Sqlite>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Fail with [`IngestError::Cancelled`] once the delivery was abandoned
    pub fn ensure_active(&self) -> Result<(), IngestError> {
        if self.cancel.is_cancelled() {
            Err(IngestError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// What a successful handler did
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// A song was created from the event
    Created(Song),
    /// Event handled, nothing persisted
    Accepted,
}

/// Handler for one event type
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Event type this handler is bound to
    fn event_type(&self) -> &'static str;

    async fn handle(
        &self,
        scope: &mut RequestScope,
        envelope: &NotificationEnvelope,
    ) -> Result<HandlerOutcome, IngestError>;
}

fn registry_key(event_type: &str) -> String {
    event_type.to_ascii_lowercase()
}

/// Immutable event type → handler table
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<HashMap<String, Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Handler bound to `event_type` (case-insensitive)
    pub fn get(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(&registry_key(event_type)).cloned()
    }

    /// Bound event types, sorted
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.handlers.values().map(|h| h.event_type()).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}

/// Collects bindings before the registry is frozen
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistryBuilder {
    /// Bind `handler` to its event type; the first binding for a type wins
    pub fn bind(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let event_type = handler.event_type();
        match self.handlers.entry(registry_key(event_type)) {
            std::collections::hash_map::Entry::Occupied(_) => {
                tracing::warn!(event_type, "Handler already bound, ignoring second binding");
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                tracing::debug!(event_type, "Handler bound");
                slot.insert(handler);
            }
        }
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: Arc::new(self.handlers),
        }
    }
}
