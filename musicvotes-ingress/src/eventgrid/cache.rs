//! In-memory record of received notifications
//!
//! Volatile: the cache exists for audit and inspection and is lost on
//! restart. Identifiers are compared case-insensitively; the first
//! envelope seen for an identifier is authoritative and later redeliveries
//! are not recorded again.
//!
//! Alongside the audit record the cache tracks which identifiers are
//! claimed for handling. A claim is held while an envelope is in flight and
//! kept once it was handled; a failed handling releases it so a redelivery
//! is handled again.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::envelope::NotificationEnvelope;

/// Thread-safe, append-only envelope store in receipt order
#[derive(Debug)]
pub struct EventCache {
    inner: RwLock<CacheInner>,
    /// `None` keeps every envelope for the life of the process
    capacity: Option<usize>,
}

#[derive(Debug, Default)]
struct CacheInner {
    order: VecDeque<Arc<NotificationEnvelope>>,
    by_id: HashMap<String, Arc<NotificationEnvelope>>,
    claimed: HashSet<String>,
}

fn cache_key(id: &str) -> String {
    id.to_lowercase()
}

impl EventCache {
    /// Unbounded cache
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
            capacity: None,
        }
    }

    /// Cache holding at most `capacity` envelopes, evicting the oldest first
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
            capacity: Some(capacity.max(1)),
        }
    }

    /// Record `envelope`
    ///
    /// Returns `false` without touching the cache when an envelope with the
    /// same identifier is already present.
    pub async fn add(&self, envelope: Arc<NotificationEnvelope>) -> bool {
        let key = cache_key(&envelope.id);
        let mut inner = self.inner.write().await;

        if inner.by_id.contains_key(&key) {
            return false;
        }

        inner.by_id.insert(key, Arc::clone(&envelope));
        inner.order.push_back(envelope);

        if let Some(capacity) = self.capacity {
            while inner.order.len() > capacity {
                if let Some(evicted) = inner.order.pop_front() {
                    let key = cache_key(&evicted.id);
                    inner.by_id.remove(&key);
                    inner.claimed.remove(&key);
                    tracing::debug!(event_id = %evicted.id, "Evicted oldest cached event");
                }
            }
        }

        true
    }

    /// Claim `id` for handling
    ///
    /// Returns `false` when the identifier is already in flight or was
    /// handled successfully.
    pub async fn claim(&self, id: &str) -> bool {
        self.inner.write().await.claimed.insert(cache_key(id))
    }

    /// Give up the claim on `id` after a failed handling
    pub async fn release(&self, id: &str) {
        self.inner.write().await.claimed.remove(&cache_key(id));
    }

    /// Snapshot of all envelopes in receipt order
    pub async fn list(&self) -> Vec<Arc<NotificationEnvelope>> {
        self.inner.read().await.order.iter().cloned().collect()
    }

    /// Look up an envelope by identifier (case-insensitive)
    pub async fn get(&self, id: &str) -> Option<Arc<NotificationEnvelope>> {
        self.inner.read().await.by_id.get(&cache_key(id)).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl Default for EventCache {
    fn default() -> Self {
        Self::new()
    }
}
