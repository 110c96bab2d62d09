//! musicvotes-ingress library interface
//!
//! Event Grid webhook receiver that turns newly uploaded songs into
//! persisted, votable records. Exposed as a library for integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod eventgrid;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::eventgrid::{EventCache, HandlerRegistry, TypeDispatcher};
use crate::services::{BlobCreatedHandler, EventQueryService, IngestionCoordinator};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Webhook dispatcher (owns the write side of the event cache)
    pub dispatcher: TypeDispatcher,
    /// Read side of the event cache
    pub events: EventQueryService,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, cache: Arc<EventCache>, registry: HandlerRegistry) -> Self {
        Self {
            dispatcher: TypeDispatcher::new(Arc::clone(&cache), registry, db.clone()),
            events: EventQueryService::new(cache),
            db,
            startup_time: Utc::now(),
        }
    }
}

/// Handler table for the event types this service understands
pub fn default_registry(coordinator: Arc<IngestionCoordinator>) -> HandlerRegistry {
    HandlerRegistry::builder()
        .bind(Arc::new(BlobCreatedHandler::new(coordinator)))
        .build()
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::ingress_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
