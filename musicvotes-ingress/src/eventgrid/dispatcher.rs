//! Webhook type dispatch
//!
//! Decodes an Event Grid delivery, answers the subscription handshake, and
//! routes every envelope to the handler bound to its event type. Each
//! envelope gets its own transaction and its own outcome; one failing
//! envelope never affects its siblings.

use axum::http::{HeaderMap, StatusCode};
use musicvotes_common::db::Song;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cache::EventCache;
use super::envelope::{
    decode_batch, NotificationEnvelope, SubscriptionValidationData,
    SubscriptionValidationResponse, EVENT_TYPE_HEADER, SUBSCRIPTION_VALIDATION_PHASE,
};
use super::handler::{HandlerOutcome, HandlerRegistry, RequestScope};
use crate::error::{ApiError, ErrorKind, IngestError};

/// Result of handling a single envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    /// Handler created a song
    Created,
    /// Handler succeeded without creating anything
    Accepted,
    /// No handler bound for the event type
    Ignored,
    /// Identifier already seen; not dispatched again
    Duplicate,
    /// Client-attributable failure
    Rejected,
    /// Server-side failure
    Failed,
}

/// Per-envelope report returned to the sender
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeReport {
    pub id: String,
    pub event_type: String,
    pub status: EnvelopeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song: Option<Song>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub error_kind: Option<ErrorKind>,
}

impl EnvelopeReport {
    fn new(envelope: &NotificationEnvelope, status: EnvelopeStatus) -> Self {
        Self {
            id: envelope.id.clone(),
            event_type: envelope.event_type.clone(),
            status,
            song: None,
            error: None,
            error_kind: None,
        }
    }

    fn failed(envelope: &NotificationEnvelope, err: &IngestError) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::Server => EnvelopeStatus::Failed,
            ErrorKind::Client | ErrorKind::Unprocessable => EnvelopeStatus::Rejected,
        };
        Self {
            error: Some(err.to_string()),
            error_kind: Some(kind),
            ..Self::new(envelope, status)
        }
    }
}

/// Outcome of a whole delivery
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub results: Vec<EnvelopeReport>,
}

impl BatchReport {
    /// Worst outcome wins: server failure, then malformed input, then
    /// validation rejection; otherwise 201 if anything was created.
    pub fn status_code(&self) -> StatusCode {
        let has = |kind: ErrorKind| self.results.iter().any(|r| r.error_kind == Some(kind));

        if has(ErrorKind::Server) {
            StatusCode::INTERNAL_SERVER_ERROR
        } else if has(ErrorKind::Client) {
            StatusCode::BAD_REQUEST
        } else if has(ErrorKind::Unprocessable) {
            StatusCode::UNPROCESSABLE_ENTITY
        } else if self
            .results
            .iter()
            .any(|r| r.status == EnvelopeStatus::Created)
        {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        }
    }
}

/// Response to a webhook delivery
#[derive(Debug, Clone)]
pub enum DispatchResponse {
    /// Subscription handshake answer
    Validation(SubscriptionValidationResponse),
    /// Notification delivery outcome
    Batch(BatchReport),
}

/// Routes webhook deliveries to bound handlers
#[derive(Debug, Clone)]
pub struct TypeDispatcher {
    cache: Arc<EventCache>,
    registry: HandlerRegistry,
    db: SqlitePool,
}

impl TypeDispatcher {
    pub fn new(cache: Arc<EventCache>, registry: HandlerRegistry, db: SqlitePool) -> Self {
        Self {
            cache,
            registry,
            db,
        }
    }

    pub fn cache(&self) -> &Arc<EventCache> {
        &self.cache
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Handle one webhook delivery
    ///
    /// Structurally invalid bodies are rejected as a whole; after decoding,
    /// every envelope is cached before any handler runs for it.
    pub async fn receive(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<DispatchResponse, ApiError> {
        let envelopes = decode_batch(body)
            .map_err(|e| ApiError::BadRequest(format!("malformed event batch: {}", e)))?;

        debug!(count = envelopes.len(), "Received event batch");

        if is_validation_phase(headers) || envelopes.iter().any(|e| e.is_subscription_validation()) {
            return self.validate_subscription(envelopes, cancel).await;
        }

        let mut report = BatchReport::default();
        for envelope in envelopes {
            let outcome = self.dispatch(Arc::new(envelope), cancel).await;
            report.results.push(outcome);
        }

        Ok(DispatchResponse::Batch(report))
    }

    /// Answer the handshake, then handle any ordinary notifications that
    /// arrived in the same delivery
    async fn validate_subscription(
        &self,
        envelopes: Vec<NotificationEnvelope>,
        cancel: &CancellationToken,
    ) -> Result<DispatchResponse, ApiError> {
        let (validations, notifications): (Vec<_>, Vec<_>) = envelopes
            .into_iter()
            .partition(|e| e.is_subscription_validation());

        let mut validation_code = None;
        for envelope in validations {
            if validation_code.is_none() {
                let data = SubscriptionValidationData::deserialize(&envelope.data).map_err(|e| {
                    ApiError::BadRequest(format!("malformed subscription validation data: {}", e))
                })?;
                validation_code = data.validation_code.filter(|c| !c.is_empty());
            }
            self.cache.add(Arc::new(envelope)).await;
        }

        let code = validation_code.ok_or_else(|| {
            ApiError::BadRequest("subscription validation request carried no validation code".into())
        })?;

        for envelope in notifications {
            let outcome = self.dispatch(Arc::new(envelope), cancel).await;
            debug!(
                event_id = %outcome.id,
                status = ?outcome.status,
                "Handled notification delivered with handshake"
            );
        }

        info!("Answering Event Grid subscription validation");

        Ok(DispatchResponse::Validation(SubscriptionValidationResponse {
            validation_response: code,
        }))
    }

    /// Cache, then route, a single envelope
    ///
    /// An identifier is handled at most once successfully. A failed handling
    /// commits nothing and releases its claim, so the sender's retry is
    /// handled again.
    pub async fn dispatch(
        &self,
        envelope: Arc<NotificationEnvelope>,
        cancel: &CancellationToken,
    ) -> EnvelopeReport {
        if !self.cache.add(Arc::clone(&envelope)).await {
            debug!(event_id = %envelope.id, "Redelivery of a cached event");
        }

        if !self.cache.claim(&envelope.id).await {
            info!(event_id = %envelope.id, "Duplicate delivery, already handled");
            return EnvelopeReport::new(&envelope, EnvelopeStatus::Duplicate);
        }

        let Some(handler) = self.registry.get(&envelope.event_type) else {
            debug!(
                event_id = %envelope.id,
                event_type = %envelope.event_type,
                "No handler bound, ignoring event"
            );
            return EnvelopeReport::new(&envelope, EnvelopeStatus::Ignored);
        };

        let tx = match self.db.begin().await {
            Ok(tx) => tx,
            Err(e) => return self.fail(&envelope, IngestError::Transaction(e)).await,
        };
        let mut scope = RequestScope::new(tx, cancel.child_token());

        match handler.handle(&mut scope, &envelope).await {
            Ok(outcome) => {
                if let Err(e) = scope.tx.commit().await {
                    return self.fail(&envelope, IngestError::Storage(e)).await;
                }
                match outcome {
                    HandlerOutcome::Created(song) => EnvelopeReport {
                        song: Some(song),
                        ..EnvelopeReport::new(&envelope, EnvelopeStatus::Created)
                    },
                    HandlerOutcome::Accepted => {
                        EnvelopeReport::new(&envelope, EnvelopeStatus::Accepted)
                    }
                }
            }
            Err(err) => {
                if let Err(e) = scope.tx.rollback().await {
                    warn!(event_id = %envelope.id, error = %e, "Rollback failed");
                }
                self.fail(&envelope, err).await
            }
        }
    }

    async fn fail(&self, envelope: &NotificationEnvelope, err: IngestError) -> EnvelopeReport {
        self.cache.release(&envelope.id).await;
        self.report_failure(envelope, err)
    }

    fn report_failure(&self, envelope: &NotificationEnvelope, err: IngestError) -> EnvelopeReport {
        match err.kind() {
            ErrorKind::Server => error!(
                event_id = %envelope.id,
                event_type = %envelope.event_type,
                error = %err,
                "Event handling failed"
            ),
            ErrorKind::Client | ErrorKind::Unprocessable => warn!(
                event_id = %envelope.id,
                event_type = %envelope.event_type,
                error = %err,
                "Event rejected"
            ),
        }
        EnvelopeReport::failed(envelope, &err)
    }
}

fn is_validation_phase(headers: &HeaderMap) -> bool {
    headers
        .get(EVENT_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case(SUBSCRIPTION_VALIDATION_PHASE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventgrid::handler::EventHandler;
    use async_trait::async_trait;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        fail_with: Option<fn() -> IngestError>,
    }

    #[async_trait]
    impl EventHandler for Counting {
        fn event_type(&self) -> &'static str {
            "Test.Counted"
        }

        async fn handle(
            &self,
            _scope: &mut RequestScope,
            _envelope: &NotificationEnvelope,
        ) -> Result<HandlerOutcome, IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(make) => Err(make()),
                None => Ok(HandlerOutcome::Accepted),
            }
        }
    }

    async fn dispatcher_with(handler: Arc<Counting>) -> TypeDispatcher {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let registry = HandlerRegistry::builder().bind(handler).build();
        TypeDispatcher::new(Arc::new(EventCache::new()), registry, pool)
    }

    fn counting(fail_with: Option<fn() -> IngestError>) -> Arc<Counting> {
        Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_with,
        })
    }

    fn batch(report: DispatchResponse) -> BatchReport {
        match report {
            DispatchResponse::Batch(batch) => batch,
            other => panic!("expected batch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_routes_by_type_and_ignores_unknown() {
        let handler = counting(None);
        let dispatcher = dispatcher_with(Arc::clone(&handler)).await;
        let body = json!([
            { "id": "a", "eventType": "Test.Counted", "data": {} },
            { "id": "b", "eventType": "Test.Unknown", "data": {} },
            { "id": "c", "eventType": "", "data": {} }
        ]);

        let report = batch(
            dispatcher
                .receive(&HeaderMap::new(), body.to_string().as_bytes(), &CancellationToken::new())
                .await
                .unwrap(),
        );

        let statuses: Vec<EnvelopeStatus> = report.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![EnvelopeStatus::Accepted, EnvelopeStatus::Ignored, EnvelopeStatus::Ignored]
        );
        assert_eq!(report.status_code(), StatusCode::OK);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.cache().len().await, 3);
    }

    #[tokio::test]
    async fn test_duplicate_is_not_dispatched_twice() {
        let handler = counting(None);
        let dispatcher = dispatcher_with(Arc::clone(&handler)).await;
        let body = json!([{ "id": "a", "eventType": "Test.Counted", "data": {} }]).to_string();

        for _ in 0..2 {
            dispatcher
                .receive(&HeaderMap::new(), body.as_bytes(), &CancellationToken::new())
                .await
                .unwrap();
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_envelope_is_handled_again_on_redelivery() {
        let handler = counting(Some(|| IngestError::Cancelled));
        let dispatcher = dispatcher_with(Arc::clone(&handler)).await;
        let body = json!([{ "id": "a", "eventType": "Test.Counted", "data": {} }]).to_string();

        for _ in 0..2 {
            let report = batch(
                dispatcher
                    .receive(&HeaderMap::new(), body.as_bytes(), &CancellationToken::new())
                    .await
                    .unwrap(),
            );
            assert_eq!(report.results[0].status, EnvelopeStatus::Failed);
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.cache().len().await, 1);
    }

    #[tokio::test]
    async fn test_rejected_envelope_is_duplicate_on_redelivery() {
        let handler = counting(Some(|| IngestError::InvalidPayload("no blob URL".into())));
        let dispatcher = dispatcher_with(Arc::clone(&handler)).await;
        let body = json!([{ "id": "a", "eventType": "Test.Counted", "data": {} }]).to_string();

        let mut statuses = Vec::new();
        for _ in 0..2 {
            let report = batch(
                dispatcher
                    .receive(&HeaderMap::new(), body.as_bytes(), &CancellationToken::new())
                    .await
                    .unwrap(),
            );
            statuses.push(report.results[0].status);
        }

        assert_eq!(statuses, vec![EnvelopeStatus::Rejected, EnvelopeStatus::Duplicate]);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ignored_envelope_is_duplicate_on_redelivery() {
        let dispatcher = dispatcher_with(counting(None)).await;
        let body = json!([{ "id": "x", "eventType": "Test.Unknown", "data": {} }]).to_string();

        let mut statuses = Vec::new();
        for _ in 0..2 {
            let report = batch(
                dispatcher
                    .receive(&HeaderMap::new(), body.as_bytes(), &CancellationToken::new())
                    .await
                    .unwrap(),
            );
            statuses.push(report.results[0].status);
        }

        assert_eq!(statuses, vec![EnvelopeStatus::Ignored, EnvelopeStatus::Duplicate]);
    }

    #[tokio::test]
    async fn test_handshake_still_handles_sibling_notifications() {
        let handler = counting(None);
        let dispatcher = dispatcher_with(Arc::clone(&handler)).await;
        let body = json!([
            {
                "id": "v1",
                "eventType": "Microsoft.EventGrid.SubscriptionValidationEvent",
                "data": { "validationCode": "code-1" }
            },
            { "id": "a", "eventType": "Test.Counted", "data": {} }
        ]);

        let response = dispatcher
            .receive(&HeaderMap::new(), body.to_string().as_bytes(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            response,
            DispatchResponse::Validation(ref answer) if answer.validation_response == "code-1"
        ));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.cache().len().await, 2);
    }

    #[tokio::test]
    async fn test_handshake_without_code_handles_nothing() {
        let handler = counting(None);
        let dispatcher = dispatcher_with(Arc::clone(&handler)).await;
        let body = json!([
            { "id": "v1", "eventType": "Microsoft.EventGrid.SubscriptionValidationEvent", "data": {} },
            { "id": "a", "eventType": "Test.Counted", "data": {} }
        ]);

        assert!(dispatcher
            .receive(&HeaderMap::new(), body.to_string().as_bytes(), &CancellationToken::new())
            .await
            .is_err());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert!(dispatcher.cache().get("a").await.is_none());
    }

    #[tokio::test]
    async fn test_failure_kind_sets_status() {
        let handler = counting(Some(|| IngestError::InvalidPayload("bad".into())));
        let dispatcher = dispatcher_with(handler).await;
        let body = json!([{ "id": "a", "eventType": "Test.Counted", "data": {} }]).to_string();

        let report = batch(
            dispatcher
                .receive(&HeaderMap::new(), body.as_bytes(), &CancellationToken::new())
                .await
                .unwrap(),
        );
        assert_eq!(report.results[0].status, EnvelopeStatus::Rejected);
        assert_eq!(report.status_code(), StatusCode::BAD_REQUEST);

        let handler = counting(Some(|| IngestError::Cancelled));
        let dispatcher = dispatcher_with(handler).await;
        let report = batch(
            dispatcher
                .receive(&HeaderMap::new(), body.as_bytes(), &CancellationToken::new())
                .await
                .unwrap(),
        );
        assert_eq!(report.results[0].status, EnvelopeStatus::Failed);
        assert_eq!(report.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_handshake_echoes_code() {
        let dispatcher = dispatcher_with(counting(None)).await;
        let body = json!([{
            "id": "2d1781af-3a4c-4d7c-bd0c-e34b19da4e66",
            "eventType": "Microsoft.EventGrid.SubscriptionValidationEvent",
            "data": { "validationCode": "512d38b6-c7b8-40c8-89fe-f46f9e9622b6" }
        }]);
        let mut headers = HeaderMap::new();
        headers.insert(EVENT_TYPE_HEADER, "SubscriptionValidation".parse().unwrap());

        let response = dispatcher
            .receive(&headers, body.to_string().as_bytes(), &CancellationToken::new())
            .await
            .unwrap();

        match response {
            DispatchResponse::Validation(answer) => {
                assert_eq!(answer.validation_response, "512d38b6-c7b8-40c8-89fe-f46f9e9622b6")
            }
            other => panic!("expected validation, got {:?}", other),
        }
        assert!(dispatcher.cache().get("2D1781AF-3A4C-4D7C-BD0C-E34B19DA4E66").await.is_some());
    }

    #[tokio::test]
    async fn test_handshake_without_code_is_bad_request() {
        let dispatcher = dispatcher_with(counting(None)).await;
        let body = json!([{
            "id": "v1",
            "eventType": "Microsoft.EventGrid.SubscriptionValidationEvent",
            "data": {}
        }]);

        let err = dispatcher
            .receive(&HeaderMap::new(), body.to_string().as_bytes(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let dispatcher = dispatcher_with(counting(None)).await;
        let err = dispatcher
            .receive(&HeaderMap::new(), b"{\"id\": 1}", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(dispatcher.cache().is_empty().await);
    }

    #[test]
    fn test_status_code_precedence() {
        let envelope = NotificationEnvelope::new("a", "T", serde_json::Value::Null);
        let created = EnvelopeReport::new(&envelope, EnvelopeStatus::Created);
        let rejected = EnvelopeReport::failed(&envelope, &IngestError::InvalidPayload("x".into()));
        let invalid = EnvelopeReport::failed(
            &envelope,
            &IngestError::InvalidSong(musicvotes_common::db::ValidationErrors::default()),
        );
        let failed = EnvelopeReport::failed(&envelope, &IngestError::Cancelled);

        let report = |results: Vec<EnvelopeReport>| BatchReport { results }.status_code();

        assert_eq!(report(vec![]), StatusCode::OK);
        assert_eq!(report(vec![created.clone()]), StatusCode::CREATED);
        assert_eq!(report(vec![created.clone(), invalid.clone()]), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(report(vec![invalid.clone(), rejected.clone()]), StatusCode::BAD_REQUEST);
        assert_eq!(report(vec![rejected, failed, created]), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
