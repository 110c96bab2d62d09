//! Error types for musicvotes-ingress
//!
//! Failures are classified once, where they happen, into client or server
//! kind (`IngestError::kind`). Only the HTTP boundary turns a kind into a
//! status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use musicvotes_common::db::{StoreError, ValidationErrors};
use serde_json::json;
use thiserror::Error;

use crate::services::blob_fetcher::FetchError;
use crate::services::metadata_extractor::ExtractError;

/// Who is responsible for a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input (400)
    Client,
    /// Well-formed input rejected by record validation (422)
    Unprocessable,
    /// Infrastructure failure on our side (500)
    Server,
}

impl ErrorKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::Client => StatusCode::BAD_REQUEST,
            ErrorKind::Unprocessable => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Server => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Failure of a single envelope's handling
#[derive(Debug, Error)]
pub enum IngestError {
    /// Event data does not have the shape the handler expects
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    /// Could not create the scratch file
    #[error("unable to save blob for ingestion: {0}")]
    Scratch(#[source] std::io::Error),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Metadata extraction task died
    #[error("metadata extraction aborted: {0}")]
    ExtractionAborted(String),

    /// Assembled song failed validation
    #[error("song is invalid: {0}")]
    InvalidSong(ValidationErrors),

    /// Could not open a transaction for this envelope
    #[error("no transaction available: {0}")]
    Transaction(#[source] sqlx::Error),

    /// Insert or commit failed
    #[error("unable to persist song: {0}")]
    Storage(#[source] sqlx::Error),

    /// The delivery was abandoned before ingestion finished
    #[error("ingestion cancelled")]
    Cancelled,
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::InvalidPayload(_) => ErrorKind::Client,
            IngestError::Extract(e) if e.is_client_error() => ErrorKind::Client,
            IngestError::InvalidSong(_) => ErrorKind::Unprocessable,
            IngestError::Scratch(_)
            | IngestError::Fetch(_)
            | IngestError::Extract(_)
            | IngestError::ExtractionAborted(_)
            | IngestError::Transaction(_)
            | IngestError::Storage(_)
            | IngestError::Cancelled => ErrorKind::Server,
        }
    }
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(errors) => IngestError::InvalidSong(errors),
            StoreError::Database(e) => IngestError::Storage(e),
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
