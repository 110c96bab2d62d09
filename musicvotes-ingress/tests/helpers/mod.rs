//! Test Helper Utilities
//!
//! Shared fixtures for musicvotes-ingress integration tests: an in-memory
//! song store, a canned blob fetcher and ID3 fixture builders.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use id3::{Tag, TagLike, Version};
use musicvotes_ingress::eventgrid::EventCache;
use musicvotes_ingress::services::{BlobFetcher, FetchError, IngestionCoordinator};
use musicvotes_ingress::{build_router, default_registry, AppState};
use reqwest::Url;
use serde_json::{json, Value};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

pub const BLOB_BASE: &str = "https://songs.blob.test/uploads";

/// Blob fetcher serving canned bodies; unknown URLs answer 404
#[derive(Default)]
pub struct StaticBlobFetcher {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    calls: AtomicUsize,
    cancel_after_fetch: AtomicBool,
}

impl StaticBlobFetcher {
    pub fn insert(&self, url: &str, body: Vec<u8>) {
        self.blobs.lock().unwrap().insert(url.to_string(), body);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Abandon the delivery right after the blob has been written
    pub fn cancel_after_fetch(&self) {
        self.cancel_after_fetch.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobFetcher for StaticBlobFetcher {
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        source: &Url,
        destination: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled {
                url: source.to_string(),
            });
        }

        let body = self.blobs.lock().unwrap().get(source.as_str()).cloned();
        let Some(body) = body else {
            return Err(FetchError::Status {
                url: source.to_string(),
                status: 404,
            });
        };

        destination
            .write_all(&body)
            .await
            .map_err(|source_err| FetchError::Write {
                url: source.to_string(),
                source: source_err,
            })?;
        destination
            .flush()
            .await
            .map_err(|source_err| FetchError::Write {
                url: source.to_string(),
                source: source_err,
            })?;

        if self.cancel_after_fetch.load(Ordering::SeqCst) {
            cancel.cancel();
        }

        Ok(body.len() as u64)
    }
}

/// Running app plus the handles tests inspect
pub struct TestApp {
    pub router: Router,
    pub pool: SqlitePool,
    pub fetcher: Arc<StaticBlobFetcher>,
    pub scratch: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let pool = create_test_pool().await;
        let fetcher = Arc::new(StaticBlobFetcher::default());
        let scratch = TempDir::new().expect("Failed to create scratch dir");

        let coordinator = Arc::new(IngestionCoordinator::new(
            fetcher.clone(),
            scratch.path().to_path_buf(),
        ));
        let state = AppState::new(
            pool.clone(),
            Arc::new(EventCache::new()),
            default_registry(coordinator),
        );

        Self {
            router: build_router(state),
            pool,
            fetcher,
            scratch,
        }
    }

    /// Send a request and decode the JSON body (Null when empty)
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Request failed");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("Response is not JSON")
        };

        (status, body)
    }

    pub async fn deliver(&self, events: Value) -> (StatusCode, Value) {
        self.send(notification_request(&events)).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Files currently left in the scratch directory
    pub fn scratch_entries(&self) -> usize {
        scratch_entries(self.scratch.path())
    }
}

pub fn scratch_entries(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .expect("Failed to read scratch dir")
        .count()
}

/// In-memory store; a single connection keeps every query on one database
pub async fn create_test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    musicvotes_common::db::init_schema(&pool)
        .await
        .expect("Failed to initialize schema");

    pool
}

pub fn notification_request(events: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/ingress")
        .header("content-type", "application/json")
        .header("aeg-event-type", "Notification")
        .body(Body::from(events.to_string()))
        .unwrap()
}

pub fn blob_url(name: &str) -> String {
    format!("{}/{}", BLOB_BASE, name)
}

pub fn blob_created_event(id: &str, url: &str) -> Value {
    json!({
        "id": id,
        "eventType": "Microsoft.Storage.BlobCreated",
        "topic": "/subscriptions/test/resourceGroups/music/providers/Microsoft.Storage/storageAccounts/songs",
        "subject": "/blobServices/default/containers/uploads/blobs/song.mp3",
        "eventTime": "2024-05-01T12:00:00Z",
        "dataVersion": "",
        "metadataVersion": "1",
        "data": {
            "api": "PutBlob",
            "contentType": "audio/mpeg",
            "contentLength": 1024,
            "blobType": "BlockBlob",
            "url": url
        }
    })
}

/// ID3v2.4 tag followed by a few bytes of MPEG frame sync
pub fn tagged_song(title: Option<&str>, artist: Option<&str>) -> Vec<u8> {
    let mut tag = Tag::new();
    tag.set_album("Fixtures");
    if let Some(title) = title {
        tag.set_title(title);
    }
    if let Some(artist) = artist {
        tag.set_artist(artist);
    }

    let mut bytes = Vec::new();
    tag.write_to(&mut bytes, Version::Id3v24)
        .expect("Failed to write ID3 tag");
    bytes.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x64, 0x00, 0x00, 0x00, 0x00]);
    bytes
}
