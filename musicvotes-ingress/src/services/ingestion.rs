//! Blob-created ingestion
//!
//! Turns one `Microsoft.Storage.BlobCreated` notification into a persisted
//! song: decode → scratch → fetch → extract → assemble → persist. Every
//! failure is terminal for the envelope; the scratch file is released on
//! every exit path by its guard.

use async_trait::async_trait;
use musicvotes_common::db::{self, NewSong, Song};
use reqwest::Url;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use super::blob_fetcher::BlobFetcher;
use super::metadata_extractor::{ExtractedMetadata, MetadataExtractor};
use super::scratch::ScratchFile;
use crate::error::IngestError;
use crate::eventgrid::envelope::{NotificationEnvelope, BLOB_CREATED};
use crate::eventgrid::handler::{EventHandler, HandlerOutcome, RequestScope};

/// Title used when the tag has none
pub const UNKNOWN_TITLE: &str = "Unknown Title";

/// Artist used when the tag has none
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// `data` of a `Microsoft.Storage.BlobCreated` event
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobCreatedPayload {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content_length: Option<u64>,
    #[serde(default)]
    pub blob_type: Option<String>,
    #[serde(default)]
    pub e_tag: Option<String>,
}

impl BlobCreatedPayload {
    pub fn decode(envelope: &NotificationEnvelope) -> Result<Self, IngestError> {
        Self::deserialize(&envelope.data)
            .map_err(|e| IngestError::InvalidPayload(format!("malformed blob-created data: {}", e)))
    }

    /// The blob URL, which must be present, absolute and http(s)
    pub fn source_url(&self) -> Result<Url, IngestError> {
        let raw = self
            .url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| IngestError::InvalidPayload("no blob URL was present".to_string()))?;

        let url = Url::parse(raw).map_err(|_| {
            IngestError::InvalidPayload(format!("{:?} is not a well formatted URL", raw))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(IngestError::InvalidPayload(format!(
                "{:?} is not an http(s) URL",
                raw
            )));
        }

        Ok(url)
    }
}

/// Build the song record, substituting placeholders for missing tags
pub fn assemble_song(metadata: ExtractedMetadata, source: &Url) -> NewSong {
    NewSong::new(
        metadata.title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
        metadata.artist.unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
        source.to_string(),
    )
}

/// Runs the ingestion state machine for one envelope
pub struct IngestionCoordinator {
    fetcher: Arc<dyn BlobFetcher>,
    extractor: MetadataExtractor,
    scratch_dir: PathBuf,
}

impl IngestionCoordinator {
    pub fn new(fetcher: Arc<dyn BlobFetcher>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            extractor: MetadataExtractor::new(),
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn scratch_dir(&self) -> &std::path::Path {
        &self.scratch_dir
    }

    /// Ingest the blob named by `envelope` and persist it through `scope.tx`
    ///
    /// Nothing is fetched when the payload is unusable, and nothing is
    /// persisted once the delivery has been cancelled.
    pub async fn handle_blob_created(
        &self,
        scope: &mut RequestScope,
        envelope: &NotificationEnvelope,
    ) -> Result<Song, IngestError> {
        let payload = BlobCreatedPayload::decode(envelope)?;
        let source = payload.source_url()?;
        scope.ensure_active()?;

        debug!(event_id = %envelope.id, url = %source, "Ingesting blob");

        let (scratch, mut file) =
            ScratchFile::acquire(&self.scratch_dir).map_err(IngestError::Scratch)?;

        let bytes = self.fetcher.fetch(&scope.cancel, &source, &mut file).await?;
        // Close the write handle before the extractor reopens the file by path
        drop(file);
        debug!(event_id = %envelope.id, bytes, "Blob stored in scratch file");

        scope.ensure_active()?;
        let metadata = self.extract(&scratch).await?;

        let song = assemble_song(metadata, &source);
        song.validate().map_err(IngestError::InvalidSong)?;

        scope.ensure_active()?;
        let created = db::songs::validate_and_create(&mut *scope.tx, &song).await?;

        info!(
            event_id = %envelope.id,
            song_id = %created.id,
            title = %created.title,
            artist = %created.artist,
            "Song ingested"
        );

        Ok(created)
    }

    /// Tag parsing is blocking file I/O; run it off the async workers
    async fn extract(&self, scratch: &ScratchFile) -> Result<ExtractedMetadata, IngestError> {
        let extractor = self.extractor;
        let path = scratch.path().to_path_buf();

        let metadata = tokio::task::spawn_blocking(move || extractor.extract(&path))
            .await
            .map_err(|e| IngestError::ExtractionAborted(e.to_string()))??;

        Ok(metadata)
    }
}

/// Binds [`IngestionCoordinator`] to `Microsoft.Storage.BlobCreated`
pub struct BlobCreatedHandler {
    coordinator: Arc<IngestionCoordinator>,
}

impl BlobCreatedHandler {
    pub fn new(coordinator: Arc<IngestionCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl EventHandler for BlobCreatedHandler {
    fn event_type(&self) -> &'static str {
        BLOB_CREATED
    }

    async fn handle(
        &self,
        scope: &mut RequestScope,
        envelope: &NotificationEnvelope,
    ) -> Result<HandlerOutcome, IngestError> {
        self.coordinator
            .handle_blob_created(scope, envelope)
            .await
            .map(HandlerOutcome::Created)
    }
}
