//! Ingestion services

pub mod blob_fetcher;
pub mod event_query;
pub mod ingestion;
pub mod metadata_extractor;
pub mod scratch;

pub use blob_fetcher::{BlobFetcher, FetchError, HttpBlobFetcher};
pub use event_query::{EventDetail, EventQueryService, EventSummary};
pub use ingestion::{BlobCreatedHandler, IngestionCoordinator};
pub use metadata_extractor::{ExtractError, ExtractedMetadata, MetadataExtractor};
pub use scratch::ScratchFile;
