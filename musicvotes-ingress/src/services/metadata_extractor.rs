//! Audio metadata extraction
//!
//! Reads the ID3 tag of a downloaded song, preferring ID3v2 and falling back
//! to an ID3v1 trailer. Title and artist are both
//! optional in a valid tag; substituting placeholders for missing values is
//! the caller's decision.

use id3::TagLike;
use std::path::Path;
use thiserror::Error;

/// Metadata extraction errors
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Content is not an ID3-tagged audio file
    #[error("unable to parse {path} as an audio file: {reason}")]
    UnrecognizedFormat { path: String, reason: String },

    /// File could not be read
    #[error("unable to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    /// Unrecognized content is the uploader's fault, I/O trouble is ours
    pub fn is_client_error(&self) -> bool {
        matches!(self, ExtractError::UnrecognizedFormat { .. })
    }
}

/// Tag fields read from a song
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
}

/// ID3 metadata extractor
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataExtractor;

impl MetadataExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Read title and artist from the tag of the file at `path`
    ///
    /// The file handle is closed before this returns.
    pub fn extract(&self, path: &Path) -> Result<ExtractedMetadata, ExtractError> {
        let tag = id3::v1v2::read_from_path(path).map_err(|err| {
            let reason = err.to_string();
            match err.kind {
                // Truncated content or a file too short for a v1 trailer
                id3::ErrorKind::Io(source)
                    if matches!(
                        source.kind(),
                        std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::InvalidInput
                    ) =>
                {
                    ExtractError::UnrecognizedFormat {
                        path: path.display().to_string(),
                        reason,
                    }
                }
                id3::ErrorKind::Io(source) => ExtractError::Io {
                    path: path.display().to_string(),
                    source,
                },
                _ => ExtractError::UnrecognizedFormat {
                    path: path.display().to_string(),
                    reason,
                },
            }
        })?;

        let metadata = ExtractedMetadata {
            title: non_blank(tag.title()),
            artist: non_blank(tag.artist()),
        };

        tracing::debug!(
            file = %path.display(),
            title = ?metadata.title,
            artist = ?metadata.artist,
            "Extracted metadata"
        );

        Ok(metadata)
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
