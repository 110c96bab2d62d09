//! Scratch files for in-flight ingestions
//!
//! A [`ScratchFile`] is a uniquely named temp file that is removed when the
//! guard is dropped, whichever way the owning ingestion exits.

use std::path::Path;
use tempfile::TempPath;

/// File name prefix for scratch files
pub const SCRATCH_PREFIX: &str = "musicvotes_song_";

/// Guard owning one scratch file on disk
#[derive(Debug)]
pub struct ScratchFile {
    path: TempPath,
}

impl ScratchFile {
    /// Create a new, empty scratch file in `dir`
    ///
    /// Returns the guard and an open async handle for writing. Drop the
    /// handle before reading the file back by path.
    pub fn acquire(dir: &Path) -> std::io::Result<(Self, tokio::fs::File)> {
        let (file, path) = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempfile_in(dir)?
            .into_parts();

        tracing::debug!(path = %path.display(), "Acquired scratch file");

        Ok((Self { path }, tokio::fs::File::from_std(file)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        // TempPath removes the file when it drops right after this
        tracing::debug!(path = %self.path.display(), "Releasing scratch file");
    }
}
