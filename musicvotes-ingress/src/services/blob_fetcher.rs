//! Blob download
//!
//! Streams a blob into a caller-supplied writer using an anonymous HTTP(S)
//! GET. No retries: a failed download is reported once and the caller
//! discards whatever was written.

use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const USER_AGENT: &str = concat!("musicvotes-ingress/", env!("CARGO_PKG_VERSION"));

/// Blob download errors; every variant names the source URL
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unable to download {url:?}: unsupported URL scheme {scheme:?}")]
    UnsupportedScheme { url: String, scheme: String },

    #[error("unable to download {url:?}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unable to download {url:?}: server responded {status}")]
    Status { url: String, status: u16 },

    #[error("unable to write {url:?} to scratch file: {source}")]
    Write {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("download of {url:?} cancelled")]
    Cancelled { url: String },
}

/// Source of blob bytes
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    /// Copy the object at `source` into `destination`, returning bytes written
    ///
    /// Must return promptly with [`FetchError::Cancelled`] once `cancel` fires.
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        source: &Url,
        destination: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, FetchError>;
}

/// Anonymous HTTP(S) blob fetcher
#[derive(Debug, Clone)]
pub struct HttpBlobFetcher {
    client: reqwest::Client,
}

impl HttpBlobFetcher {
    /// Create fetcher whose downloads give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    async fn download(
        &self,
        source: &Url,
        destination: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, FetchError> {
        let url = source.to_string();

        let mut response = self
            .client
            .get(source.clone())
            .send()
            .await
            .map_err(|source| FetchError::Network { url: url.clone(), source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|source| FetchError::Network { url: url.clone(), source })?
        {
            destination
                .write_all(&chunk)
                .await
                .map_err(|source| FetchError::Write { url: url.clone(), source })?;
            written += chunk.len() as u64;
        }

        destination
            .flush()
            .await
            .map_err(|source| FetchError::Write { url, source })?;

        Ok(written)
    }
}

#[async_trait]
impl BlobFetcher for HttpBlobFetcher {
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        source: &Url,
        destination: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, FetchError> {
        if !matches!(source.scheme(), "http" | "https") {
            return Err(FetchError::UnsupportedScheme {
                url: source.to_string(),
                scheme: source.scheme().to_string(),
            });
        }

        debug!(url = %source, "Downloading blob");

        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(FetchError::Cancelled { url: source.to_string() });
            }
            result = self.download(source, destination) => result?,
        };

        debug!(url = %source, bytes = written, "Blob downloaded");
        Ok(written)
    }
}
