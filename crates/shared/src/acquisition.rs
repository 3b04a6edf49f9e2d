use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server returned HTTP {0}")]
    HttpStatus(u16),
}

/// Retrieves the raw bytes behind a document's content reference.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn acquire(&self, reference: &str) -> Result<Vec<u8>, AcquisitionError>;
}

/// Downloads PDFs over HTTP. One attempt per document: a failed download
/// drops the document for this run.
pub struct PdfDownloader {
    client: Client,
}

impl PdfDownloader {
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (compatible; PaperTriage/1.0)")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ContentSource for PdfDownloader {
    async fn acquire(&self, reference: &str) -> Result<Vec<u8>, AcquisitionError> {
        debug!(url = reference, "downloading PDF");

        let response = self
            .client
            .get(reference)
            .send()
            .await
            .map_err(|e| AcquisitionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AcquisitionError::HttpStatus(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AcquisitionError::Network(format!("failed to read body: {}", e)))?;

        debug!(url = reference, bytes = bytes.len(), "PDF downloaded");
        Ok(bytes.to_vec())
    }
}
