//! Document fetch, text extraction and the text cache.
//!
//! [`DocumentFetcher`] is the external "fetch + extract" capability. The
//! HTTP implementation downloads a URL and extracts PDF text with
//! `pdf-extract` (anything else must be UTF-8). [`DocumentRepository`]
//! sits in front of it and caches extracted text in the [`Store`] under
//! `doc:<id>:text`, keyed to the URL it came from.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use compliance_harness_core::metrics::MetricsRecorder;
use compliance_harness_core::models::DocumentMetadata;
use compliance_harness_core::store::{get_json, keys, put_json, Store};

/// The "document fetch" capability.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;

    async fn extract_text(&self, bytes: &[u8]) -> Result<String>;
}

/// Fetches documents over HTTP(S).
pub struct HttpDocumentFetcher {
    client: reqwest::Client,
}

impl HttpDocumentFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("Failed to download {}: {}", url, status);
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn extract_text(&self, bytes: &[u8]) -> Result<String> {
        let owned = bytes.to_vec();
        // pdf-extract is CPU-bound and synchronous.
        tokio::task::spawn_blocking(move || extract_text(&owned))
            .await
            .map_err(|e| anyhow!("Text extraction task failed: {}", e))?
    }
}

/// Extract plain text from PDF or UTF-8 bytes, normalizing page breaks to newlines.
pub fn extract_text(bytes: &[u8]) -> Result<String> {
    let raw = if bytes.starts_with(b"%PDF") {
        pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| anyhow!("PDF extraction failed: {}", e))?
    } else {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| anyhow!("Unsupported document: not a PDF and not valid UTF-8"))?
    };
    Ok(raw.replace("\r\n", "\n").replace(['\r', '\u{c}'], "\n"))
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedText {
    url: String,
    text: String,
}

/// Cached access to document text.
pub struct DocumentRepository {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn DocumentFetcher>,
}

impl DocumentRepository {
    pub fn new(store: Arc<dyn Store>, fetcher: Arc<dyn DocumentFetcher>) -> Self {
        Self { store, fetcher }
    }

    /// Text of `doc`, from cache when it was extracted from the same URL.
    ///
    /// A miss records one `fetch-document` and one `extract-text` metric.
    pub async fn text(&self, doc: &DocumentMetadata, metrics: &MetricsRecorder) -> Result<String> {
        let key = keys::document_text(&doc.id);
        if let Some(cached) = get_json::<CachedText>(self.store.as_ref(), &key).await? {
            if cached.url == doc.url {
                debug!(document = %doc.id, "document text cache hit");
                return Ok(cached.text);
            }
        }

        let meta = json!({ "documentId": doc.id, "url": doc.url })
            .as_object()
            .cloned();
        let bytes = metrics
            .track("fetch-document", meta, self.fetcher.fetch(&doc.url))
            .await?;

        let meta = json!({ "documentId": doc.id }).as_object().cloned();
        let text = metrics
            .track("extract-text", meta, self.fetcher.extract_text(&bytes))
            .await?;

        put_json(
            self.store.as_ref(),
            &key,
            &CachedText {
                url: doc.url.clone(),
                text: text.clone(),
            },
        )
        .await?;
        Ok(text)
    }
}
