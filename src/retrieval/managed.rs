//! Managed-index retrieval with a fingerprint-gated sync.
//!
//! The document set is pushed to the search backend only when its
//! fingerprint differs from the one stored under
//! `search:index:<name>:fingerprint`. The fingerprint is written after the
//! backend reports the index ready, so a failed sync is retried by the next
//! run rather than silently skipped.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use compliance_harness_core::fingerprint::fingerprint_documents;
use compliance_harness_core::metrics::MetricsRecorder;
use compliance_harness_core::models::{
    DocumentMetadata, RetrievalChunk, RetrievalResult, SearchResult, TermFilter,
};
use compliance_harness_core::store::{get_json, keys, put_json, Store};

use super::Retriever;
use crate::search_backend::{SearchBackend, SearchHit};

/// What [`ManagedIndexRetriever::ensure_index`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Stored fingerprint matched; no backend call.
    Unchanged,
    /// Documents were pushed; carries the new fingerprint.
    Synced(String),
}

pub struct ManagedIndexRetriever {
    index_name: String,
    documents: Vec<DocumentMetadata>,
    backend: Arc<dyn SearchBackend>,
    store: Arc<dyn Store>,
    sync_lock: Mutex<()>,
}

impl ManagedIndexRetriever {
    pub fn new(
        index_name: String,
        documents: Vec<DocumentMetadata>,
        backend: Arc<dyn SearchBackend>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            index_name,
            documents,
            backend,
            store,
            sync_lock: Mutex::new(()),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Sync the backend index iff the document-set fingerprint changed.
    pub async fn ensure_index(&self, metrics: &MetricsRecorder) -> Result<SyncOutcome> {
        let _guard = self.sync_lock.lock().await;

        let current = fingerprint_documents(&self.documents)?;
        let key = keys::index_fingerprint(&self.index_name);
        let stored = get_json::<String>(self.store.as_ref(), &key).await?;
        if stored.as_deref() == Some(current.as_str()) {
            debug!(index = %self.index_name, "search index fingerprint unchanged");
            return Ok(SyncOutcome::Unchanged);
        }

        let meta = json!({ "index": self.index_name, "documents": self.documents.len() })
            .as_object()
            .cloned();
        let status = metrics
            .track("search-sync", meta, async {
                let status = self
                    .backend
                    .sync_index(&self.index_name, &self.documents)
                    .await?;
                if !status.is_ready() {
                    bail!("Search index did not become ready: {}", status.status);
                }
                Ok::<_, anyhow::Error>(status)
            })
            .await?;

        put_json(self.store.as_ref(), &key, &current).await?;
        info!(
            index = %self.index_name,
            status = %status.status,
            documents = self.documents.len(),
            "search index synced"
        );
        Ok(SyncOutcome::Synced(current))
    }
}

/// Map a backend hit at `position` into the common result shape.
pub fn map_hit(hit: SearchHit, position: usize) -> SearchResult {
    let meta_str = |key: &str| -> Option<String> {
        hit.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let snippet = hit
        .text
        .clone()
        .or_else(|| meta_str("snippet"))
        .unwrap_or_default()
        .trim()
        .to_string();
    let title = meta_str("title").or_else(|| hit.title.clone());
    let url = meta_str("url").or_else(|| hit.url.clone());

    SearchResult {
        id: hit
            .id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", hit.document_id, position)),
        document_id: hit.document_id,
        score: hit.score,
        reference: hit.reference,
        snippet,
        title,
        url,
        metadata: hit.metadata,
    }
}

#[async_trait]
impl Retriever for ManagedIndexRetriever {
    fn strategy(&self) -> &'static str {
        "managed"
    }

    async fn prepare(&self, metrics: &MetricsRecorder) -> Result<()> {
        self.ensure_index(metrics).await.map(|_| ())
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filters: &[TermFilter],
        metrics: &MetricsRecorder,
    ) -> Result<RetrievalResult> {
        self.ensure_index(metrics).await?;

        let meta = json!({ "index": self.index_name, "topK": top_k, "filters": filters.len() })
            .as_object()
            .cloned();
        let hits = metrics
            .track(
                "search-query",
                meta,
                self.backend.query(&self.index_name, query, top_k, filters),
            )
            .await?;

        let chunks: Vec<RetrievalChunk> = hits
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(position, hit)| map_hit(hit, position).into())
            .collect();

        Ok(RetrievalResult {
            query: query.to_string(),
            model: None,
            strategy: Some(self.strategy().to_string()),
            chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_hit_prefers_metadata_and_fills_id() {
        let hit = SearchHit {
            id: None,
            document_id: "ley-19913".into(),
            score: 0.5,
            reference: None,
            text: None,
            metadata: json!({ "snippet": "  Artículo 3  ", "title": "Ley 19.913", "url": "https://x" })
                .as_object()
                .cloned(),
            title: Some("ignored".into()),
            url: None,
        };
        let mapped = map_hit(hit, 4);
        assert_eq!(mapped.id, "ley-19913-4");
        assert_eq!(mapped.snippet, "Artículo 3");
        assert_eq!(mapped.title.as_deref(), Some("Ley 19.913"));
        assert_eq!(mapped.url.as_deref(), Some("https://x"));
    }
}
