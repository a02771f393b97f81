//! Local-index retrieval: chunk, embed, cache, rank.
//!
//! For every configured document the retriever keeps a chunk set with
//! embeddings under `doc:<id>:chunks`, stamped with a fingerprint of the
//! inputs it was built from (document description, chunk threshold,
//! embedding model). A mismatching fingerprint triggers a rebuild; chunks
//! whose text hash is unchanged keep their previous embedding.
//!
//! At query time the question is embedded once and every cached chunk of
//! the documents passing the query's filters is scored by cosine similarity.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use compliance_harness_core::chunk::chunk_document;
use compliance_harness_core::embedding::rank_chunks;
use compliance_harness_core::fingerprint::fingerprint;
use compliance_harness_core::metrics::MetricsRecorder;
use compliance_harness_core::models::{DocumentChunk, DocumentMetadata, RetrievalResult, TermFilter};
use compliance_harness_core::store::{get_json, keys, put_json, Store};

use super::Retriever;
use crate::documents::DocumentRepository;
use crate::inference::{embed_one, InferenceClient};
use crate::locks::KeyedLocks;

/// Everything a cached chunk set depends on.
#[derive(Serialize)]
struct IndexInputs<'a> {
    document: &'a DocumentMetadata,
    max_chars: usize,
    embedding_model: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedChunks {
    fingerprint: String,
    embedding_model: String,
    chunks: Vec<DocumentChunk>,
}

pub struct LocalIndexRetriever {
    documents: Vec<DocumentMetadata>,
    repository: DocumentRepository,
    store: Arc<dyn Store>,
    inference: Arc<dyn InferenceClient>,
    embedding_model: String,
    max_chars: usize,
    locks: KeyedLocks,
}

impl LocalIndexRetriever {
    pub fn new(
        documents: Vec<DocumentMetadata>,
        repository: DocumentRepository,
        store: Arc<dyn Store>,
        inference: Arc<dyn InferenceClient>,
        embedding_model: String,
        max_chars: usize,
    ) -> Self {
        Self {
            documents,
            repository,
            store,
            inference,
            embedding_model,
            max_chars,
            locks: KeyedLocks::new(),
        }
    }

    /// Embedded chunks for `doc`, rebuilding the cache when its inputs changed.
    pub async fn document_chunks(
        &self,
        doc: &DocumentMetadata,
        metrics: &MetricsRecorder,
    ) -> Result<Vec<DocumentChunk>> {
        let key = keys::document_chunks(&doc.id);
        let _guard = self.locks.lock(&key).await;

        let current = fingerprint(&IndexInputs {
            document: doc,
            max_chars: self.max_chars,
            embedding_model: &self.embedding_model,
        })?;

        let cached = get_json::<CachedChunks>(self.store.as_ref(), &key).await?;
        if let Some(cached) = &cached {
            if cached.fingerprint == current {
                debug!(document = %doc.id, chunks = cached.chunks.len(), "chunk cache hit");
                return Ok(cached.chunks.clone());
            }
        }

        let reusable: HashMap<String, Vec<f32>> = cached
            .filter(|c| c.embedding_model == self.embedding_model)
            .map(|c| {
                c.chunks
                    .into_iter()
                    .filter(|chunk| !chunk.embedding.is_empty())
                    .map(|chunk| (chunk.hash, chunk.embedding))
                    .collect()
            })
            .unwrap_or_default();

        let text = self.repository.text(doc, metrics).await?;
        let mut chunks = chunk_document(&doc.id, &text, self.max_chars);

        let mut embedded = 0usize;
        for chunk in &mut chunks {
            if let Some(vector) = reusable.get(&chunk.hash) {
                chunk.embedding = vector.clone();
                continue;
            }
            let meta = json!({ "documentId": doc.id, "chunkId": chunk.id })
                .as_object()
                .cloned();
            let vector = metrics
                .track(
                    "embed-chunk",
                    meta,
                    embed_one(self.inference.as_ref(), &self.embedding_model, &chunk.text),
                )
                .await?;
            if vector.is_empty() {
                bail!("Empty embedding for chunk {}", chunk.id);
            }
            chunk.embedding = vector;
            embedded += 1;
        }

        info!(
            document = %doc.id,
            chunks = chunks.len(),
            embedded,
            reused = chunks.len() - embedded,
            "rebuilt document chunk index"
        );

        put_json(
            self.store.as_ref(),
            &key,
            &CachedChunks {
                fingerprint: current,
                embedding_model: self.embedding_model.clone(),
                chunks: chunks.clone(),
            },
        )
        .await?;

        Ok(chunks)
    }
}

#[async_trait]
impl Retriever for LocalIndexRetriever {
    fn strategy(&self) -> &'static str {
        "local"
    }

    async fn prepare(&self, metrics: &MetricsRecorder) -> Result<()> {
        for doc in &self.documents {
            self.document_chunks(doc, metrics).await?;
        }
        Ok(())
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filters: &[TermFilter],
        metrics: &MetricsRecorder,
    ) -> Result<RetrievalResult> {
        let mut result = RetrievalResult {
            query: query.to_string(),
            model: Some(self.embedding_model.clone()),
            strategy: Some(self.strategy().to_string()),
            chunks: Vec::new(),
        };

        let mut all = Vec::new();
        let mut titles: HashMap<String, String> = HashMap::new();
        for doc in self.documents.iter().filter(|d| d.matches(filters)) {
            all.extend(self.document_chunks(doc, metrics).await?);
            titles.insert(doc.id.clone(), doc.title.clone());
        }
        if titles.is_empty() {
            debug!(filters = filters.len(), "no document passes the query filters");
            return Ok(result);
        }

        let meta = json!({ "model": self.embedding_model }).as_object().cloned();
        let query_vec = metrics
            .track(
                "embed-question",
                meta,
                embed_one(self.inference.as_ref(), &self.embedding_model, query),
            )
            .await?;

        result.chunks = rank_chunks(&query_vec, &all, top_k)
            .into_iter()
            .map(|ranked| {
                let title = titles
                    .get(&ranked.chunk.document_id)
                    .cloned()
                    .unwrap_or_default();
                ranked.into_evidence(&title)
            })
            .collect();

        Ok(result)
    }
}
