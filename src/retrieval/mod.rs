//! Retrieval engine: two interchangeable strategies behind one contract.
//!
//! ```text
//!                 ┌──────────────────────┐
//!   query ──────▶ │      Retriever       │ ──────▶ RetrievalResult
//!                 └──────────┬───────────┘         (ranked evidence)
//!                ┌───────────┴────────────┐
//!                ▼                        ▼
//!     ┌────────────────────┐   ┌────────────────────┐
//!     │ LocalIndexRetriever│   │ManagedIndexRetriever│
//!     │ chunk+embed+cosine │   │ fingerprint-gated   │
//!     │ cache per document │   │ sync + backend query│
//!     └────────────────────┘   └────────────────────┘
//! ```
//!
//! Both strategies keep their derived index consistent with the configured
//! document set through content fingerprints stored in the [`Store`], and
//! both report every external call through the run's
//! [`MetricsRecorder`].

pub mod local;
pub mod managed;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use compliance_harness_core::metrics::MetricsRecorder;
use compliance_harness_core::models::{RetrievalResult, TermFilter};
use compliance_harness_core::store::Store;

use crate::config::{Config, RetrievalStrategy};
use crate::documents::{DocumentFetcher, DocumentRepository};
use crate::inference::InferenceClient;
use crate::search_backend::SearchBackend;

pub use local::LocalIndexRetriever;
pub use managed::{ManagedIndexRetriever, SyncOutcome};

/// The "retrieve(query) → ranked evidence" contract.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Short label recorded in results and reasoning (`"local"` / `"managed"`).
    fn strategy(&self) -> &'static str;

    /// Bring the derived index up to date with the document set.
    ///
    /// Called implicitly by [`retrieve`](Retriever::retrieve); exposed so the
    /// CLI can warm the index ahead of the first question.
    async fn prepare(&self, metrics: &MetricsRecorder) -> Result<()>;

    /// Best `top_k` pieces of evidence for `query`, score descending,
    /// restricted to documents satisfying every filter.
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filters: &[TermFilter],
        metrics: &MetricsRecorder,
    ) -> Result<RetrievalResult>;
}

/// External collaborators the retrieval engine may need.
#[derive(Clone)]
pub struct RetrievalBackends {
    pub store: Arc<dyn Store>,
    pub inference: Arc<dyn InferenceClient>,
    pub fetcher: Arc<dyn DocumentFetcher>,
    /// Required for [`RetrievalStrategy::Managed`].
    pub search: Option<Arc<dyn SearchBackend>>,
}

/// Build the retriever selected by `config.retrieval.strategy`.
pub fn create_retriever(config: &Config, backends: RetrievalBackends) -> Result<Arc<dyn Retriever>> {
    match config.retrieval.strategy {
        RetrievalStrategy::Local => {
            let repository = DocumentRepository::new(backends.store.clone(), backends.fetcher);
            Ok(Arc::new(LocalIndexRetriever::new(
                config.documents.clone(),
                repository,
                backends.store,
                backends.inference,
                config.inference.embedding_model.clone(),
                config.chunking.max_chars,
            )))
        }
        RetrievalStrategy::Managed => {
            let search = backends.search.ok_or_else(|| {
                anyhow::anyhow!("managed retrieval requires a search backend")
            })?;
            Ok(Arc::new(ManagedIndexRetriever::new(
                config.retrieval.index_name.clone(),
                config.documents.clone(),
                search,
                backends.store,
            )))
        }
    }
}
