//! Wiring: build the engine from configuration and adapters.
//!
//! [`Engine::open`] connects the SQLite store and the HTTP adapters named by
//! the config. [`Engine::build`] takes the adapters explicitly, which is how
//! tests substitute in-memory fakes.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use compliance_harness_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::documents::HttpDocumentFetcher;
use crate::inference::create_inference;
use crate::migrate;
use crate::pipeline::Pipeline;
use crate::retrieval::{create_retriever, RetrievalBackends, Retriever};
use crate::run::RunCoordinator;
use crate::search_backend::{HttpSearchBackend, SearchBackend};
use crate::sqlite_store::SqliteStore;
use crate::stages::default_stages;

const DOCUMENT_FETCH_TIMEOUT_SECS: u64 = 120;

pub struct Engine {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub retriever: Arc<dyn Retriever>,
    pub coordinator: Arc<RunCoordinator>,
}

impl Engine {
    /// Engine backed by the configured SQLite database and HTTP services.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));

        let search: Option<Arc<dyn SearchBackend>> = match config.search.url {
            Some(_) => Some(Arc::new(HttpSearchBackend::new(&config.search)?)),
            None => None,
        };

        let backends = RetrievalBackends {
            store,
            inference: create_inference(&config.inference)?,
            fetcher: Arc::new(HttpDocumentFetcher::new(DOCUMENT_FETCH_TIMEOUT_SECS)?),
            search,
        };
        Self::build(config, backends)
    }

    pub fn build(config: &Config, backends: RetrievalBackends) -> Result<Self> {
        let store = backends.store.clone();
        let inference = backends.inference.clone();
        let retriever = create_retriever(config, backends)?;

        let stages = default_stages(config, inference, retriever.clone());
        let pipeline = Arc::new(Pipeline::new(
            stages,
            Duration::from_secs(config.pipeline.stage_timeout_secs),
        ));

        Ok(Self {
            config: Arc::new(config.clone()),
            coordinator: Arc::new(RunCoordinator::new(store.clone(), pipeline)),
            store,
            retriever,
        })
    }
}
