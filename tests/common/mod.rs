//! Shared fakes for the integration tests.
#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use compliance_harness::app::Engine;
use compliance_harness::config::{load_config, Config};
use compliance_harness::documents::{extract_text, DocumentFetcher};
use compliance_harness::inference::{ChatMessage, InferenceClient};
use compliance_harness::retrieval::RetrievalBackends;
use compliance_harness::search_backend::{IndexStatus, SearchBackend, SearchHit};
use compliance_harness_core::models::{DocumentMetadata, TermFilter};
use compliance_harness_core::store::memory::InMemoryStore;
use compliance_harness_core::store::Store;

pub const CHAT_MODEL: &str = "chat-test";
pub const SYNTH_MODEL: &str = "synth-test";
pub const EMBED_MODEL: &str = "embed-test";

pub const UAF_URL: &str = "https://docs.test/ley-19913.pdf";
pub const CONSUMER_URL: &str = "https://docs.test/ley-19496.pdf";

pub const QUESTION: &str = "¿Qué debe reportar una inmobiliaria a la UAF?";

pub const QUESTION_JSON: &str = r#"```json
{
  "normalized_question": "Obligaciones de reporte ante la UAF para inmobiliarias",
  "summary": "Reportes de operaciones sospechosas",
  "focus_areas": ["lavado de activos"],
  "assumptions": ["La inmobiliaria es sujeto obligado"],
  "plan": ["Buscar artículo 3 de la Ley 19.913", "Extraer obligaciones"]
}
```"#;

pub const ANSWER_JSON: &str = r#"{
  "summary": "La inmobiliaria debe reportar operaciones sospechosas a la UAF.",
  "obligations": [{
    "id": "ob-1",
    "description": "Reportar operaciones sospechosas a la UAF",
    "source": { "documentId": "ley-19913", "reference": "Art. 3" },
    "rationale": "Las inmobiliarias son sujetos obligados",
    "actions": ["Designar oficial de cumplimiento"],
    "targets": [{ "name": "Inmobiliaria Andes", "confidence": 0.9, "justification": "Corredora de propiedades" }],
    "priority": "high"
  }]
}"#;

/// Deterministic embedding: one axis per topic plus a small bias.
pub fn embed_text(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    vec![
        if lower.contains("uaf") { 1.0 } else { 0.0 },
        if lower.contains("consumidor") { 1.0 } else { 0.0 },
        0.1,
    ]
}

#[derive(Clone)]
pub enum Reply {
    Text(String),
    Fail(String),
    Slow(Duration, String),
}

pub struct ScriptedInference {
    replies: HashMap<String, Reply>,
    calls: Mutex<Vec<String>>,
    pub embeds: AtomicUsize,
}

impl ScriptedInference {
    pub fn new() -> Self {
        let mut replies = HashMap::new();
        replies.insert(CHAT_MODEL.to_string(), Reply::Text(QUESTION_JSON.to_string()));
        replies.insert(SYNTH_MODEL.to_string(), Reply::Text(ANSWER_JSON.to_string()));
        Self {
            replies,
            calls: Mutex::new(Vec::new()),
            embeds: AtomicUsize::new(0),
        }
    }

    pub fn with_reply(mut self, model: &str, reply: Reply) -> Self {
        self.replies.insert(model.to_string(), reply);
        self
    }

    pub fn calls_for(&self, model: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|m| *m == model).count()
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn complete(&self, model: &str, _messages: &[ChatMessage]) -> Result<String> {
        self.calls.lock().unwrap().push(model.to_string());
        match self.replies.get(model).cloned() {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(message)) => bail!("{}", message),
            Some(Reply::Slow(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => bail!("no scripted reply for model {}", model),
        }
    }

    async fn embed(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embeds.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }
}

pub struct StaticFetcher {
    texts: HashMap<String, String>,
    pub fetches: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        let mut texts = HashMap::new();
        texts.insert(
            UAF_URL.to_string(),
            "Artículo 3\nLos sujetos obligados deberán reportar a la UAF\ntoda operación sospechosa."
                .to_string(),
        );
        texts.insert(
            CONSUMER_URL.to_string(),
            "Artículo 1\nDerechos del consumidor en contratos de adhesión.".to_string(),
        );
        Self {
            texts,
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DocumentFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.texts.get(url) {
            Some(text) => Ok(text.clone().into_bytes()),
            None => bail!("Failed to download {}: 404 Not Found", url),
        }
    }

    async fn extract_text(&self, bytes: &[u8]) -> Result<String> {
        extract_text(bytes)
    }
}

pub struct FakeSearch {
    pub syncs: AtomicUsize,
    pub queries: AtomicUsize,
    /// Filters received by each query, in call order.
    pub filters: Mutex<Vec<Vec<TermFilter>>>,
    pub status: Mutex<String>,
    pub fail_queries: bool,
}

impl FakeSearch {
    pub fn new() -> Self {
        Self {
            syncs: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
            filters: Mutex::new(Vec::new()),
            status: Mutex::new("ready".to_string()),
            fail_queries: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_queries: true,
            ..Self::new()
        }
    }

    pub fn syncs(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    pub fn received_filters(&self) -> Vec<Vec<TermFilter>> {
        self.filters.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchBackend for FakeSearch {
    async fn sync_index(&self, index: &str, documents: &[DocumentMetadata]) -> Result<IndexStatus> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(IndexStatus {
            index: index.to_string(),
            status: self.status.lock().unwrap().clone(),
            documents_ingested: Some(documents.len() as u64),
        })
    }

    async fn query(
        &self,
        _index: &str,
        _text: &str,
        top_k: usize,
        filters: &[TermFilter],
    ) -> Result<Vec<SearchHit>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.filters.lock().unwrap().push(filters.to_vec());
        if self.fail_queries {
            bail!("search backend unavailable");
        }
        let hit = SearchHit {
            id: None,
            document_id: "ley-19913".to_string(),
            score: 0.91,
            reference: Some("Art. 3".to_string()),
            text: Some("  Los sujetos obligados deberán reportar a la UAF  ".to_string()),
            metadata: None,
            title: Some("Ley 19.913".to_string()),
            url: Some(UAF_URL.to_string()),
        };
        Ok(vec![hit; top_k.min(1)])
    }
}

/// Write a config for `strategy` into `dir` and load it. `extra` is appended verbatim.
pub fn write_config(dir: &Path, strategy: &str, extra: &str) -> Config {
    let content = format!(
        r#"[db]
path = "{db}"

[retrieval]
strategy = "{strategy}"
top_k = 1
index_name = "compliance-test"

[inference]
chat_model = "{chat}"
synthesis_model = "{synth}"
embedding_model = "{embed}"

[search]
url = "http://search.test"

{extra}

[[documents]]
id = "ley-19913"
title = "Ley 19.913"
url = "{uaf}"
topics = ["uaf"]

[[documents]]
id = "ley-19496"
title = "Ley 19.496"
url = "{consumer}"
"#,
        db = dir.join("cmpl.sqlite").display(),
        strategy = strategy,
        chat = CHAT_MODEL,
        synth = SYNTH_MODEL,
        embed = EMBED_MODEL,
        extra = extra,
        uaf = UAF_URL,
        consumer = CONSUMER_URL,
    );
    let path = dir.join("cmpl.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    load_config(&path).unwrap()
}

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<InMemoryStore>,
    pub inference: Arc<ScriptedInference>,
    pub fetcher: Arc<StaticFetcher>,
    pub search: Arc<FakeSearch>,
}

pub fn harness(config: &Config, inference: ScriptedInference, search: FakeSearch) -> Harness {
    harness_with_store(config, Arc::new(InMemoryStore::new()), inference, search)
}

pub fn harness_with_store(
    config: &Config,
    store: Arc<InMemoryStore>,
    inference: ScriptedInference,
    search: FakeSearch,
) -> Harness {
    let inference = Arc::new(inference);
    let fetcher = Arc::new(StaticFetcher::new());
    let search = Arc::new(search);
    let engine = Engine::build(
        config,
        RetrievalBackends {
            store: store.clone() as Arc<dyn Store>,
            inference: inference.clone(),
            fetcher: fetcher.clone(),
            search: Some(search.clone()),
        },
    )
    .unwrap();
    Harness {
        engine,
        store,
        inference,
        fetcher,
        search,
    }
}
