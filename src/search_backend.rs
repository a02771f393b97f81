//! Managed search backend abstraction.
//!
//! The managed retrieval strategy delegates indexing and ranking to an
//! external search service reached through [`SearchBackend`]. The HTTP
//! implementation validates every response shape before trusting it:
//!
//! | Call | Request | Expected response |
//! |------|---------|-------------------|
//! | `sync_index` | `POST {url}/indexes/{name}` `{ documents: [...] }` | `{ index: string, status: string, documentsIngested?: number }` |
//! | `query` | `POST {url}/indexes/{name}/query` `{ query, topK, filters? }` | `{ results: [{ document_id: string, score: number, .. }] }` |
//!
//! `filters` is sent only when the query has any, as
//! `{ "type": "and", "filters": [{ "type": "term", "key": .., "value": .. }] }`.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use compliance_harness_core::models::{DocumentMetadata, JsonMap, TermFilter};

use crate::config::SearchConfig;

/// Outcome of an index sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    pub index: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents_ingested: Option<u64>,
}

impl IndexStatus {
    /// The backend reports the index usable.
    pub fn is_ready(&self) -> bool {
        matches!(self.status.as_str(), "ready" | "indexed")
    }
}

/// One hit as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub id: Option<String>,
    pub document_id: String,
    pub score: f64,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub metadata: Option<JsonMap>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// The "run search" capability.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Push the document set to `index` and return the backend's status.
    async fn sync_index(&self, index: &str, documents: &[DocumentMetadata]) -> Result<IndexStatus>;

    /// Top-`top_k` hits for `text` among documents matching all `filters`.
    async fn query(
        &self,
        index: &str,
        text: &str,
        top_k: usize,
        filters: &[TermFilter],
    ) -> Result<Vec<SearchHit>>;
}

/// Search backend reached over HTTP.
pub struct HttpSearchBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSearchBackend {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let base_url = config
            .url
            .clone()
            .ok_or_else(|| anyhow!("search.url is required for the managed strategy"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Search request to {} failed", path))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Search API error {}: {}", status, body_text);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn sync_index(&self, index: &str, documents: &[DocumentMetadata]) -> Result<IndexStatus> {
        let body = json!({ "documents": index_documents(documents) });
        let json = self.post(&format!("/indexes/{}", index), &body).await?;
        parse_index_status(json)
    }

    async fn query(
        &self,
        index: &str,
        text: &str,
        top_k: usize,
        filters: &[TermFilter],
    ) -> Result<Vec<SearchHit>> {
        let body = query_body(text, top_k, filters);
        let json = self.post(&format!("/indexes/{}/query", index), &body).await?;
        parse_query_response(json)
    }
}

/// Request body of a query.
pub fn query_body(text: &str, top_k: usize, filters: &[TermFilter]) -> Value {
    let mut body = json!({ "query": text, "topK": top_k });
    if !filters.is_empty() {
        let terms: Vec<Value> = filters
            .iter()
            .map(|f| json!({ "type": "term", "key": f.key, "value": f.value }))
            .collect();
        body["filters"] = json!({ "type": "and", "filters": terms });
    }
    body
}

/// Wire shape of the documents pushed to the index.
pub fn index_documents(documents: &[DocumentMetadata]) -> Vec<Value> {
    documents
        .iter()
        .map(|doc| {
            json!({
                "id": doc.id,
                "url": doc.url,
                "title": doc.title,
                "metadata": {
                    "language": doc.language,
                    "topics": doc.topics,
                },
            })
        })
        .collect()
}

fn parse_index_status(json: Value) -> Result<IndexStatus> {
    let shape_ok = json.get("index").map_or(false, Value::is_string)
        && json.get("status").map_or(false, Value::is_string);
    if !shape_ok {
        bail!("Unexpected response from the search indexer");
    }
    serde_json::from_value(json).context("Unexpected response from the search indexer")
}

fn parse_query_response(json: Value) -> Result<Vec<SearchHit>> {
    let results = json
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("Unexpected search response: missing results array"))?;

    let well_formed = results.iter().all(|hit| {
        hit.get("document_id").map_or(false, Value::is_string)
            && hit.get("score").map_or(false, Value::is_number)
    });
    if !well_formed {
        bail!("Unexpected search response: every hit needs document_id and score");
    }

    results
        .iter()
        .map(|hit| serde_json::from_value(hit.clone()).context("Malformed search hit"))
        .collect()
}
