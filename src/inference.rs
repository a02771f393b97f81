//! Inference client abstraction and implementations.
//!
//! Defines the [`InferenceClient`] trait consumed by the pipeline stages and
//! the local retrieval strategy, and two implementations:
//! - **[`DisabledInference`]**: returns errors; used when no provider is configured.
//! - **[`OpenAiInference`]**: calls an OpenAI-compatible `/chat/completions`
//!   and `/embeddings` API.
//!
//! Responses are handed back as untyped text (chat) or raw vectors
//! (embeddings); callers parse and validate them locally.
//!
//! # Retries
//!
//! None. Each call is a single attempt, recorded once by the caller's
//! [`MetricsRecorder`](compliance_harness_core::MetricsRecorder). A failed
//! call either degrades a stage's output or halts the pipeline.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::InferenceConfig;

/// One chat message sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// The "run inference" capability.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Run a chat completion and return the assistant text.
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;

    /// Embed each text, returning vectors in input order.
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single text.
pub async fn embed_one(client: &dyn InferenceClient, model: &str, text: &str) -> Result<Vec<f32>> {
    client
        .embed(model, &[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}

/// Build the client selected by `config.provider`.
pub fn create_inference(config: &InferenceConfig) -> Result<Arc<dyn InferenceClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledInference)),
        "openai" => Ok(Arc::new(OpenAiInference::new(config)?)),
        other => bail!("Unknown inference provider: {}", other),
    }
}

// ============ Disabled ============

/// A client that fails every call.
pub struct DisabledInference;

#[async_trait]
impl InferenceClient for DisabledInference {
    async fn complete(&self, _model: &str, _messages: &[ChatMessage]) -> Result<String> {
        bail!("Inference provider is disabled")
    }

    async fn embed(&self, _model: &str, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Inference provider is disabled")
    }
}

// ============ OpenAI-compatible ============

/// Client for an OpenAI-compatible HTTP API.
///
/// The bearer token is read from the environment variable named by
/// `inference.api_key_env` when the client is built. A missing token is
/// allowed so local gateways without auth keep working.
pub struct OpenAiInference {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiInference {
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: std::env::var(&config.api_key_env).ok(),
        })
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Inference request to {} failed", path))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Inference API error {}: {}", status, body_text);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl InferenceClient for OpenAiInference {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });
        let json = self.post("/chat/completions", &body).await?;
        parse_chat_response(&json)
    }

    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": model,
            "input": texts,
        });
        let json = self.post("/embeddings", &body).await?;
        let vectors = parse_embedding_response(&json)?;
        if vectors.len() != texts.len() {
            bail!(
                "Embedding response has {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            );
        }
        Ok(vectors)
    }
}

/// Extract `choices[0].message.content`.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message.content"))
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid embedding response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid embedding response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(position as u64);

        let mut vector = Vec::with_capacity(embedding.len());
        for v in embedding {
            let f = v
                .as_f64()
                .ok_or_else(|| anyhow!("Invalid embedding response: non-numeric value"))?;
            vector.push(f as f32);
        }
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}
