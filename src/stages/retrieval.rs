//! `knowledge-agent`: fetch evidence for the (normalized) question.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use compliance_harness_core::models::{ArtifactBundle, QuestionPayload, ReasoningStep};

use super::{Stage, StageContext, StageOutput};
use crate::retrieval::Retriever;

pub const STAGE_NAME: &str = "knowledge-agent";
pub const REASONING_STAGE: &str = "retrieval";

pub struct RetrievalStage {
    retriever: Arc<dyn Retriever>,
    top_k: usize,
}

impl RetrievalStage {
    pub fn new(retriever: Arc<dyn Retriever>, top_k: usize) -> Self {
        Self { retriever, top_k }
    }
}

#[async_trait]
impl Stage for RetrievalStage {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    async fn run(
        &self,
        payload: &QuestionPayload,
        artifacts: &ArtifactBundle,
        ctx: &StageContext,
    ) -> Result<StageOutput> {
        let query = artifacts
            .structured_question
            .as_ref()
            .map(|sq| sq.normalized_question.trim())
            .filter(|q| !q.is_empty())
            .unwrap_or(payload.question.as_str())
            .to_string();

        let filters = payload.filters();
        let result = self
            .retriever
            .retrieve(&query, self.top_k, &filters, &ctx.metrics)
            .await?;

        let mut document_ids: Vec<&str> = Vec::new();
        for chunk in &result.chunks {
            if !document_ids.contains(&chunk.document_id.as_str()) {
                document_ids.push(&chunk.document_id);
            }
        }

        let reasoning = ReasoningStep::new(
            REASONING_STAGE,
            format!(
                "Retrieved {} passages from {} documents",
                result.chunks.len(),
                document_ids.len()
            ),
            json!({
                "query": query,
                "strategy": result.strategy,
                "model": result.model,
                "filters": filters,
                "documentIds": document_ids,
            }),
        );

        Ok(StageOutput {
            artifacts: ArtifactBundle {
                retrieval: Some(result),
                ..Default::default()
            },
            reasoning,
        })
    }
}
