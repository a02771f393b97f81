//! Sequential stage execution with short-circuit on failure.
//!
//! The pipeline seeds the reasoning trace with a `question` entry, then runs
//! each stage in order against the accumulated [`ArtifactBundle`]. A stage
//! error is recorded as a `<stage>-error` reasoning entry and stops the
//! remaining stages; the run still completes with whatever answer exists
//! (or the placeholder). A stage exceeding its time budget is different: it
//! aborts execution with [`PipelineError::StageTimeout`], which the run
//! coordinator records as a failure.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use compliance_harness_core::models::{AgentAnswer, ArtifactBundle, QuestionPayload, ReasoningStep};

use crate::stages::{Stage, StageContext};

pub const QUESTION_STAGE: &str = "question";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stage {stage} timed out after {timeout:?}")]
    StageTimeout {
        stage: String,
        timeout: Duration,
        /// Trace up to the stage that timed out.
        reasoning: Vec<ReasoningStep>,
    },
}

impl PipelineError {
    pub fn reasoning(&self) -> &[ReasoningStep] {
        match self {
            PipelineError::StageTimeout { reasoning, .. } => reasoning,
        }
    }
}

/// Answer and trace of a finished pipeline. Tool-call metrics live on the
/// [`StageContext`] recorder so they survive a timed-out execution too.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub answer: AgentAnswer,
    pub reasoning: Vec<ReasoningStep>,
}

pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    stage_timeout: Duration,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>, stage_timeout: Duration) -> Self {
        Self {
            stages,
            stage_timeout,
        }
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn execute(
        &self,
        payload: &QuestionPayload,
        ctx: &StageContext,
    ) -> Result<PipelineOutcome, PipelineError> {
        let mut reasoning = vec![ReasoningStep::new(
            QUESTION_STAGE,
            payload.question.clone(),
            json!({
                "question": payload.question,
                "targets": payload.targets,
                "metadata": payload.metadata,
            }),
        )];
        let mut artifacts = ArtifactBundle::default();

        for stage in &self.stages {
            let name = stage.name();
            debug!(run = %ctx.run_id, stage = name, "stage started");

            let result =
                tokio::time::timeout(self.stage_timeout, stage.run(payload, &artifacts, ctx)).await;
            match result {
                Ok(Ok(output)) => {
                    artifacts.merge(output.artifacts);
                    reasoning.push(output.reasoning);
                }
                Ok(Err(err)) => {
                    let message = format!("{:#}", err);
                    warn!(run = %ctx.run_id, stage = name, error = %message, "stage failed");
                    reasoning.push(ReasoningStep::new(
                        format!("{}-error", name),
                        format!("Stage {} failed", name),
                        json!({ "message": message }),
                    ));
                    break;
                }
                Err(_) => {
                    warn!(run = %ctx.run_id, stage = name, "stage timed out");
                    return Err(PipelineError::StageTimeout {
                        stage: name.to_string(),
                        timeout: self.stage_timeout,
                        reasoning,
                    });
                }
            }
        }

        Ok(PipelineOutcome {
            answer: artifacts.answer.unwrap_or_else(AgentAnswer::placeholder),
            reasoning,
        })
    }
}
