//! Stage agents: the named units of the fixed pipeline.
//!
//! Each stage reads the accumulated [`ArtifactBundle`] and returns a partial
//! update plus exactly one [`ReasoningStep`]. A stage may call external
//! services (through the run's [`MetricsRecorder`]) but must not otherwise
//! mutate shared state; running it twice on the same inputs yields the same
//! update.
//!
//! | Stage | Name | Reasoning stage | Produces |
//! |-------|------|-----------------|----------|
//! | [`QuestionStage`] | `question-agent` | `question-analysis` | `structuredQuestion` |
//! | [`RetrievalStage`] | `knowledge-agent` | `retrieval` | `retrieval` |
//! | [`SynthesisStage`] | `obligation-agent` | `analysis` | `answer` |

pub mod question;
pub mod retrieval;
pub mod synthesis;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use compliance_harness_core::metrics::MetricsRecorder;
use compliance_harness_core::models::{ArtifactBundle, QuestionPayload, ReasoningStep};

use crate::config::Config;
use crate::inference::InferenceClient;
use crate::retrieval::Retriever;

pub use question::QuestionStage;
pub use retrieval::RetrievalStage;
pub use synthesis::SynthesisStage;

/// Per-run context handed to every stage.
#[derive(Clone)]
pub struct StageContext {
    pub run_id: String,
    pub metrics: Arc<MetricsRecorder>,
}

impl StageContext {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            metrics: Arc::new(MetricsRecorder::new()),
        }
    }
}

/// Result of one successful stage invocation.
#[derive(Debug, Clone)]
pub struct StageOutput {
    /// Keys to merge into the bundle; absent keys are left untouched.
    pub artifacts: ArtifactBundle,
    pub reasoning: ReasoningStep,
}

/// A named pipeline stage.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use serde_json::json;
/// use compliance_harness::stages::{Stage, StageContext, StageOutput};
/// use compliance_harness_core::models::{ArtifactBundle, QuestionPayload, ReasoningStep};
///
/// struct Echo;
///
/// #[async_trait]
/// impl Stage for Echo {
///     fn name(&self) -> &str { "echo" }
///
///     async fn run(
///         &self,
///         payload: &QuestionPayload,
///         _artifacts: &ArtifactBundle,
///         _ctx: &StageContext,
///     ) -> Result<StageOutput> {
///         Ok(StageOutput {
///             artifacts: ArtifactBundle::default(),
///             reasoning: ReasoningStep::new("echo", payload.question.clone(), json!({})),
///         })
///     }
/// }
/// ```
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable stage name; failures are recorded as `<name>-error`.
    fn name(&self) -> &str;

    async fn run(
        &self,
        payload: &QuestionPayload,
        artifacts: &ArtifactBundle,
        ctx: &StageContext,
    ) -> Result<StageOutput>;
}

/// The standard question → retrieval → synthesis stage list.
pub fn default_stages(
    config: &Config,
    inference: Arc<dyn InferenceClient>,
    retriever: Arc<dyn Retriever>,
) -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(QuestionStage::new(
            inference.clone(),
            config.inference.chat_model.clone(),
        )),
        Arc::new(RetrievalStage::new(retriever, config.retrieval.top_k)),
        Arc::new(SynthesisStage::new(
            inference,
            config.inference.synthesis_model.clone(),
        )),
    ]
}

/// Pull a JSON value out of free-form model text.
///
/// Accepts bare JSON, JSON wrapped in a markdown code fence, or JSON
/// embedded in prose (outermost `{ .. }`).
pub fn extract_json(raw: &str) -> Result<Value, serde_json::Error> {
    let trimmed = raw.trim();

    let unfenced = strip_code_fence(trimmed);
    match serde_json::from_str(unfenced) {
        Ok(v) => Ok(v),
        Err(first_err) => match (unfenced.find('{'), unfenced.rfind('}')) {
            (Some(start), Some(end)) if end > start => serde_json::from_str(&unfenced[start..=end]),
            _ => Err(first_err),
        },
    }
}

fn strip_code_fence(s: &str) -> &str {
    if !(s.starts_with("```") && s.ends_with("```") && s.len() >= 6) {
        return s;
    }
    let inner = &s[3..s.len() - 3];
    // Drop an info string such as `json` on the opening fence line.
    match inner.find('\n') {
        Some(nl) if !inner[..nl].trim().contains(char::is_whitespace) => inner[nl + 1..].trim(),
        _ => inner.trim(),
    }
}

/// Array of strings from a permissive JSON value, ignoring non-strings.
pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
