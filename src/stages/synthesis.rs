//! `obligation-agent`: synthesize the final [`AgentAnswer`] from the
//! structured question and retrieved evidence.
//!
//! Model output is validated against an explicit schema before it is
//! accepted. Output that is not JSON, or JSON that does not match, becomes a
//! *degraded* answer: empty obligations plus disclaimers carrying the parse
//! or validation error. Degradation is not a stage failure.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use compliance_harness_core::models::{
    AgentAnswer, ArtifactBundle, Priority, QuestionPayload, ReasoningStep, RetrievalChunk,
};

use super::{extract_json, Stage, StageContext, StageOutput};
use crate::inference::{ChatMessage, InferenceClient};

pub const STAGE_NAME: &str = "obligation-agent";
pub const REASONING_STAGE: &str = "analysis";

pub const DEGRADED_SUMMARY: &str = "The model response could not be parsed into a structured answer";
pub const MANUAL_REVIEW_DISCLAIMER: &str = "Verify the model response manually before relying on it";

const SYSTEM_PROMPT: &str = "Eres un abogado experto en cumplimiento normativo chileno. \
Usando solo el contexto entregado, identifica las obligaciones que aplican. \
Responde solo con JSON de la forma: \
{\"summary\": string, \"obligations\": [{\"id\": string, \"description\": string, \
\"source\": {\"documentId\": string, \"reference\": string}, \"rationale\": string, \
\"actions\": [string], \"targets\": [{\"name\": string, \"confidence\": number, \
\"justification\": string}], \"priority\": \"low\"|\"medium\"|\"high\"|\"critical\"}], \
\"disclaimers\": [string]}";

pub struct SynthesisStage {
    inference: Arc<dyn InferenceClient>,
    model: String,
}

impl SynthesisStage {
    pub fn new(inference: Arc<dyn InferenceClient>, model: String) -> Self {
        Self { inference, model }
    }
}

fn user_prompt(payload: &QuestionPayload, artifacts: &ArtifactBundle) -> String {
    let mut prompt = format!("Pregunta: {}\n", payload.question);

    if let Some(sq) = &artifacts.structured_question {
        prompt.push_str(&format!("Pregunta normalizada: {}\n", sq.normalized_question));
        if !sq.plan.is_empty() {
            prompt.push_str("Plan:\n");
            for step in &sq.plan {
                prompt.push_str(&format!("- {}\n", step));
            }
        }
    }

    let chunks = artifacts
        .retrieval
        .as_ref()
        .map(|r| r.chunks.as_slice())
        .unwrap_or(&[]);
    if chunks.is_empty() {
        prompt.push_str("\nNo se recuperó contexto documental.\n");
    } else {
        prompt.push_str("\nContexto:\n");
        for (i, chunk) in chunks.iter().enumerate() {
            prompt.push_str(&format!(
                "### [{}] {} (documentId: {}, score: {:.3})\n{}\n\n",
                i + 1,
                chunk.title,
                chunk.document_id,
                chunk.score,
                chunk.excerpt
            ));
        }
    }

    let targets = payload.targets();
    if !targets.is_empty() {
        prompt.push_str(&format!("\nEntidades objetivo: {}\n", targets.join(", ")));
    }
    prompt
}

// ═══════════════════════════════════════════════════════════════════════
// Schema
// ═══════════════════════════════════════════════════════════════════════

fn present<'a>(obj: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn require_str(obj: &serde_json::Map<String, Value>, key: &str, path: &str, errors: &mut Vec<String>) {
    match present(obj, key) {
        Some(Value::String(_)) => {}
        Some(_) => errors.push(format!("{}.{}: expected a string", path, key)),
        None => errors.push(format!("{}.{}: required", path, key)),
    }
}

fn optional_strings(obj: &serde_json::Map<String, Value>, key: &str, path: &str, errors: &mut Vec<String>) {
    match present(obj, key) {
        None => {}
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => {}
        Some(_) => errors.push(format!("{}.{}: expected an array of strings", path, key)),
    }
}

fn validate_target(value: &Value, path: &str, errors: &mut Vec<String>) {
    let Some(obj) = value.as_object() else {
        errors.push(format!("{}: expected an object", path));
        return;
    };
    require_str(obj, "name", path, errors);
    require_str(obj, "justification", path, errors);
    match present(obj, "confidence").and_then(Value::as_f64) {
        Some(c) if (0.0..=1.0).contains(&c) => {}
        Some(_) => errors.push(format!("{}.confidence: must be between 0 and 1", path)),
        None => errors.push(format!("{}.confidence: expected a number", path)),
    }
}

fn validate_obligation(value: &Value, path: &str, errors: &mut Vec<String>) {
    let Some(obj) = value.as_object() else {
        errors.push(format!("{}: expected an object", path));
        return;
    };
    for key in ["id", "description", "rationale"] {
        require_str(obj, key, path, errors);
    }

    let source_path = format!("{}.source", path);
    match present(obj, "source") {
        Some(Value::Object(source)) => {
            require_str(source, "documentId", &source_path, errors);
            require_str(source, "reference", &source_path, errors);
            if let Some(score) = present(source, "score") {
                if !score.is_number() {
                    errors.push(format!("{}.score: expected a number", source_path));
                }
            }
            if let Some(excerpt) = present(source, "excerpt") {
                if !excerpt.is_string() {
                    errors.push(format!("{}.excerpt: expected a string", source_path));
                }
            }
            if let Some(attrs) = present(source, "attributes") {
                if !attrs.is_object() {
                    errors.push(format!("{}.attributes: expected an object", source_path));
                }
            }
        }
        Some(_) => errors.push(format!("{}: expected an object", source_path)),
        None => errors.push(format!("{}: required", source_path)),
    }

    optional_strings(obj, "actions", path, errors);

    match present(obj, "targets") {
        None => {}
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                validate_target(item, &format!("{}.targets[{}]", path, i), errors);
            }
        }
        Some(_) => errors.push(format!("{}.targets: expected an array", path)),
    }

    match present(obj, "priority") {
        None => {}
        Some(Value::String(p)) if Priority::parse(p).is_some() => {}
        Some(_) => errors.push(format!(
            "{}.priority: expected one of low, medium, high, critical",
            path
        )),
    }
}

/// Check `value` against the answer schema, collecting every violation.
pub fn validate_answer(value: &Value) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let Some(obj) = value.as_object() else {
        return Err(vec!["answer: expected an object".to_string()]);
    };

    require_str(obj, "summary", "answer", &mut errors);
    match present(obj, "obligations") {
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                validate_obligation(item, &format!("answer.obligations[{}]", i), &mut errors);
            }
        }
        Some(_) => errors.push("answer.obligations: expected an array".to_string()),
        None => errors.push("answer.obligations: required".to_string()),
    }
    optional_strings(obj, "disclaimers", "answer", &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

/// Parse raw model text into a schema-valid answer.
pub fn parse_answer(raw: &str) -> Result<AgentAnswer, String> {
    let value = extract_json(raw).map_err(|e| format!("response is not JSON: {}", e))?;
    validate_answer(&value).map_err(|errors| format!("response failed validation: {}", errors.join("; ")))?;
    serde_json::from_value(strip_nulls(value)).map_err(|e| format!("response failed validation: {}", e))
}

/// Fill missing source score/excerpt/attributes from the first evidence chunk
/// of the same document. Obligations citing a document absent from the
/// evidence are flagged in a disclaimer.
pub fn hydrate(answer: &mut AgentAnswer, evidence: Option<&[RetrievalChunk]>) {
    let Some(chunks) = evidence else {
        return;
    };

    let mut unresolved = Vec::new();
    for obligation in &mut answer.obligations {
        let source = &mut obligation.source;
        // Chunks arrive ranked, so the first match is the best evidence.
        let first = chunks.iter().find(|c| c.document_id == source.document_id);

        let Some(chunk) = first else {
            unresolved.push(obligation.id.clone());
            continue;
        };
        if source.score.is_none() {
            source.score = Some(chunk.score);
        }
        if source.excerpt.is_none() {
            source.excerpt = Some(chunk.excerpt.clone());
        }
        if source.attributes.is_none() {
            source.attributes = chunk.attributes.clone();
        }
    }

    if !unresolved.is_empty() {
        answer.disclaimers.push(format!(
            "Obligations without supporting evidence in the retrieved context: {}",
            unresolved.join(", ")
        ));
    }
}

pub fn degraded_answer(error: &str) -> AgentAnswer {
    AgentAnswer {
        summary: DEGRADED_SUMMARY.to_string(),
        obligations: Vec::new(),
        disclaimers: vec![MANUAL_REVIEW_DISCLAIMER.to_string(), error.to_string()],
    }
}

#[async_trait]
impl Stage for SynthesisStage {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    async fn run(
        &self,
        payload: &QuestionPayload,
        artifacts: &ArtifactBundle,
        ctx: &StageContext,
    ) -> Result<StageOutput> {
        let messages = [
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(user_prompt(payload, artifacts)),
        ];
        let meta = json!({ "model": self.model }).as_object().cloned();
        let raw = ctx
            .metrics
            .track(
                STAGE_NAME,
                meta,
                self.inference.complete(&self.model, &messages),
            )
            .await?;

        let (answer, degraded) = match parse_answer(&raw) {
            Ok(mut answer) => {
                let evidence = artifacts.retrieval.as_ref().map(|r| r.chunks.as_slice());
                hydrate(&mut answer, evidence);
                (answer, false)
            }
            Err(error) => {
                warn!(run = %ctx.run_id, %error, "degraded synthesis output");
                (degraded_answer(&error), true)
            }
        };

        let reasoning = ReasoningStep::new(
            REASONING_STAGE,
            format!("Identified {} obligations", answer.obligations.len()),
            json!({
                "model": self.model,
                "obligations": answer.obligations.len(),
                "degraded": degraded,
            }),
        );

        Ok(StageOutput {
            artifacts: ArtifactBundle {
                answer: Some(answer),
                ..Default::default()
            },
            reasoning,
        })
    }
}
