//! `question-agent`: turn the raw question into a [`StructuredQuestion`].

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use compliance_harness_core::models::{
    ArtifactBundle, QuestionPayload, ReasoningStep, StructuredQuestion,
};

use super::{extract_json, string_list, Stage, StageContext, StageOutput};
use crate::inference::{ChatMessage, InferenceClient};

pub const STAGE_NAME: &str = "question-agent";
pub const REASONING_STAGE: &str = "question-analysis";

/// Plan used when the model gives none.
pub const DEFAULT_PLAN: [&str; 2] = [
    "Buscar disposiciones relevantes en los documentos indexados",
    "Extraer obligaciones aplicables",
];

const SYSTEM_PROMPT: &str = "Eres un analista de cumplimiento normativo chileno. \
Reformula la pregunta del usuario y planifica cómo responderla. \
Responde solo con un objeto JSON con las claves: \
normalized_question (string), summary (string), focus_areas (array de strings), \
assumptions (array de strings), plan (array de strings).";

pub struct QuestionStage {
    inference: Arc<dyn InferenceClient>,
    model: String,
}

impl QuestionStage {
    pub fn new(inference: Arc<dyn InferenceClient>, model: String) -> Self {
        Self { inference, model }
    }
}

fn user_prompt(payload: &QuestionPayload) -> String {
    let mut prompt = format!("Pregunta: {}", payload.question);
    let targets = payload.targets();
    if !targets.is_empty() {
        prompt.push_str("\nEntidades objetivo: ");
        prompt.push_str(&targets.join(", "));
    }
    prompt
}

/// Raw question with the default plan, used when the model output is unusable.
pub fn fallback_structure(payload: &QuestionPayload) -> StructuredQuestion {
    StructuredQuestion {
        normalized_question: payload.question.clone(),
        summary: payload.question.clone(),
        focus_areas: payload.targets().to_vec(),
        assumptions: Vec::new(),
        plan: DEFAULT_PLAN.iter().map(|s| s.to_string()).collect(),
    }
}

/// Read a structured question from model JSON, filling gaps from `payload`.
///
/// Returns `None` when `value` is not an object.
pub fn parse_structure(value: &Value, payload: &QuestionPayload) -> Option<StructuredQuestion> {
    let obj = value.as_object()?;
    let text = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let summary = text("summary");
    let normalized_question = text("normalized_question")
        .or_else(|| summary.clone())
        .unwrap_or_else(|| payload.question.clone());

    let mut focus_areas = string_list(obj.get("focus_areas"));
    for target in payload.targets() {
        if !focus_areas.iter().any(|f| f == target) {
            focus_areas.push(target.clone());
        }
    }

    let mut plan = string_list(obj.get("plan"));
    if plan.is_empty() {
        plan = DEFAULT_PLAN.iter().map(|s| s.to_string()).collect();
    }

    Some(StructuredQuestion {
        summary: summary.unwrap_or_else(|| normalized_question.clone()),
        normalized_question,
        focus_areas,
        assumptions: string_list(obj.get("assumptions")),
        plan,
    })
}

#[async_trait]
impl Stage for QuestionStage {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    async fn run(
        &self,
        payload: &QuestionPayload,
        _artifacts: &ArtifactBundle,
        ctx: &StageContext,
    ) -> Result<StageOutput> {
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_prompt(payload))];
        let meta = json!({ "model": self.model }).as_object().cloned();
        let raw = ctx
            .metrics
            .track(
                STAGE_NAME,
                meta,
                self.inference.complete(&self.model, &messages),
            )
            .await?;

        let parsed = extract_json(&raw)
            .ok()
            .and_then(|value| parse_structure(&value, payload));
        let degraded = parsed.is_none();
        let structured = parsed.unwrap_or_else(|| {
            warn!(run = %ctx.run_id, "question analysis output was not usable JSON; using raw question");
            fallback_structure(payload)
        });

        let summary = if degraded {
            "Question analysis output could not be parsed; using the question as given".to_string()
        } else {
            structured.summary.clone()
        };
        let reasoning = ReasoningStep::new(
            REASONING_STAGE,
            summary,
            json!({
                "model": self.model,
                "normalizedQuestion": structured.normalized_question,
                "plan": structured.plan,
                "focusAreas": structured.focus_areas,
                "degraded": degraded,
            }),
        );

        Ok(StageOutput {
            artifacts: ArtifactBundle {
                structured_question: Some(structured),
                ..Default::default()
            },
            reasoning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> QuestionPayload {
        QuestionPayload {
            question: "¿Qué debe reportar una inmobiliaria a la UAF?".into(),
            targets: Some(vec!["Inmobiliaria Andes".into()]),
            metadata: None,
        }
    }

    #[test]
    fn test_parse_structure_full() {
        let value = json!({
            "normalized_question": "Obligaciones de reporte ante la UAF",
            "summary": "Reporte de operaciones sospechosas",
            "focus_areas": ["Ley 19.913"],
            "assumptions": ["Sujeto obligado"],
            "plan": ["Buscar artículo 3"]
        });
        let sq = parse_structure(&value, &payload()).unwrap();
        assert_eq!(sq.normalized_question, "Obligaciones de reporte ante la UAF");
        assert_eq!(sq.plan, vec!["Buscar artículo 3"]);
        assert_eq!(sq.focus_areas, vec!["Ley 19.913", "Inmobiliaria Andes"]);
        assert_eq!(sq.assumptions, vec!["Sujeto obligado"]);
    }

    #[test]
    fn test_parse_structure_fills_gaps() {
        let sq = parse_structure(&json!({ "summary": "Resumen" }), &payload()).unwrap();
        assert_eq!(sq.normalized_question, "Resumen");
        assert_eq!(sq.plan.len(), DEFAULT_PLAN.len());

        let sq = parse_structure(&json!({}), &payload()).unwrap();
        assert_eq!(sq.normalized_question, payload().question);
        assert_eq!(sq.summary, payload().question);
    }

    #[test]
    fn test_parse_structure_rejects_non_object() {
        assert!(parse_structure(&json!(["a"]), &payload()).is_none());
    }

    #[test]
    fn test_user_prompt_lists_targets() {
        let prompt = user_prompt(&payload());
        assert!(prompt.contains("Inmobiliaria Andes"));
        assert!(!user_prompt(&QuestionPayload::new("x")).contains("Entidades"));
    }
}
