//! Validation of untrusted question submissions.
//!
//! Bodies arrive as arbitrary JSON. [`QuestionPayload::from_value`] checks
//! every rule and reports all violations at once, so a client can fix its
//! request in one round-trip.

use serde_json::Value;

use crate::error::ValidationError;
use crate::models::{JsonMap, QuestionPayload};

/// Longest accepted question, in characters.
pub const MAX_QUESTION_CHARS: usize = 4000;
/// Most targets accepted in one submission.
pub const MAX_TARGETS: usize = 50;

const ALLOWED_FIELDS: [&str; 3] = ["question", "targets", "metadata"];

impl QuestionPayload {
    /// Validate a raw JSON body and build a payload from it.
    ///
    /// Rules: the body is an object with no unknown fields; `question` is a
    /// non-blank string of at most [`MAX_QUESTION_CHARS`]; `targets`, when
    /// present, is an array of at most [`MAX_TARGETS`] non-blank strings;
    /// `metadata`, when present, is an object.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        let mut errors = Vec::new();

        let obj = match value.as_object() {
            Some(o) => o,
            None => {
                return Err(ValidationError {
                    errors: vec!["body must be a JSON object".to_string()],
                })
            }
        };

        for key in obj.keys() {
            if !ALLOWED_FIELDS.contains(&key.as_str()) {
                errors.push(format!("unknown field `{}`", key));
            }
        }

        let question = match obj.get("question") {
            Some(Value::String(q)) if q.trim().is_empty() => {
                errors.push("question must not be empty".to_string());
                None
            }
            Some(Value::String(q)) if q.chars().count() > MAX_QUESTION_CHARS => {
                errors.push(format!(
                    "question must be at most {} characters",
                    MAX_QUESTION_CHARS
                ));
                None
            }
            Some(Value::String(q)) => Some(q.trim().to_string()),
            Some(_) => {
                errors.push("question must be a string".to_string());
                None
            }
            None => {
                errors.push("question is required".to_string());
                None
            }
        };

        let targets = match obj.get("targets") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => {
                if items.len() > MAX_TARGETS {
                    errors.push(format!("targets must have at most {} items", MAX_TARGETS));
                }
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item.as_str() {
                        Some(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
                        Some(_) => errors.push(format!("targets[{}] must not be empty", i)),
                        None => errors.push(format!("targets[{}] must be a string", i)),
                    }
                }
                Some(out)
            }
            Some(_) => {
                errors.push("targets must be an array of strings".to_string());
                None
            }
        };

        let metadata: Option<JsonMap> = match obj.get("metadata") {
            None | Some(Value::Null) => None,
            Some(Value::Object(m)) => Some(m.clone()),
            Some(_) => {
                errors.push("metadata must be an object".to_string());
                None
            }
        };

        match question {
            Some(question) if errors.is_empty() => Ok(QuestionPayload {
                question,
                targets,
                metadata,
            }),
            _ => Err(ValidationError { errors }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_payload() {
        let p = QuestionPayload::from_value(&json!({ "question": "¿Qué reportes exige la Ley 19.913?" }))
            .unwrap();
        assert_eq!(p.question, "¿Qué reportes exige la Ley 19.913?");
        assert!(p.targets.is_none());
        assert!(p.metadata.is_none());
    }

    #[test]
    fn test_full_payload() {
        let p = QuestionPayload::from_value(&json!({
            "question": "q",
            "targets": ["banco", " fintec "],
            "metadata": { "sector": "financiero" }
        }))
        .unwrap();
        assert_eq!(p.targets(), &["banco".to_string(), "fintec".to_string()]);
        assert_eq!(p.metadata.unwrap()["sector"], "financiero");
    }

    #[test]
    fn test_reports_all_errors() {
        let err = QuestionPayload::from_value(&json!({
            "question": 5,
            "targets": ["ok", 3, ""],
            "metadata": [],
            "extra": true
        }))
        .unwrap_err();
        assert_eq!(err.errors.len(), 5, "{:?}", err.errors);
    }

    #[test]
    fn test_blank_question_rejected() {
        let err = QuestionPayload::from_value(&json!({ "question": "   " })).unwrap_err();
        assert_eq!(err.errors, vec!["question must not be empty".to_string()]);
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(QuestionPayload::from_value(&json!("hola")).is_err());
        assert!(QuestionPayload::from_value(&json!({})).is_err());
    }

    #[test]
    fn test_too_long_question_rejected() {
        let q = "a".repeat(MAX_QUESTION_CHARS + 1);
        assert!(QuestionPayload::from_value(&json!({ "question": q })).is_err());
    }
}
