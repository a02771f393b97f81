//! Core data models used throughout Compliance Harness.
//!
//! These types describe a run (its input, lifecycle, reasoning trace and
//! metrics), the artifacts stages hand to each other, and the documents and
//! chunks the retrieval engine works over. Every record serializes as
//! camelCase JSON, which is also the shape persisted in the [`Store`](crate::store::Store).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransitionError;

/// String-keyed JSON object used for free-form metadata and details.
pub type JsonMap = serde_json::Map<String, Value>;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// `true` for `completed` and `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated question submission.
///
/// Build one through [`QuestionPayload::from_value`](crate::payload) when the
/// input comes from an untrusted JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPayload {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonMap>,
}

impl QuestionPayload {
    /// Payload with only a question.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            targets: None,
            metadata: None,
        }
    }

    /// Targets as a slice (empty when none were given).
    pub fn targets(&self) -> &[String] {
        self.targets.as_deref().unwrap_or(&[])
    }

    /// One term filter per metadata entry, in key order.
    pub fn filters(&self) -> Vec<TermFilter> {
        self.metadata
            .iter()
            .flatten()
            .map(|(key, value)| TermFilter {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }
}

/// Equality constraint on a document attribute. The filters of one query
/// are combined with AND.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermFilter {
    pub key: String,
    pub value: Value,
}

/// One entry in a run's append-only reasoning trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningStep {
    pub stage: String,
    pub summary: String,
    #[serde(default)]
    pub details: JsonMap,
    pub timestamp: DateTime<Utc>,
}

impl ReasoningStep {
    /// Create a step stamped with the current time.
    ///
    /// `details` is normally a `json!({ .. })` object; any other JSON value is
    /// stored under a single `value` key.
    pub fn new(stage: impl Into<String>, summary: impl Into<String>, details: Value) -> Self {
        let details = match details {
            Value::Object(map) => map,
            Value::Null => JsonMap::new(),
            other => {
                let mut map = JsonMap::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            stage: stage.into(),
            summary: summary.into(),
            details,
            timestamp: Utc::now(),
        }
    }
}

/// Latency and outcome of a single external call attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMetric {
    pub tool: String,
    pub latency_ms: u64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Aggregate metrics attached to a [`RunRecord`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_latency_ms: Option<u64>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallMetric>,
}

/// Durable record of one run.
///
/// `answer` is present iff `status == Completed` and `error` iff
/// `status == Failed`. The transition methods below are the only way the
/// coordinator mutates status, and they reject anything but
/// pending → running → terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonMap>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<AgentAnswer>,
    #[serde(default)]
    pub reasoning: Vec<ReasoningStep>,
    #[serde(default)]
    pub metrics: RunMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    /// A fresh `pending` record for `payload`.
    pub fn pending(id: impl Into<String>, payload: &QuestionPayload, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            question: payload.question.clone(),
            targets: payload.targets.clone(),
            metadata: payload.metadata.clone(),
            status: RunStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            answer: None,
            reasoning: Vec::new(),
            metrics: RunMetrics::default(),
            error: None,
        }
    }

    /// The payload this run was created from.
    pub fn payload(&self) -> QuestionPayload {
        QuestionPayload {
            question: self.question.clone(),
            targets: self.targets.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// pending → running.
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.expect_status(RunStatus::Pending, RunStatus::Running)?;
        self.status = RunStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// running → completed.
    pub fn complete(
        &mut self,
        answer: AgentAnswer,
        reasoning: Vec<ReasoningStep>,
        metrics: RunMetrics,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.expect_status(RunStatus::Running, RunStatus::Completed)?;
        self.status = RunStatus::Completed;
        self.answer = Some(answer);
        self.error = None;
        self.reasoning = reasoning;
        self.metrics = metrics;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// running → failed.
    ///
    /// Reasoning collected before the failure is kept when `reasoning` is
    /// empty, so a failed run still shows how far it got.
    pub fn fail(
        &mut self,
        message: impl Into<String>,
        reasoning: Vec<ReasoningStep>,
        metrics: RunMetrics,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.expect_status(RunStatus::Running, RunStatus::Failed)?;
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "run failed without an error message".to_string();
        }
        self.status = RunStatus::Failed;
        self.answer = None;
        self.error = Some(message);
        if !reasoning.is_empty() {
            self.reasoning = reasoning;
        }
        self.metrics = metrics;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    fn expect_status(&self, expected: RunStatus, to: RunStatus) -> Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransitionError {
                run_id: self.id.clone(),
                from: self.status,
                to,
            })
        }
    }
}

/// Output of the question-normalization stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredQuestion {
    pub normalized_question: String,
    pub summary: String,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub plan: Vec<String>,
}

/// One piece of ranked evidence, in the shape shared by both retrieval strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalChunk {
    pub id: String,
    pub document_id: String,
    pub title: String,
    pub excerpt: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<JsonMap>,
}

/// Output of the retrieval stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default)]
    pub chunks: Vec<RetrievalChunk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }
}

/// Where an obligation comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObligationSource {
    pub document_id: String,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<JsonMap>,
}

/// How well an obligation applies to one of the caller's targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetMatch {
    pub name: String,
    pub confidence: f64,
    pub justification: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Obligation {
    pub id: String,
    pub description: String,
    pub source: ObligationSource,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<TargetMatch>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

/// Final answer of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAnswer {
    pub summary: String,
    #[serde(default)]
    pub obligations: Vec<Obligation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disclaimers: Vec<String>,
}

impl AgentAnswer {
    /// Answer used when no stage produced one.
    pub fn placeholder() -> Self {
        Self {
            summary: "No answer could be produced".to_string(),
            obligations: Vec::new(),
            disclaimers: Vec::new(),
        }
    }
}

/// Intermediate state threaded through the pipeline stages.
///
/// Also used as the partial update a stage returns: [`merge`](Self::merge)
/// copies every present key and never clears one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_question: Option<StructuredQuestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<RetrievalResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<AgentAnswer>,
}

impl ArtifactBundle {
    pub fn merge(&mut self, update: ArtifactBundle) {
        if let Some(sq) = update.structured_question {
            self.structured_question = Some(sq);
        }
        if let Some(retrieval) = update.retrieval {
            self.retrieval = Some(retrieval);
        }
        if let Some(answer) = update.answer {
            self.answer = Some(answer);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.structured_question.is_none() && self.retrieval.is_none() && self.answer.is_none()
    }
}

/// Static description of a source document (configuration, not derived state).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

fn default_language() -> String {
    "es".to_string()
}

impl DocumentMetadata {
    /// Whether the document satisfies every filter.
    ///
    /// Keys map onto document attributes: `id`/`documentId`, `title`, `url`,
    /// `language`, and `topic`/`topics` (any listed topic matches). A key
    /// with no matching attribute does not constrain the document.
    pub fn matches(&self, filters: &[TermFilter]) -> bool {
        filters.iter().all(|f| self.matches_term(&f.key, &f.value))
    }

    fn matches_term(&self, key: &str, value: &Value) -> bool {
        let equals = |field: &str| value.as_str() == Some(field);
        match key {
            "id" | "documentId" => equals(&self.id),
            "title" => equals(&self.title),
            "url" => equals(&self.url),
            "language" => equals(&self.language),
            "topic" | "topics" => {
                let wanted: Vec<&str> = match value {
                    Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
                    other => other.as_str().into_iter().collect(),
                };
                wanted.iter().any(|w| self.topics.iter().any(|t| t == w))
            }
            _ => true,
        }
    }
}

/// A bounded segment of a document's text with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub position: usize,
    pub text: String,
    /// SHA-256 of `text`, used to reuse embeddings across rebuilds.
    pub hash: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

/// A [`DocumentChunk`] scored against a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedChunk {
    #[serde(flatten)]
    pub chunk: DocumentChunk,
    pub score: f64,
}

/// A managed search backend hit, mapped into a common shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub document_id: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonMap>,
}

impl RankedChunk {
    /// Convert into evidence, labelling it with the owning document's title.
    pub fn into_evidence(self, title: &str) -> RetrievalChunk {
        let mut attributes = JsonMap::new();
        attributes.insert("position".to_string(), Value::from(self.chunk.position));
        RetrievalChunk {
            id: self.chunk.id,
            document_id: self.chunk.document_id,
            title: title.to_string(),
            excerpt: self.chunk.text,
            score: self.score,
            attributes: Some(attributes),
        }
    }
}

impl From<SearchResult> for RetrievalChunk {
    fn from(hit: SearchResult) -> Self {
        let mut attributes = hit.metadata.unwrap_or_default();
        if let Some(reference) = hit.reference {
            attributes.insert("reference".to_string(), Value::String(reference));
        }
        if let Some(url) = hit.url {
            attributes.insert("url".to_string(), Value::String(url));
        }
        RetrievalChunk {
            id: hit.id,
            title: hit.title.unwrap_or_else(|| hit.document_id.clone()),
            document_id: hit.document_id,
            excerpt: hit.snippet,
            score: hit.score,
            attributes: if attributes.is_empty() {
                None
            } else {
                Some(attributes)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn running_record() -> RunRecord {
        let mut record = RunRecord::pending("run1", &QuestionPayload::new("q"), Utc::now());
        record.mark_running(Utc::now()).unwrap();
        record
    }

    fn ley(id: &str, topics: &[&str]) -> DocumentMetadata {
        DocumentMetadata {
            id: id.into(),
            url: format!("https://docs.test/{}.pdf", id),
            title: id.into(),
            language: "es".into(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_filters_follow_metadata() {
        assert!(QuestionPayload::new("q").filters().is_empty());

        let mut payload = QuestionPayload::new("q");
        payload.metadata = json!({ "topic": "lavado de activos", "language": "es" })
            .as_object()
            .cloned();
        let filters = payload.filters();
        assert_eq!(filters.len(), 2);
        assert!(filters.contains(&TermFilter {
            key: "topic".into(),
            value: json!("lavado de activos"),
        }));
    }

    #[test]
    fn test_document_matches_filters() {
        let doc = ley("ley-19913", &["lavado de activos", "uaf"]);
        let term = |key: &str, value: Value| TermFilter { key: key.into(), value };

        assert!(doc.matches(&[]));
        assert!(doc.matches(&[term("topic", json!("uaf")), term("language", json!("es"))]));
        assert!(doc.matches(&[term("topics", json!(["fintec", "uaf"]))]));
        assert!(doc.matches(&[term("requester", json!("legal"))]));
        assert!(!doc.matches(&[term("topic", json!("uaf")), term("language", json!("en"))]));
        assert!(!doc.matches(&[term("documentId", json!("ley-21521"))]));
        assert!(!doc.matches(&[term("language", json!(1))]));
    }

    #[test]
    fn test_pending_record_shape() {
        let record = RunRecord::pending("abc", &QuestionPayload::new("¿Qué?"), Utc::now());
        let v = serde_json::to_value(&record).unwrap();
        assert_eq!(v["status"], "pending");
        assert_eq!(v["question"], "¿Qué?");
        assert!(v.get("answer").is_none());
        assert!(v.get("error").is_none());
        assert_eq!(v["metrics"]["toolCalls"], json!([]));
    }

    #[test]
    fn test_complete_sets_answer_only() {
        let mut record = running_record();
        record
            .complete(AgentAnswer::placeholder(), vec![], RunMetrics::default(), Utc::now())
            .unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert!(record.answer.is_some());
        assert!(record.error.is_none());
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn test_fail_sets_error_only() {
        let mut record = running_record();
        record
            .fail("boom", vec![], RunMetrics::default(), Utc::now())
            .unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert!(record.answer.is_none());
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_fail_never_stores_empty_message() {
        let mut record = running_record();
        record.fail("  ", vec![], RunMetrics::default(), Utc::now()).unwrap();
        assert!(!record.error.unwrap().trim().is_empty());
    }

    #[test]
    fn test_terminal_transition_happens_once() {
        let mut record = running_record();
        record
            .complete(AgentAnswer::placeholder(), vec![], RunMetrics::default(), Utc::now())
            .unwrap();
        let err = record
            .fail("late", vec![], RunMetrics::default(), Utc::now())
            .unwrap_err();
        assert_eq!(err.from, RunStatus::Completed);
        assert_eq!(record.status, RunStatus::Completed);
        assert!(record.error.is_none());
    }

    #[test]
    fn test_mark_running_requires_pending() {
        let mut record = running_record();
        assert!(record.mark_running(Utc::now()).is_err());
    }

    #[test]
    fn test_merge_never_removes_keys() {
        let mut bundle = ArtifactBundle {
            structured_question: Some(StructuredQuestion {
                normalized_question: "q".into(),
                summary: "s".into(),
                focus_areas: vec![],
                assumptions: vec![],
                plan: vec![],
            }),
            ..Default::default()
        };
        bundle.merge(ArtifactBundle {
            answer: Some(AgentAnswer::placeholder()),
            ..Default::default()
        });
        assert!(bundle.structured_question.is_some());
        assert!(bundle.answer.is_some());
    }

    #[test]
    fn test_reasoning_step_wraps_scalar_details() {
        let step = ReasoningStep::new("x", "y", json!(3));
        assert_eq!(step.details["value"], 3);
        let step = ReasoningStep::new("x", "y", Value::Null);
        assert!(step.details.is_empty());
    }

    #[test]
    fn test_search_result_into_evidence() {
        let hit = SearchResult {
            id: "h1".into(),
            document_id: "ley-19913".into(),
            score: 0.7,
            reference: Some("Art. 3".into()),
            snippet: "Los sujetos obligados".into(),
            title: None,
            url: None,
            metadata: None,
        };
        let chunk: RetrievalChunk = hit.into();
        assert_eq!(chunk.title, "ley-19913");
        assert_eq!(chunk.attributes.unwrap()["reference"], "Art. 3");
    }
}
