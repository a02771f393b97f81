//! Latency and outcome recording for external calls.
//!
//! Every inference, search, fetch and extraction call made during a run goes
//! through [`MetricsRecorder::track`], which appends exactly one
//! [`ToolCallMetric`] per attempt. Tracking is observational: the wrapped
//! result is returned unchanged and nothing is retried.

use std::fmt::Display;
use std::future::Future;
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;

use crate::models::{JsonMap, ToolCallMetric};

/// Collects [`ToolCallMetric`]s for one run.
///
/// Shared by reference between stages; the internal lock is never held
/// across an `.await`.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    calls: Mutex<Vec<ToolCallMetric>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation`, record its wall-clock latency and outcome, and return
    /// its result untouched.
    ///
    /// On failure the metric carries the error's `Display` text.
    pub async fn track<T, E, F>(
        &self,
        tool: &str,
        metadata: Option<JsonMap>,
        operation: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let start = Instant::now();
        let result = operation.await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let (success, error_message) = match &result {
            Ok(_) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        };

        self.push(ToolCallMetric {
            tool: tool.to_string(),
            latency_ms,
            success,
            timestamp: Utc::now(),
            metadata,
            error_message,
        });

        result
    }

    /// Copy of everything recorded so far, in call order.
    pub fn snapshot(&self) -> Vec<ToolCallMetric> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, metric: ToolCallMetric) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(metric);
    }
}
