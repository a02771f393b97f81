//! Run coordination: the per-run state machine and its persistence.
//!
//! A run is created `pending` by [`RunCoordinator::init`] and persisted
//! before `init` returns. Execution then proceeds detached from the caller:
//!
//! ```text
//!  init ──▶ pending ──▶ running ──┬──▶ completed
//!                                 └──▶ failed
//! ```
//!
//! Each run id owns a slot with two locks:
//!
//! - `record` serializes reads and writes of the run's state (init, status,
//!   transitions). It is held only for a store round-trip, so polling never
//!   waits on a running pipeline.
//! - `execution` is held for the whole pipeline execution, so a run id is
//!   executed at most once at a time.
//!
//! Every transition is written to the [`Store`] before the in-memory copy is
//! updated: a reader never observes state that was not persisted.
//!
//! Slots exist only while a run is live. Once the terminal record is stored
//! the slot is released, and later reads go straight to the store.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use compliance_harness_core::models::{QuestionPayload, RunMetrics, RunRecord, RunStatus};
use compliance_harness_core::store::{get_json, keys, put_json, Store};
use compliance_harness_core::ValidationError;

use crate::pipeline::Pipeline;
use crate::stages::StageContext;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("run {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Default)]
struct RunSlot {
    record: AsyncMutex<Option<RunRecord>>,
    execution: AsyncMutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Fresh run id: a v4 UUID without dashes.
pub fn new_run_id() -> String {
    Uuid::new_v4().simple().to_string()
}

type SlotMap = Mutex<HashMap<String, Arc<RunSlot>>>;

pub struct RunCoordinator {
    store: Arc<dyn Store>,
    pipeline: Arc<Pipeline>,
    slots: Arc<SlotMap>,
}

impl RunCoordinator {
    pub fn new(store: Arc<dyn Store>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            store,
            pipeline,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn slot(&self, run_id: &str) -> Arc<RunSlot> {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.entry(run_id.to_string()).or_default().clone()
    }

    fn existing_slot(&self, run_id: &str) -> Option<Arc<RunSlot>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(run_id)
            .cloned()
    }

    /// Create run `run_id` and start executing it in the background.
    ///
    /// Idempotent: when the run already exists its current record is
    /// returned unchanged and nothing is started.
    pub async fn init(&self, run_id: &str, payload: QuestionPayload) -> Result<RunRecord, RunError> {
        if run_id.trim().is_empty() {
            return Err(ValidationError {
                errors: vec!["runId must not be empty".to_string()],
            }
            .into());
        }

        let slot = self.slot(run_id);
        let mut cached = slot.record.lock().await;

        if cached.is_none() {
            *cached = get_json::<RunRecord>(self.store.as_ref(), &keys::run(run_id)).await?;
        }
        if let Some(existing) = cached.as_ref() {
            info!(run = %run_id, status = %existing.status, "run already initialized");
            if existing.status.is_terminal() {
                release(&self.slots, run_id, &slot);
            }
            return Ok(existing.clone());
        }

        let record = RunRecord::pending(run_id, &payload, Utc::now());
        persist(self.store.as_ref(), &mut cached, record.clone()).await?;
        info!(run = %run_id, "run created");

        let handle = tokio::spawn(execute(
            self.store.clone(),
            self.pipeline.clone(),
            self.slots.clone(),
            slot.clone(),
            run_id.to_string(),
        ));
        *slot
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);

        Ok(record)
    }

    /// Validate an untrusted JSON body and start a run under a fresh id.
    pub async fn submit(&self, body: &Value) -> Result<RunRecord, RunError> {
        let payload = QuestionPayload::from_value(body)?;
        self.init(&new_run_id(), payload).await
    }

    /// Current record of `run_id`.
    pub async fn status(&self, run_id: &str) -> Result<RunRecord, RunError> {
        let Some(slot) = self.existing_slot(run_id) else {
            return get_json::<RunRecord>(self.store.as_ref(), &keys::run(run_id))
                .await?
                .ok_or_else(|| RunError::NotFound(run_id.to_string()));
        };

        let mut cached = slot.record.lock().await;
        if cached.is_none() {
            *cached = get_json::<RunRecord>(self.store.as_ref(), &keys::run(run_id)).await?;
        }
        cached
            .clone()
            .ok_or_else(|| RunError::NotFound(run_id.to_string()))
    }

    /// Wait for the execution started by this coordinator, then return the
    /// run's record.
    pub async fn join(&self, run_id: &str) -> Result<RunRecord, RunError> {
        let handle = self.existing_slot(run_id).and_then(|slot| {
            slot.task
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take()
        });
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(run = %run_id, error = %e, "run task ended abnormally");
            }
        }
        self.status(run_id).await
    }
}

async fn persist(store: &dyn Store, cached: &mut Option<RunRecord>, record: RunRecord) -> Result<()> {
    put_json(store, &keys::run(&record.id), &record).await?;
    *cached = Some(record);
    Ok(())
}

/// Drop `slot` from the map if it is still the one registered for `run_id`.
fn release(slots: &SlotMap, run_id: &str, slot: &Arc<RunSlot>) {
    let mut slots = slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if slots.get(run_id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
        slots.remove(run_id);
    }
}

async fn execute(
    store: Arc<dyn Store>,
    pipeline: Arc<Pipeline>,
    slots: Arc<SlotMap>,
    slot: Arc<RunSlot>,
    run_id: String,
) {
    let _exclusive = slot.execution.lock().await;

    if let Err(err) = drive(store.as_ref(), &pipeline, &slot, &run_id).await {
        let message = format!("{:#}", err);
        error!(run = %run_id, error = %message, "run execution failed");
        if let Err(e) = record_failure(store.as_ref(), &slot, &run_id, &message).await {
            error!(run = %run_id, error = %format!("{:#}", e), "could not record run failure");
        }
    }

    // Non-terminal only when the final write failed; the slot stays.
    let terminal = slot
        .record
        .lock()
        .await
        .as_ref()
        .is_some_and(|record| record.status.is_terminal());
    if terminal {
        release(&slots, &run_id, &slot);
    }
}

async fn drive(store: &dyn Store, pipeline: &Arc<Pipeline>, slot: &RunSlot, run_id: &str) -> Result<()> {
    let payload = {
        let mut cached = slot.record.lock().await;
        let mut record = match cached.clone() {
            Some(record) => record,
            None => get_json::<RunRecord>(store, &keys::run(run_id))
                .await?
                .ok_or_else(|| anyhow!("run {} disappeared before execution", run_id))?,
        };
        if record.status != RunStatus::Pending {
            info!(run = %run_id, status = %record.status, "run already started; skipping");
            return Ok(());
        }
        record.mark_running(Utc::now())?;
        let payload = record.payload();
        persist(store, &mut cached, record).await?;
        payload
    };
    info!(run = %run_id, "run started");

    let ctx = StageContext::new(run_id);
    let started = Instant::now();
    // A panicking stage surfaces as a JoinError instead of tearing down this task.
    let outcome = tokio::spawn({
        let pipeline = pipeline.clone();
        let ctx = ctx.clone();
        async move { pipeline.execute(&payload, &ctx).await }
    })
    .await;
    let metrics = RunMetrics {
        total_latency_ms: Some(started.elapsed().as_millis() as u64),
        tool_calls: ctx.metrics.snapshot(),
    };

    let mut cached = slot.record.lock().await;
    let mut record = cached
        .clone()
        .ok_or_else(|| anyhow!("run {} lost its record during execution", run_id))?;
    let now = Utc::now();
    match outcome {
        Ok(Ok(outcome)) => {
            record.complete(outcome.answer, outcome.reasoning, metrics, now)?;
            info!(
                run = %run_id,
                obligations = record.answer.as_ref().map_or(0, |a| a.obligations.len()),
                tool_calls = record.metrics.tool_calls.len(),
                "run completed"
            );
        }
        Ok(Err(err)) => {
            warn!(run = %run_id, error = %err, "run failed");
            record.fail(err.to_string(), err.reasoning().to_vec(), metrics, now)?;
        }
        Err(join_err) => {
            error!(run = %run_id, error = %join_err, "pipeline task aborted");
            record.fail(format!("pipeline aborted: {}", join_err), Vec::new(), metrics, now)?;
        }
    }
    persist(store, &mut cached, record).await
}

async fn record_failure(store: &dyn Store, slot: &RunSlot, run_id: &str, message: &str) -> Result<()> {
    let mut cached = slot.record.lock().await;
    let mut record = match cached.clone() {
        Some(record) => record,
        None => match get_json::<RunRecord>(store, &keys::run(run_id)).await? {
            Some(record) => record,
            None => return Ok(()),
        },
    };
    if record.status.is_terminal() {
        return Ok(());
    }

    let now = Utc::now();
    if record.status == RunStatus::Pending {
        record.mark_running(now)?;
    }
    record.fail(message, Vec::new(), record.metrics.clone(), now)?;
    persist(store, &mut cached, record).await
}
