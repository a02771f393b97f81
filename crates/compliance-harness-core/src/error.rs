//! Typed errors shared by the core and the application crate.

use thiserror::Error;

use crate::models::RunStatus;

/// A question payload failed validation. The run is never created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid question payload: {}", .errors.join("; "))]
pub struct ValidationError {
    /// One message per violated rule, in field order.
    pub errors: Vec<String>,
}

/// A run record was asked to make a transition its state machine forbids.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("run {run_id}: cannot move from {from} to {to}")]
pub struct TransitionError {
    pub run_id: String,
    pub from: RunStatus,
    pub to: RunStatus,
}
