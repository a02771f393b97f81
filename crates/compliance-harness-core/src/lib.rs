//! # Compliance Harness Core
//!
//! Shared, runtime-agnostic logic for Compliance Harness: run and artifact
//! models, payload validation, the line chunker, cosine ranking, content
//! fingerprints, the metrics recorder and the key-value store abstraction.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem I/O. The
//! `compliance-harness` app crate supplies the backends.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod models;
pub mod payload;
pub mod store;

pub use error::{TransitionError, ValidationError};
pub use metrics::MetricsRecorder;
pub use store::Store;
