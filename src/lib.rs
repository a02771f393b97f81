//! # Compliance Harness
//!
//! Run orchestration and retrieval for regulatory compliance questions.
//!
//! A question becomes a durable *run*. Each run executes a fixed pipeline
//! of stage agents in the background (question analysis, evidence
//! retrieval, obligation synthesis) and records a reasoning trace and
//! per-call metrics alongside the final answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────────┐   ┌──────────────────────────────┐
//! │ HTTP/CLI │──▶│ RunCoordinator │──▶│ Pipeline                      │
//! └──────────┘   │ (per-run slot) │   │ question ▶ retrieval ▶ synth. │
//!                └───────┬────────┘   └──────────────┬───────────────┘
//!                        │                           │
//!                        ▼                           ▼
//!                  ┌──────────┐          ┌────────────────────────┐
//!                  │  Store   │◀─────────│ Retriever (local /     │
//!                  │ (SQLite) │  caches  │ managed search index)  │
//!                  └──────────┘          └────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cmpl init                                  # create database
//! cmpl index sync                            # build / sync the index
//! cmpl ask "¿Qué debe reportar una inmobiliaria a la UAF?" --target "Inmobiliaria Andes"
//! cmpl serve                                 # POST /question, GET /runs/{id}
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite-backed key-value store |
//! | [`inference`] | Chat and embedding client |
//! | [`search_backend`] | Managed search index client |
//! | [`documents`] | Document fetch, extraction and text cache |
//! | [`locks`] | Per-key async locks for cache builds |
//! | [`retrieval`] | Local and managed retrieval strategies |
//! | [`stages`] | Pipeline stage agents |
//! | [`pipeline`] | Sequential stage execution |
//! | [`run`] | Run lifecycle and coordination |
//! | [`app`] | Engine wiring |
//! | [`server`] | HTTP server |

pub mod app;
pub mod config;
pub mod db;
pub mod documents;
pub mod inference;
pub mod locks;
pub mod migrate;
pub mod pipeline;
pub mod retrieval;
pub mod run;
pub mod search_backend;
pub mod server;
pub mod sqlite_store;
pub mod stages;
