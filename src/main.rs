//! # Compliance Harness CLI (`cmpl`)
//!
//! ## Usage
//!
//! ```bash
//! cmpl --config ./config/cmpl.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cmpl init` | Create the SQLite database and run schema migrations |
//! | `cmpl ask "<question>"` | Run a question through the pipeline and print the result |
//! | `cmpl status <run-id>` | Print a stored run record |
//! | `cmpl runs` | List recent runs |
//! | `cmpl index sync` | Bring the retrieval index up to date with `[[documents]]` |
//! | `cmpl serve` | Start the HTTP server |
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr.

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use compliance_harness::app::Engine;
use compliance_harness::sqlite_store::SqliteStore;
use compliance_harness::{config, db, migrate, server};
use compliance_harness_core::metrics::MetricsRecorder;
use compliance_harness_core::models::RunRecord;
use compliance_harness_core::store::{get_json, keys};

/// Compliance Harness: answer regulatory questions with cited obligations.
#[derive(Parser)]
#[command(name = "cmpl", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cmpl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ask a question and wait for the run to finish.
    ///
    /// Prints the run id immediately, then the answer summary and
    /// obligations once the run is terminal.
    Ask {
        question: String,

        /// Entity the obligations should be matched against. Repeatable.
        #[arg(long = "target")]
        targets: Vec<String>,

        /// Print the full run record as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Print the stored record of a run as JSON.
    Status { run_id: String },

    /// List the most recently updated runs.
    Runs {
        #[arg(long, default_value = "20")]
        limit: i64,
    },

    /// Manage the retrieval index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Sync the index with the configured documents (no-op when unchanged).
    Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ask {
            question,
            targets,
            json,
        } => {
            let engine = Engine::open(&cfg).await?;
            let mut body = json!({ "question": question });
            if !targets.is_empty() {
                body["targets"] = json!(targets);
            }
            let record = engine.coordinator.submit(&body).await?;
            println!("Run {} started", record.id);

            let record = engine.coordinator.join(&record.id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_summary(&record);
            }
        }
        Commands::Status { run_id } => {
            let store = open_store(&cfg).await?;
            match get_json::<RunRecord>(&store, &keys::run(&run_id)).await? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => anyhow::bail!("run {} not found", run_id),
            }
        }
        Commands::Runs { limit } => {
            let store = open_store(&cfg).await?;
            let keys = store.keys_with_prefix("run:", limit).await?;
            if keys.is_empty() {
                println!("No runs.");
            }
            for key in keys {
                if let Some(record) = get_json::<RunRecord>(&store, &key).await? {
                    println!(
                        "{}  {:<9}  {}  {}",
                        record.id,
                        record.status.as_str(),
                        record.created_at.format("%Y-%m-%d %H:%M:%S"),
                        record.question
                    );
                }
            }
        }
        Commands::Index { action } => match action {
            IndexAction::Sync => {
                let engine = Engine::open(&cfg).await?;
                let metrics = MetricsRecorder::new();
                engine.retriever.prepare(&metrics).await?;
                println!(
                    "Index ({}) up to date: {} documents, {} external calls.",
                    engine.retriever.strategy(),
                    cfg.documents.len(),
                    metrics.len()
                );
            }
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

/// Open the store for read-only commands; a fresh database path gets the
/// schema instead of a missing-table error.
async fn open_store(cfg: &config::Config) -> Result<SqliteStore> {
    let pool = db::connect(cfg).await?;
    migrate::migrate_pool(&pool).await?;
    Ok(SqliteStore::new(pool))
}

fn print_summary(record: &RunRecord) {
    println!("Status: {}", record.status);
    if let Some(error) = &record.error {
        println!("Error: {}", error);
    }
    let Some(answer) = &record.answer else {
        return;
    };
    println!("\n{}\n", answer.summary);
    for (i, obligation) in answer.obligations.iter().enumerate() {
        println!(
            "{}. {} [{} {}]",
            i + 1,
            obligation.description,
            obligation.source.document_id,
            obligation.source.reference
        );
        if let Some(actions) = &obligation.actions {
            for action in actions {
                println!("   - {}", action);
            }
        }
    }
    for disclaimer in &answer.disclaimers {
        println!("Note: {}", disclaimer);
    }
}
