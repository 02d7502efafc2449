//! # Essay Review CLI (`essay-review`)
//!
//! ## Usage
//!
//! ```bash
//! essay-review --config ./config/essay.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `essay-review serve` | Start the HTTP server |
//! | `essay-review search "<keyword>"` | Rank documents in a scope by title similarity |
//! | `essay-review compare <original> <teacher>` | Compare a draft with its teacher revision |
//! | `essay-review correct <identifier>` | Print the corrected storage key |
//!
//! Logs go to stderr; set `RUST_LOG` to override the default
//! `essay_review=info` filter.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use essay_review::compare::{CompareOutcome, CompareRequest};
use essay_review::config;
use essay_review::identifier::correct_identifier;
use essay_review::models::TypeFilter;
use essay_review::server::{self, AppState};

/// Essay Review: document matching and draft/teacher-revision comparison.
///
/// All commands except `correct` and `compare --simulated` read a TOML
/// configuration file; see `config/essay.example.toml`.
#[derive(Parser)]
#[command(name = "essay-review", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/essay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Rank documents under a scope by title similarity to a keyword.
    Search {
        keyword: String,

        /// Key prefix to search under. Defaults to `[storage].default_scope`.
        #[arg(long)]
        scope: Option<String>,

        /// Document type filter: `all`, `draft`, `teacher_final`, ...
        #[arg(long = "type", default_value = "all")]
        doc_type: String,

        /// Minimum similarity (0-100). Defaults to `[search].min_similarity`.
        #[arg(long)]
        min_similarity: Option<f64>,
    },

    /// Compare a draft with its teacher revision and print the result as JSON.
    Compare {
        /// Storage key of the student's draft.
        original: Option<String>,

        /// Storage key of the teacher's revision.
        teacher: Option<String>,

        /// Direct URL for the draft, tried before the storage key.
        #[arg(long)]
        original_url: Option<String>,

        /// Direct URL for the teacher revision, tried before the storage key.
        #[arg(long)]
        teacher_url: Option<String>,

        /// Print the canned sample result without touching storage or the model.
        #[arg(long)]
        simulated: bool,
    },

    /// Print the corrected form of a storage key.
    Correct { identifier: String },
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("essay_review=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Correct { identifier } => {
            println!("{}", correct_identifier(identifier));
            return Ok(());
        }
        Commands::Compare {
            simulated: true, ..
        } => {
            print_json(&CompareOutcome::simulated())?;
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Search {
            keyword,
            scope,
            doc_type,
            min_similarity,
        } => {
            let state = AppState::from_config(&cfg)?;
            let search = state.search();
            let type_filter: TypeFilter = doc_type.parse()?;
            let scope = search.scope_or_default(scope.as_deref());
            let min_similarity = min_similarity.unwrap_or_else(|| search.min_similarity());

            let matches = search
                .search(scope, &keyword, type_filter, min_similarity)
                .await?;
            if matches.is_empty() {
                println!("No results.");
                return Ok(());
            }
            for (i, m) in matches.iter().enumerate() {
                println!(
                    "{}. [{:.2}] {} / {}",
                    i + 1,
                    m.score,
                    m.document.doc_type,
                    m.document.title
                );
                println!("    modified: {}", m.document.last_modified.format("%Y-%m-%d"));
                if !m.document.grade.is_empty() {
                    println!("    grade: {}", m.document.grade);
                }
                if let Some(ref url) = m.document.access_url {
                    println!("    url: {}", url);
                }
                println!("    id: {}", m.document.identifier);
                println!();
            }
        }
        Commands::Compare {
            original,
            teacher,
            original_url,
            teacher_url,
            simulated,
        } => {
            let state = AppState::from_config(&cfg)?;
            let request = CompareRequest {
                original_doc_id: original,
                teacher_doc_id: teacher,
                original_url,
                teacher_url,
                use_simulated_data: simulated,
            };
            let outcome = state.comparator().compare(&request).await?;
            print_json(&outcome)?;
        }
        Commands::Correct { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", text);
    Ok(())
}
