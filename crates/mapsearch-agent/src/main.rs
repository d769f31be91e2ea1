//! Operational entry point for the map search agent.
//!
//! The agent answers map questions by generating Cypher from few-shot
//! examples. This binary maintains the example store and exposes its
//! retrieval path for inspection.
//!
//! # Commands
//!
//! ```text
//! migrate            apply schema migrations, ensure the HNSW index
//! sweep              delete expired examples every SWEEP_INTERVAL_SECS until Ctrl-C
//! search <text>      embed <text>, print the closest examples as JSON
//! cypher <stmt>      run a read-only Cypher statement, print rows as JSON
//! ```
//!
//! Logs go to stderr; `LOG_FORMAT=json` switches them to JSON lines.
//! Command results go to stdout.

mod app;
mod config;
mod error;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::config::AppConfig;
use crate::error::AppError;

/// Map search agent maintenance and retrieval tools.
#[derive(Parser)]
#[command(name = "mapsearch-agent", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Apply schema migrations and ensure the vector index exists.
    Migrate,

    /// Periodically delete expired few-shot examples.
    Sweep {
        /// Run a single sweep and exit.
        #[arg(long)]
        once: bool,
    },

    /// Print the stored examples most similar to a question.
    Search {
        /// Natural-language question.
        text: String,

        /// Maximum number of hits (default: `VECTOR_SEARCH_LIMIT`).
        #[arg(short, long)]
        limit: Option<usize>,

        /// Minimum similarity score (default: `VECTOR_SEARCH_CUTOFF`).
        #[arg(short, long)]
        cutoff: Option<f64>,
    },

    /// Run a read-only Cypher statement against `Neo4j`.
    Cypher {
        /// Cypher statement.
        statement: String,

        /// Statement parameters as a JSON object.
        #[arg(short, long, default_value = "{}")]
        params: String,
    },
}

/// Application entry point.
///
/// Initializes logging, loads configuration from environment variables,
/// connects the shared pools, then runs the requested command.
#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr);

    if std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    info!(
        app = config.app_name,
        graph_enabled = config.graph.is_some(),
        embedding_enabled = config.embedding.base_url.is_some(),
        "configuration loaded"
    );

    let app = App::connect(config).await?;
    let result = match cli.command {
        Commands::Migrate => app.migrate().await,
        Commands::Sweep { once: true } => app.sweep_once().await.map(|deleted| {
            info!(deleted, "sweep complete");
        }),
        Commands::Sweep { once: false } => app.sweep().await,
        Commands::Search {
            text,
            limit,
            cutoff,
        } => app
            .search(&text, limit, cutoff)
            .await
            .and_then(|hits| print_json(&Value::Array(hits))),
        Commands::Cypher { statement, params } => app
            .cypher(&statement, &params)
            .await
            .and_then(|rows| print_json(&Value::Array(rows.into_iter().map(Value::Object).collect()))),
    };
    app.close().await;
    result
}

fn print_json(value: &Value) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
