//! # Film RAG CLI (`filmrag`)
//!
//! ## Usage
//!
//! ```bash
//! filmrag --config ./config/filmrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `filmrag prepare` | Merge the TMDB CSV and Letterboxd JSONL into the catalog |
//! | `filmrag build` | Embed catalog chunks and persist the vector index |
//! | `filmrag search "<query>"` | Print the nearest chunks |
//! | `filmrag ask "<query>"` | Retrieve chunks and generate one answer |
//! | `filmrag chat` | Interactive recommendation loop |
//! | `filmrag status` | Show whether a consistent index is on disk |
//!
//! Logs go to stderr (`RUST_LOG` or `-v` controls the level); command
//! output goes to stdout.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

use film_rag::{chat, config, engine, generate, indexer, prepare, store};

/// Film RAG: retrieval-augmented film recommendations.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/filmrag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "filmrag",
    about = "Film RAG: semantic search and recommendations over a movie catalog",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/filmrag.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace). Overrides RUST_LOG.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge the raw TMDB and Letterboxd datasets into the catalog CSV.
    Prepare,

    /// Build the vector index and its metadata from the catalog.
    ///
    /// Replaces any previous index. Tries the parallel accelerated
    /// context first and falls back to the portable path on failure.
    Build {
        /// Skip the accelerated context and train on the portable path.
        #[arg(long)]
        no_accel: bool,

        /// Only index the first N catalog rows (overrides `index.build_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Print the build summary as JSON and report progress as JSON lines.
        #[arg(long)]
        json: bool,
    },

    /// Search the index and print ranked chunks.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Retrieve chunks for a query and generate one answer.
    Ask {
        query: String,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Interactive query loop.
    Chat {
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Show the state of the on-disk index.
    Status {
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Prepare => {
            let summary = prepare::run_prepare(&cfg)?;
            println!(
                "Prepared {} films ({} merged; dropped {} unreleased, {} untitled, \
                 {} without overview, {} short overview, {} adult).",
                summary.kept,
                summary.merged_rows,
                summary.dropped_unreleased,
                summary.dropped_untitled,
                summary.dropped_no_overview,
                summary.dropped_short_overview,
                summary.dropped_adult
            );
        }
        Commands::Build {
            no_accel,
            limit,
            json,
        } => {
            let options = indexer::BuildOptions {
                use_acceleration: no_accel.then_some(false),
                limit,
            };
            indexer::run_build(&cfg, options, json).await?;
        }
        Commands::Search { query, top_k, json } => {
            engine::run_search(&cfg, &query, top_k, json).await?;
        }
        Commands::Ask { query, top_k } => {
            generate::run_ask(&cfg, &query, top_k).await?;
        }
        Commands::Chat { top_k } => {
            chat::run_chat(&cfg, top_k).await?;
        }
        Commands::Status { json } => {
            store::run_status(&cfg.paths, json)?;
        }
    }

    Ok(())
}
