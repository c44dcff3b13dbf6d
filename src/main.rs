//! # vector-index CLI (`vidx`)
//!
//! ## Usage
//!
//! ```bash
//! vidx --config ./config/vidx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vidx init` | Create the SQLite database and run schema migrations |
//! | `vidx indexes` | List configured indexes and their sources |
//! | `vidx build [NAMES..]` | Rebuild the named (or all) indexes |
//! | `vidx search <INDEX> "<query>"` | Search an index, objects or raw documents |
//! | `vidx similar <INDEX> <SOURCE> <PK>` | Find objects similar to a stored record |
//! | `vidx cache clear` | Delete every cached embedding |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use vector_index::search::SearchOptions;
use vector_index::{build_cmd, cache_cmd, config, migrate, search};

#[derive(Parser)]
#[command(
    name = "vidx",
    about = "vector-index: chunk, embed, store and search structured records",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vidx.toml")]
    config: PathBuf,

    /// Log at debug level (overrides RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// List configured indexes, their storage and sources.
    Indexes,

    /// Rebuild indexes from their sources.
    ///
    /// Unknown names are rejected before anything is built. Indexes are
    /// rebuilt one at a time; the command fails if any rebuild failed.
    Build {
        /// Index names to rebuild. All indexes when omitted.
        names: Vec<String>,

        /// List the indexes that would be rebuilt without touching them.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search an index and print JSON results.
    Search {
        /// Index name.
        index: String,

        /// The search query string.
        query: String,

        /// Return raw documents (chunks) instead of source objects.
        #[arg(long)]
        documents: bool,

        /// Maximum number of results. Defaults to `retrieval.default_limit`.
        #[arg(long)]
        limit: Option<usize>,

        /// Number of results to skip.
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Metadata equality filter as `key=value`. Repeatable.
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,
    },

    /// Find objects similar to a stored record.
    Similar {
        /// Index name.
        index: String,

        /// Source id within the index (defaults to the model label).
        source_id: String,

        /// Primary key of the record.
        pk: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Manage the embedding cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Delete every cached embedding.
    Clear,
}

/// Parse a `key=value` pair for `--filter` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Indexes => {
            build_cmd::list_indexes(&cfg);
        }
        Commands::Build { names, dry_run } => {
            build_cmd::run_build(&cfg, &names, dry_run).await?;
        }
        Commands::Search {
            index,
            query,
            documents,
            limit,
            offset,
            filters,
        } => {
            let options = SearchOptions {
                documents,
                limit,
                offset,
                filters,
            };
            search::run_search(&cfg, &index, &query, options).await?;
        }
        Commands::Similar {
            index,
            source_id,
            pk,
            limit,
        } => {
            search::run_similar(&cfg, &index, &source_id, &pk, limit).await?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Clear => {
                cache_cmd::run_cache_clear(&cfg).await?;
            }
        },
    }

    Ok(())
}
