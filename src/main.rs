use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use ocr_index::commands::{indexing_commands, search_commands};
use ocr_index::{AppState, Config, ImageMatch, WorkerState};

#[derive(Parser)]
#[command(name = "ocr-index")]
#[command(about = "Index the text in a folder of images and search it")]
#[command(version)]
struct Cli {
    /// Folder whose images are indexed
    #[arg(long, global = true)]
    vault: Option<PathBuf>,

    /// Index database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// OCR service URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the index up to date and exit
    Scan {
        /// Re-run OCR on every image, not just changed ones
        #[arg(long)]
        rebuild: bool,
    },
    /// Keep the index up to date as files change
    Watch,
    /// Find images containing the given text
    Search {
        query: String,
        /// Print matches as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show index size and queue state
    Status,
    /// Remove every indexed image
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(vault) = cli.vault {
        config.vault_root = vault;
    }
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(endpoint) = cli.endpoint {
        config.ocr_endpoint = endpoint;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let state = Arc::new(AppState::from_config(&config).context("failed to open image index")?);

    match cli.command {
        Commands::Scan { rebuild } => {
            let outcome = indexing_commands::scan_and_process(&state, rebuild).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Watch => run_watch(&state, &config).await?,
        Commands::Search { query, json } => {
            let matches = search_commands::search(&state, &query);
            if json {
                println!("{}", serde_json::to_string_pretty(&matches)?);
            } else if matches.is_empty() {
                println!("no matching images");
            } else {
                for m in &matches {
                    println!("{}", render_match(m));
                }
            }
        }
        Commands::Status => {
            let status = indexing_commands::get_indexing_status(&state);
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Clear => {
            let removed = indexing_commands::clear_indexed_data(&state)?;
            println!("removed {removed} images from the index");
        }
    }

    Ok(())
}

/// One result as a name line plus the first matching text.
fn render_match(m: &ImageMatch) -> String {
    let mut out = format!("{}  ({})", m.file_name(), m.path);
    if let Some(preview) = m.preview() {
        out.push_str(&format!("\n    {preview}"));
    }
    let more = m.matching_regions.len().saturating_sub(1);
    if more > 0 {
        out.push_str(&format!("\n    +{more} more"));
    }
    out
}

/// Enqueues publish progress too; only a change of worker state is reported.
fn transitioned(last: &mut WorkerState, next: WorkerState) -> bool {
    if *last == next {
        return false;
    }
    *last = next;
    true
}

async fn run_watch(state: &Arc<AppState>, config: &Config) -> Result<()> {
    let mut progress = state.queue.subscribe();
    let report = indexing_commands::start_indexing(state, &config.vault_root)?;
    info!(
        eligible = report.eligible,
        queued = report.queued,
        "watching for changes, press Ctrl-C to stop"
    );

    let mut last_state = progress.borrow().state;
    loop {
        tokio::select! {
            changed = progress.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = progress.borrow_and_update().clone();
                if !transitioned(&mut last_state, snapshot.state) {
                    continue;
                }
                match snapshot.state {
                    WorkerState::Draining => info!(remaining = snapshot.queue_depth, "OCR in progress"),
                    WorkerState::Idle => info!(indexed = state.store.len(), "image index up to date"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    indexing_commands::stop_indexing(state);
    Ok(())
}
