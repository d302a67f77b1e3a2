use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nearby_urls::config::ConfigLoader;
use nearby_urls::{
    CacheSettings, HttpResolver, LogNotifier, SqliteStore, UrlManager, UrlObservation,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing_subscriber::{EnvFilter, fmt};
use url::Url;

#[derive(Parser)]
#[command(name = "nearby-urls")]
#[command(about = "Nearby beacon URL cache with resolution and notifications", long_about = None)]
struct Cli {
    /// Configuration file (json, yaml or toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a JSON-lines file of scan events through the cache
    Replay {
        /// File with one `found`/`lost` event per line
        events: PathBuf,
    },
    /// Print cached URLs as JSON lines
    List {
        /// Only URLs currently nearby, resolved or not
        #[arg(short, long)]
        nearby: bool,
    },
    /// Forget nearby URLs, or everything with --all
    Clear {
        #[arg(short, long)]
        all: bool,
    },
}

#[derive(Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum ScanEvent {
    Found(UrlObservation),
    Lost(UrlObservation),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::load_or_default(cli.config.as_deref())?;

    let store = Arc::new(SqliteStore::open(&config.store_path).await?);
    let resolver = Arc::new(HttpResolver::new(&config.resolver).context("Invalid resolver settings")?);
    let mut manager = UrlManager::builder(resolver, Arc::new(LogNotifier::default()), store.clone())
        .settings(CacheSettings::from(&config))
        .build();

    match cli.command {
        Commands::Replay { events } => {
            tracing::info!("Replaying scan events from {}", events.display());
            tokio::select! {
                res = replay(&mut manager, &events) => {
                    if let Err(e) = res {
                        tracing::error!("Replay error: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down gracefully...");
                }
            }
            tracing::info!(
                "{} URLs nearby, {} resolved",
                manager.get_urls(true).len(),
                manager.get_urls(false).len()
            );
        }
        Commands::List { nearby } => {
            for entry in manager.get_urls(nearby) {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        Commands::Clear { all } => {
            if all {
                manager.clear_all_urls();
                tracing::info!("Cleared all cached URLs");
            } else {
                manager.clear_nearby_urls();
                tracing::info!("Cleared nearby URLs");
            }
        }
    }

    store.flush().await?;
    Ok(())
}

async fn replay(manager: &mut UrlManager, path: &Path) -> Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open events file: {}", path.display()))?;
    let mut lines = LinesStream::new(BufReader::new(file).lines());

    let mut line_no = 0usize;
    while let Some(line) = lines.next().await {
        let line = line?;
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let event: ScanEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Skipping line {}: {}", line_no, e);
                continue;
            }
        };

        match event {
            ScanEvent::Found(observation) => {
                if is_valid_url(&observation.url, line_no) {
                    manager.add_url(observation);
                }
            }
            ScanEvent::Lost(observation) => {
                if is_valid_url(&observation.url, line_no) {
                    manager.remove_url(&observation);
                }
            }
        }
        manager.process_pending();
    }

    manager.settle().await;
    Ok(())
}

fn is_valid_url(url: &str, line_no: usize) -> bool {
    match Url::parse(url) {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!("Skipping line {}: invalid URL {:?}: {}", line_no, url, e);
            false
        }
    }
}
