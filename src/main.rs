// src/main.rs
//
// Watches the configured anime collections and plans a processing task for
// every anime folder until interrupted.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use anilibrary::application::{AppConfig, AppState, CollectionConfig};
use anilibrary::infrastructure::Logger;

#[derive(Debug, Parser)]
#[command(name = "anilibrary", version, about = "Live index of anime folders")]
struct Args {
    /// Configuration file (default: {CONFIG_DIR}/anilibrary/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Additional collection to watch, may be repeated
    #[arg(long = "collection", value_name = "NAME=PATH")]
    collections: Vec<String>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    /// Only watch collection roots, not the anime folders inside them
    #[arg(long)]
    no_folder_watch: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 1. CONFIGURATION
    let mut config = AppConfig::load_or_default(args.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if args.no_folder_watch {
        config.watch_anime_folders = false;
    }
    for collection in &args.collections {
        config.collections.push(CollectionConfig::parse(collection)?);
    }

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();

    // 2. SERVICES
    let logger = Logger::default();
    let state = AppState::initialize(&config, &logger);
    if state.library.collection_count() == 0 {
        warn!(target: logger.target(), "No collections configured; pass --collection NAME=PATH");
    }

    // 3. WATCH
    let scope = CancellationToken::new();
    state
        .task_planner
        .start(scope.clone())
        .context("failed to start task planner")?;
    let mut errors = state
        .library
        .watch_filesystem(&scope, config.watch_anime_folders)
        .context("failed to watch collections")?;

    info!(
        target: logger.target(),
        "Watching {} anime folders in {} collections",
        state.library.anime_folder_count(),
        state.library.collection_count()
    );

    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            result = &mut interrupted => {
                if let Err(err) = result {
                    error!(target: logger.target(), "Failed to listen for Ctrl-C: {}", err);
                }
                info!(target: logger.target(), "Interrupted");
                break;
            }
            _ = &mut deadline => {
                info!(target: logger.target(), "Duration elapsed");
                break;
            }
            reported = errors.recv() => match reported {
                Some(err) => error!(target: logger.target(), "Watch error: {}", err),
                None => break,
            },
        }
    }

    // 4. SUMMARY
    info!(
        target: logger.target(),
        "{} anime folders tracked, {} tasks pending, {} events broadcast",
        state.library.anime_folder_count(),
        state.task_planner.pending_count(),
        state.library.event_log().len()
    );
    for task in state.task_planner.pending_tasks() {
        info!(target: logger.target(), "Pending: {}", task);
    }

    // 5. SHUTDOWN
    scope.cancel();
    while let Some(err) = errors.recv().await {
        error!(target: logger.target(), "Watch error: {}", err);
    }
    state.shutdown().await?;
    info!(target: logger.target(), "Stopped");

    Ok(())
}
