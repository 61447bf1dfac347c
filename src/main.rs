use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use marquee::cache::{CacheStatus, CacheStore};
use marquee::config::Config;
use marquee::models::PlaybackState;
use marquee::player::{PlaybackSupervisor, PlayerLauncher, ProcessLauncher, StateWriter};
use marquee::playlist::{
    BackendProvider, PlaylistError, PlaylistProvider, PlaylistSource, SampleProvider,
    sample_playlist,
};
use marquee::workers::SyncWorker;

#[derive(Parser)]
#[command(name = "marquee", version, about = "Headless kiosk media-player agent")]
struct Cli {
    /// Path to the config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run playlist sync and playback supervision (the default)
    Run,
    /// Refresh the playlist and download the cache once, then exit
    Download,
    /// Run the playback supervisor without background sync
    PlayerOnly,
    /// Print cache and playback status as JSON
    Status,
    /// Delete all cached media files
    ResetCache,
}

#[derive(Serialize)]
struct PlaylistSummary {
    version: String,
    items: usize,
    loop_enabled: bool,
    last_updated: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
struct StatusReport {
    playlist: Option<PlaylistSummary>,
    playback: Option<PlaybackState>,
    cache: CacheStatus,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    config.ensure_directories()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config, true).await,
        Command::PlayerOnly => run(&config, false).await,
        Command::Download => download(&config).await,
        Command::Status => status(&config).await,
        Command::ResetCache => reset_cache(&config).await,
    }
}

fn build_provider(config: &Config) -> Result<Arc<dyn PlaylistProvider>> {
    if config.backend.enabled && !config.backend.base_url.is_empty() {
        info!("Using backend playlist provider: {}", config.backend.base_url);
        Ok(Arc::new(BackendProvider::new(&config.backend)?))
    } else {
        info!("Backend disabled, using the built-in sample provider");
        Ok(Arc::new(SampleProvider))
    }
}

fn build_source(config: &Config) -> Arc<PlaylistSource> {
    Arc::new(PlaylistSource::new(
        config.playlist_file(),
        config.playlist_backup_file(),
    ))
}

fn build_cache(config: &Config) -> Result<Arc<CacheStore>> {
    Ok(Arc::new(CacheStore::new(
        config.media_cache_dir(),
        &config.download,
    )?))
}

/// Assemble and run the agent: the sync worker and the playback
/// supervisor on independent schedules, stopped together on Ctrl-C.
async fn run(config: &Config, with_sync: bool) -> Result<()> {
    info!("Starting marquee agent (base dir {:?})", config.base_dir());

    let source = build_source(config);
    let cache = build_cache(config)?;
    let launcher: Arc<dyn PlayerLauncher> = Arc::new(ProcessLauncher::new(
        config.playback.stop_grace(),
        config.playback.stop_kill_wait(),
    ));

    let supervisor = Arc::new(PlaybackSupervisor::new(
        Arc::clone(&source),
        config.media_cache_dir(),
        launcher,
        config.playback.clone(),
        config.default_screen_path(),
        StateWriter::new(config.playback_state_file()),
    ));

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    if with_sync {
        let worker = Arc::new(SyncWorker::new(
            build_provider(config)?,
            Arc::clone(&source),
            Arc::clone(&cache),
            &config.backend,
            Some(sample_playlist()),
        ));
        let token = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            worker.run(token).await;
            Ok(())
        }));
    }

    {
        let token = shutdown.clone();
        let supervisor = Arc::clone(&supervisor);
        tasks.push(tokio::spawn(
            async move { supervisor.run(token).await },
        ));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    shutdown.cancel();

    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Task failed: {:#}", e),
            Err(e) => error!("Task panicked: {}", e),
        }
    }

    info!("Agent stopped");
    Ok(())
}

/// One-shot playlist refresh and cache download.
async fn download(config: &Config) -> Result<()> {
    let worker = SyncWorker::new(
        build_provider(config)?,
        build_source(config),
        build_cache(config)?,
        &config.backend,
        Some(sample_playlist()),
    );

    match worker.sync_once().await? {
        Some(batch) => {
            println!("{}", serde_json::to_string_pretty(&batch)?);
            if !batch.errors.is_empty() {
                std::process::exit(1);
            }
        }
        None => println!("No playlist content to download"),
    }
    Ok(())
}

async fn status(config: &Config) -> Result<()> {
    let source = build_source(config);
    let cache = build_cache(config)?;

    let playlist = match source.load_active() {
        Ok(p) => Some(PlaylistSummary {
            version: p.version,
            items: p.items.len(),
            loop_enabled: p.loop_enabled,
            last_updated: p.last_updated,
        }),
        Err(PlaylistError::NotFound) => None,
        Err(e) => return Err(e).context("Failed to read active playlist"),
    };

    let report = StatusReport {
        playlist,
        playback: StateWriter::load(&config.playback_state_file()).ok(),
        cache: cache.status().await?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn reset_cache(config: &Config) -> Result<()> {
    let cache = build_cache(config)?;
    let (removed, freed) = cache.reset().await?;
    println!("Removed {} cached files ({} bytes)", removed, freed);
    Ok(())
}
