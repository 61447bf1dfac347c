use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::command;
use super::process::{PlayerHandle, PlayerLauncher};
use super::state::{self, StateWriter};
use crate::config::PlaybackConfig;
use crate::models::{PlaybackStatus, Playlist};
use crate::playlist::{PlaylistError, PlaylistSource};

/// Pause before resuming the loop after an unexpected tick failure.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Why the supervisor stopped waiting on the current player process.
enum WaitOutcome {
    Exited(Option<i32>),
    PlaylistChanged,
    Shutdown,
}

/// Mutable walk state threaded through supervisory ticks.
#[derive(Default)]
struct Walk {
    playlist: Option<Playlist>,
    index: usize,
    waiting_since: Option<Instant>,
    finished: bool,
    default_screen: Option<Box<dyn PlayerHandle>>,
}

impl Walk {
    fn version(&self) -> Option<String> {
        self.playlist.as_ref().map(|p| p.version.clone())
    }

    fn total(&self) -> usize {
        self.playlist.as_ref().map(|p| p.items.len()).unwrap_or(0)
    }
}

/// Walks the active playlist in order, one external player process per
/// item.
///
/// The supervisor never downloads: it is fed by the cache sync worker
/// through the filesystem, and a missing file for the current item is a
/// per-item skip, not a failure. Playlist hot-swaps are detected by
/// version string on every tick (including mid-playback) and restart the
/// walk from index zero. Every transition is written to the
/// playback-state document.
pub struct PlaybackSupervisor {
    source: Arc<PlaylistSource>,
    media_dir: PathBuf,
    launcher: Arc<dyn PlayerLauncher>,
    config: PlaybackConfig,
    default_screen: PathBuf,
    state: StateWriter,
}

impl PlaybackSupervisor {
    pub fn new(
        source: Arc<PlaylistSource>,
        media_dir: PathBuf,
        launcher: Arc<dyn PlayerLauncher>,
        config: PlaybackConfig,
        default_screen: PathBuf,
        state: StateWriter,
    ) -> Self {
        Self {
            source,
            media_dir,
            launcher,
            config,
            default_screen,
            state,
        }
    }

    /// Run the supervisory loop until `shutdown` fires.
    ///
    /// A failure inside a single tick is recorded as `status=error` and
    /// the loop resumes after a backoff; the supervisor itself never
    /// terminates because of one.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Playback supervisor started");
        let mut walk = Walk::default();
        self.report(PlaybackStatus::Starting, None, &walk, None);

        while !shutdown.is_cancelled() {
            if let Err(e) = self.tick(&mut walk, &shutdown).await {
                error!("Playback tick failed: {:#}", e);
                self.report(
                    PlaybackStatus::Error,
                    None,
                    &walk,
                    Some(format!("{:#}", e)),
                );
                if sleep_or_shutdown(ERROR_BACKOFF, &shutdown).await {
                    break;
                }
            }
        }

        if let Some(mut screen) = walk.default_screen.take() {
            let _ = screen.stop().await;
        }
        self.report(PlaybackStatus::Stopped, None, &walk, None);
        info!("Playback supervisor stopped");
        Ok(())
    }

    /// One supervisory tick: reload the playlist, then either wait for
    /// content or play the item at the current index.
    async fn tick(&self, walk: &mut Walk, shutdown: &CancellationToken) -> Result<()> {
        self.reload_playlist(walk);

        let has_items = walk
            .playlist
            .as_ref()
            .map(|p| !p.items.is_empty())
            .unwrap_or(false);

        if !has_items {
            return self.wait_for_content(walk, shutdown).await;
        }

        walk.waiting_since = None;
        if let Some(mut screen) = walk.default_screen.take() {
            info!("Content available, stopping default screen");
            let _ = screen.stop().await;
        }

        // Clone so the walk stays mutable while we play
        let Some(playlist) = walk.playlist.clone() else {
            return Ok(());
        };

        if walk.index >= playlist.items.len() {
            if playlist.loop_enabled {
                debug!("End of playlist, looping back to start");
                walk.index = 0;
            } else {
                if !walk.finished {
                    info!("End of playlist v{}, loop disabled", playlist.version);
                    walk.finished = true;
                    self.report(PlaybackStatus::Finished, None, walk, None);
                }
                // Idle until a playlist change is observed
                sleep_or_shutdown(self.config.check_interval(), shutdown).await;
                return Ok(());
            }
        }

        self.play_current(walk, &playlist, shutdown).await
    }

    /// Reload the active playlist; a version change restarts the walk
    /// from index zero. An unreadable document keeps the current walk.
    fn reload_playlist(&self, walk: &mut Walk) {
        let loaded = match self.source.load_active() {
            Ok(p) => p,
            Err(PlaylistError::NotFound) => return,
            Err(e) => {
                warn!("Active playlist unreadable, keeping current walk: {}", e);
                return;
            }
        };

        let changed = walk
            .playlist
            .as_ref()
            .map(|current| !current.same_version_as(&loaded))
            .unwrap_or(true);
        if !changed {
            return;
        }

        info!(
            "Playlist changed to v{} ({} items, loop={}), restarting walk",
            loaded.version,
            loaded.items.len(),
            loaded.loop_enabled
        );
        walk.playlist = Some(loaded);
        walk.index = 0;
        walk.finished = false;
        walk.waiting_since = None;
    }

    /// One waiting step: record when waiting began, bring up the default
    /// screen once the configured timeout has passed, then re-poll.
    async fn wait_for_content(&self, walk: &mut Walk, shutdown: &CancellationToken) -> Result<()> {
        if walk.waiting_since.is_none() {
            info!("No playable content, waiting");
            walk.waiting_since = Some(Instant::now());
            self.report(PlaybackStatus::Waiting, None, walk, None);
        }

        let waited = walk
            .waiting_since
            .map(|t| t.elapsed())
            .unwrap_or_default();
        if self.config.show_default_screen
            && walk.default_screen.is_none()
            && waited >= self.config.default_screen_timeout()
        {
            info!("Still no content after {:?}, showing default screen", waited);
            let cmd = command::default_screen_command(&self.default_screen);
            match self.launcher.launch(&cmd).await {
                Ok(handle) => {
                    walk.default_screen = Some(handle);
                    self.report(PlaybackStatus::ShowingDefault, None, walk, None);
                }
                Err(e) => warn!("Failed to launch default screen: {:#}", e),
            }
        }

        sleep_or_shutdown(self.config.check_interval(), shutdown).await;
        Ok(())
    }

    /// Play the item at the current index and advance.
    async fn play_current(
        &self,
        walk: &mut Walk,
        playlist: &Playlist,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let item = &playlist.items[walk.index];

        let Some(filename) = item.filename.as_deref() else {
            warn!("Item {} has no filename, skipping", walk.index);
            walk.index += 1;
            sleep_or_shutdown(self.config.check_interval(), shutdown).await;
            return Ok(());
        };

        let media_path = self.media_dir.join(filename);
        if !media_path.exists() {
            // The sync worker may simply not have caught up yet
            warn!("Media not yet cached, skipping: {}", filename);
            walk.index += 1;
            sleep_or_shutdown(self.config.check_interval(), shutdown).await;
            return Ok(());
        }

        info!(
            "Playing item {}/{}: {}",
            walk.index + 1,
            playlist.items.len(),
            filename
        );
        self.report(PlaybackStatus::Playing, Some(filename), walk, None);

        let cmd = command::player_command(&media_path, item, &self.config);
        let mut handle = self.launcher.launch(&cmd).await?;

        let outcome = {
            let mut exited = handle.wait();
            loop {
                tokio::select! {
                    result = &mut exited => break WaitOutcome::Exited(result?),
                    _ = shutdown.cancelled() => break WaitOutcome::Shutdown,
                    _ = sleep(self.config.check_interval()) => {
                        if self.version_changed(playlist) {
                            break WaitOutcome::PlaylistChanged;
                        }
                    }
                }
            }
        };

        match outcome {
            WaitOutcome::Exited(code) => {
                match code {
                    Some(0) => debug!("Player finished: {}", filename),
                    Some(code) => {
                        // A misbehaving codec must never stall the loop
                        warn!("Player exited with code {} for {}", code, filename);
                    }
                    None => warn!("Player terminated by signal for {}", filename),
                }
                walk.index += 1;
            }
            WaitOutcome::PlaylistChanged => {
                info!("Playlist changed mid-playback, stopping current player");
                handle.stop().await?;
                // The next tick reloads and restarts the walk at zero
            }
            WaitOutcome::Shutdown => {
                info!("Shutdown requested, stopping current player");
                handle.stop().await?;
            }
        }

        Ok(())
    }

    fn version_changed(&self, current: &Playlist) -> bool {
        match self.source.load_active() {
            Ok(p) => !p.same_version_as(current),
            Err(_) => false,
        }
    }

    fn report(
        &self,
        status: PlaybackStatus,
        current_item: Option<&str>,
        walk: &Walk,
        message: Option<String>,
    ) {
        self.state.write(&state::state(
            status,
            current_item,
            walk.index,
            walk.version(),
            walk.total(),
            message,
        ));
    }
}

/// Returns true if shutdown fired before the interval elapsed.
async fn sleep_or_shutdown(interval: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = sleep(interval) => false,
    }
}
