use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{BatchResult, CacheStore};
use crate::config::BackendConfig;
use crate::models::Playlist;
use crate::playlist::{PlaylistError, PlaylistProvider, PlaylistSource};

/// Periodic playlist-refresh and cache-sync schedule.
///
/// Each cycle asks the provider for a playlist (best-effort), swaps the
/// active document when the version changed, downloads the batch, and
/// prunes stale cache entries after a swap. Runs independently of the
/// playback supervisor; the two coordinate only through the filesystem.
pub struct SyncWorker {
    provider: Arc<dyn PlaylistProvider>,
    source: Arc<PlaylistSource>,
    cache: Arc<CacheStore>,
    refresh_interval: Duration,
    default_playlist_delay: Duration,
    fallback: Option<Playlist>,
    started_at: Instant,
}

impl SyncWorker {
    pub fn new(
        provider: Arc<dyn PlaylistProvider>,
        source: Arc<PlaylistSource>,
        cache: Arc<CacheStore>,
        config: &BackendConfig,
        fallback: Option<Playlist>,
    ) -> Self {
        Self {
            provider,
            source,
            cache,
            refresh_interval: config.refresh_interval(),
            default_playlist_delay: config.default_playlist_delay(),
            fallback,
            started_at: Instant::now(),
        }
    }

    /// One refresh/download/prune cycle. Exposed so tests and the
    /// one-shot download mode drive iterations without the schedule.
    pub async fn sync_once(&self) -> Result<Option<BatchResult>> {
        let fetched = match self.provider.fetch_playlist().await {
            Ok(playlist) => playlist,
            Err(e) => {
                // Provider failures are transient; the next cycle retries
                warn!("Playlist provider unavailable: {:#}", e);
                None
            }
        };

        let swapped = match fetched {
            Some(playlist) => self
                .source
                .try_swap(&playlist)
                .context("Failed to swap active playlist")?,
            None => self.install_fallback()?,
        };

        let playlist = match self.source.load_active() {
            Ok(playlist) => playlist,
            Err(PlaylistError::NotFound) => {
                debug!("No active playlist yet, nothing to sync");
                return Ok(None);
            }
            Err(e) => return Err(e).context("Active playlist unreadable"),
        };
        if playlist.items.is_empty() {
            debug!("Active playlist v{} has no items", playlist.version);
            return Ok(None);
        }

        let batch = self.cache.fetch_all(&playlist).await?;
        info!(
            "Cache sync v{}: {} downloaded, {} cached, {} errors",
            playlist.version,
            batch.downloaded,
            batch.cached,
            batch.errors.len()
        );

        if swapped {
            let pruned = self.cache.prune(&playlist).await?;
            if !pruned.deleted_files.is_empty() {
                info!(
                    "Pruned {} stale files ({} bytes)",
                    pruned.deleted_files.len(),
                    pruned.freed_bytes
                );
            }
        }

        Ok(Some(batch))
    }

    /// Install the built-in fallback playlist when the provider has
    /// nothing, no active document exists, and the startup delay has
    /// passed.
    fn install_fallback(&self) -> Result<bool> {
        let Some(fallback) = &self.fallback else {
            return Ok(false);
        };
        if !matches!(self.source.load_active(), Err(PlaylistError::NotFound)) {
            return Ok(false);
        }
        if self.started_at.elapsed() < self.default_playlist_delay {
            debug!("No playlist yet, holding off on the fallback");
            return Ok(false);
        }

        info!(
            "No backend playlist after {:?}, installing fallback v{}",
            self.default_playlist_delay, fallback.version
        );
        self.source
            .try_swap(fallback)
            .context("Failed to install fallback playlist")
    }

    /// Run cycles on the refresh interval until `shutdown` fires. Cycle
    /// failures are logged; the schedule itself never stops on one.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Cache sync worker started ({:?} interval)",
            self.refresh_interval
        );
        loop {
            if let Err(e) = self.sync_once().await {
                warn!("Sync cycle failed: {:#}", e);
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.refresh_interval) => {}
            }
        }
        info!("Cache sync worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownloadConfig;
    use crate::models::PlaylistItem;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Provider returning whatever the test put in it.
    struct StubProvider {
        playlist: Mutex<Option<Playlist>>,
    }

    impl StubProvider {
        fn new(playlist: Option<Playlist>) -> Self {
            Self {
                playlist: Mutex::new(playlist),
            }
        }

        fn set(&self, playlist: Option<Playlist>) {
            *self.playlist.lock().unwrap() = playlist;
        }
    }

    #[async_trait]
    impl PlaylistProvider for StubProvider {
        async fn fetch_playlist(&self) -> Result<Option<Playlist>> {
            Ok(self.playlist.lock().unwrap().clone())
        }
    }

    struct Fixture {
        dir: TempDir,
        provider: Arc<StubProvider>,
        source: Arc<PlaylistSource>,
        cache: Arc<CacheStore>,
    }

    impl Fixture {
        fn new(provider: StubProvider) -> Self {
            let dir = TempDir::new().unwrap();
            let source = Arc::new(PlaylistSource::new(
                dir.path().join("current_playlist.json"),
                dir.path().join("current_playlist.json.backup"),
            ));
            let cache = Arc::new(
                CacheStore::new(dir.path().join("media_cache"), &DownloadConfig::default())
                    .unwrap(),
            );
            Self {
                dir,
                provider: Arc::new(provider),
                source,
                cache,
            }
        }

        fn worker(&self, config: &BackendConfig, fallback: Option<Playlist>) -> SyncWorker {
            SyncWorker::new(
                Arc::clone(&self.provider) as Arc<dyn PlaylistProvider>,
                Arc::clone(&self.source),
                Arc::clone(&self.cache),
                config,
                fallback,
            )
        }

        fn cached(&self, name: &str) -> std::path::PathBuf {
            self.dir.path().join("media_cache").join(name)
        }
    }

    fn playlist_for(version: &str, server: &mockito::Server, files: &[&str]) -> Playlist {
        Playlist::new(
            version,
            files
                .iter()
                .map(|f| PlaylistItem::new(*f, format!("{}/{}", server.url(), f)))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_cycle_swaps_and_downloads() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/a.mp4")
            .with_body(b"video bytes")
            .create_async()
            .await;

        let playlist = playlist_for("v1", &server, &["a.mp4"]);
        let fixture = Fixture::new(StubProvider::new(Some(playlist)));
        let worker = fixture.worker(&BackendConfig::default(), None);

        let batch = worker.sync_once().await.unwrap().unwrap();
        assert_eq!(batch.downloaded, 1);
        assert!(batch.errors.is_empty());
        assert_eq!(
            std::fs::read(fixture.cached("a.mp4")).unwrap(),
            b"video bytes"
        );
        assert_eq!(fixture.source.load_active().unwrap().version, "v1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_same_version_republish_is_ignored() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/a.mp4")
            .with_body(b"a")
            .create_async()
            .await;

        let fixture = Fixture::new(StubProvider::new(Some(playlist_for(
            "v1",
            &server,
            &["a.mp4"],
        ))));
        let worker = fixture.worker(&BackendConfig::default(), None);
        worker.sync_once().await.unwrap();

        // Same version, different content: never propagates
        fixture
            .provider
            .set(Some(playlist_for("v1", &server, &["b.mp4"])));
        worker.sync_once().await.unwrap();

        let active = fixture.source.load_active().unwrap();
        assert_eq!(active.items[0].filename.as_deref(), Some("a.mp4"));
    }

    #[tokio::test]
    async fn test_swap_prunes_files_dropped_from_playlist() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/a.mp4")
            .with_body(b"a")
            .create_async()
            .await;
        server
            .mock("GET", "/b.mp4")
            .with_body(b"b")
            .create_async()
            .await;

        let fixture = Fixture::new(StubProvider::new(Some(playlist_for(
            "v1",
            &server,
            &["a.mp4"],
        ))));
        let worker = fixture.worker(&BackendConfig::default(), None);
        worker.sync_once().await.unwrap();
        assert!(fixture.cached("a.mp4").exists());

        fixture
            .provider
            .set(Some(playlist_for("v2", &server, &["b.mp4"])));
        worker.sync_once().await.unwrap();

        assert!(fixture.cached("b.mp4").exists());
        assert!(!fixture.cached("a.mp4").exists());
    }

    #[tokio::test]
    async fn test_fallback_waits_for_the_startup_delay() {
        let fixture = Fixture::new(StubProvider::new(None));
        let fallback = Playlist::new("fallback-v1", vec![]);

        let config = BackendConfig {
            default_playlist_delay_secs: 3600.0,
            ..Default::default()
        };
        let worker = fixture.worker(&config, Some(fallback));

        assert!(worker.sync_once().await.unwrap().is_none());
        assert!(matches!(
            fixture.source.load_active(),
            Err(PlaylistError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_fallback_installs_after_the_delay() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/sample.mp4")
            .with_body(b"sample")
            .create_async()
            .await;

        let fixture = Fixture::new(StubProvider::new(None));
        let fallback = playlist_for("fallback-v1", &server, &["sample.mp4"]);

        let config = BackendConfig {
            default_playlist_delay_secs: 0.0,
            ..Default::default()
        };
        let worker = fixture.worker(&config, Some(fallback));

        let batch = worker.sync_once().await.unwrap().unwrap();
        assert_eq!(batch.downloaded, 1);
        assert_eq!(
            fixture.source.load_active().unwrap().version,
            "fallback-v1"
        );

        // An active document keeps the fallback from reinstalling
        fixture.source.try_swap(&Playlist::new("v9", vec![])).unwrap();
        worker.sync_once().await.unwrap();
        assert_eq!(fixture.source.load_active().unwrap().version, "v9");
    }

    #[tokio::test]
    async fn test_provider_failure_is_transient() {
        struct FailingProvider;

        #[async_trait]
        impl PlaylistProvider for FailingProvider {
            async fn fetch_playlist(&self) -> Result<Option<Playlist>> {
                anyhow::bail!("backend unreachable")
            }
        }

        let dir = TempDir::new().unwrap();
        let source = Arc::new(PlaylistSource::new(
            dir.path().join("current_playlist.json"),
            dir.path().join("current_playlist.json.backup"),
        ));
        let cache = Arc::new(
            CacheStore::new(dir.path().join("media_cache"), &DownloadConfig::default()).unwrap(),
        );
        let worker = SyncWorker::new(
            Arc::new(FailingProvider),
            source,
            cache,
            &BackendConfig::default(),
            None,
        );

        // A failing provider is not a cycle failure
        assert!(worker.sync_once().await.unwrap().is_none());
    }
}
