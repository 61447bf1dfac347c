use anyhow::{Context, Result, bail};
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::checksum::{self, ChecksumAlgorithm};
use super::progress::{DownloadStatus, ProgressTracker};
use crate::config::DownloadConfig;
use crate::models::{Playlist, PlaylistItem};

/// Suffix appended to the final filename while a transfer is in flight.
/// Files carrying it are never visible to playback or pruning.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Why `needs_download` decided the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchReason {
    /// Item is missing filename or url; it can never be fetched
    MissingMetadata,
    NotCached,
    EmptyFile,
    ChecksumMismatch,
    ChecksumValid,
    /// File present, no checksum supplied: trusted on existence
    ExistsNoChecksum,
}

impl FetchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingMetadata => "missing metadata",
            Self::NotCached => "not cached",
            Self::EmptyFile => "empty file",
            Self::ChecksumMismatch => "checksum mismatch",
            Self::ChecksumValid => "checksum valid",
            Self::ExistsNoChecksum => "exists in cache",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchDecision {
    pub needed: bool,
    pub reason: FetchReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Downloaded,
    Cached,
    Error,
}

/// Outcome of fetching a single item. Individual failures are reported
/// here, never raised.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub filename: String,
    pub status: FetchStatus,
    pub reason: String,
    pub bytes_downloaded: u64,
}

impl FetchResult {
    fn error(filename: &str, reason: impl Into<String>) -> Self {
        Self {
            filename: filename.to_string(),
            status: FetchStatus::Error,
            reason: reason.into(),
            bytes_downloaded: 0,
        }
    }
}

/// Aggregated outcome of a whole-playlist fetch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub downloaded: usize,
    pub cached: usize,
    pub errors: Vec<FetchResult>,
    pub total_bytes_downloaded: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PruneResult {
    pub deleted_files: Vec<String>,
    pub freed_bytes: u64,
    pub kept_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachedFileInfo {
    pub filename: String,
    pub size: u64,
    pub modified: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub total_files: usize,
    pub total_bytes: u64,
    pub files: Vec<CachedFileInfo>,
}

/// Keeps the local media cache consistent with a declared playlist.
///
/// The cache directory itself is the source of truth: one file per item,
/// named by the item's `filename`, no separate index. Integrity comes
/// from the download discipline: stream to a temp sibling, verify the
/// checksum, then atomically rename, so a reader of a final path never
/// observes partial or corrupt content.
pub struct CacheStore {
    cache_dir: PathBuf,
    http_client: Client,
    algorithm: ChecksumAlgorithm,
    max_concurrent: usize,
    progress: ProgressTracker,
}

impl CacheStore {
    pub fn new(cache_dir: PathBuf, config: &DownloadConfig) -> Result<Self> {
        let algorithm = config.checksum_algorithm.parse()?;
        // Connect and read-inactivity deadlines, not a cap on total
        // transfer time: a large file on a slow link is fine as long as
        // bytes keep arriving.
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .read_timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("marquee/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            cache_dir,
            http_client,
            algorithm,
            max_concurrent: config.max_concurrent.max(1),
            progress: ProgressTracker::new(),
        })
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn media_path(&self, filename: &str) -> PathBuf {
        self.cache_dir.join(filename)
    }

    fn temp_path(&self, filename: &str) -> PathBuf {
        self.cache_dir.join(format!("{}{}", filename, TEMP_SUFFIX))
    }

    /// Decide whether an item must be fetched. Idempotent: two calls
    /// without cache mutation yield the same decision.
    pub fn needs_download(&self, item: &PlaylistItem) -> FetchDecision {
        let (Some(filename), Some(_url)) = (&item.filename, &item.url) else {
            return FetchDecision {
                needed: false,
                reason: FetchReason::MissingMetadata,
            };
        };

        let cached_path = self.media_path(filename);
        if !cached_path.exists() {
            debug!("File not in cache: {}", filename);
            return FetchDecision {
                needed: true,
                reason: FetchReason::NotCached,
            };
        }

        let file_size = std::fs::metadata(&cached_path).map(|m| m.len()).unwrap_or(0);
        if file_size == 0 {
            warn!("Cached file is empty: {}", filename);
            return FetchDecision {
                needed: true,
                reason: FetchReason::EmptyFile,
            };
        }

        if let Some(expected) = &item.checksum {
            // A digest failure counts as a failed verification, never as
            // a valid file.
            match checksum::digest(&cached_path, self.algorithm) {
                Ok(actual) if &actual == expected => {
                    debug!("Checksum verified for {}", filename);
                    FetchDecision {
                        needed: false,
                        reason: FetchReason::ChecksumValid,
                    }
                }
                Ok(actual) => {
                    warn!(
                        "Checksum mismatch for {}: expected {}, got {}",
                        filename, expected, actual
                    );
                    FetchDecision {
                        needed: true,
                        reason: FetchReason::ChecksumMismatch,
                    }
                }
                Err(e) => {
                    warn!("Checksum verification failed for {}: {}", filename, e);
                    FetchDecision {
                        needed: true,
                        reason: FetchReason::ChecksumMismatch,
                    }
                }
            }
        } else {
            // Trust-on-existence policy: without a checksum the store
            // cannot detect silent corruption.
            debug!(
                "File exists in cache, no checksum verification: {} ({} bytes)",
                filename, file_size
            );
            FetchDecision {
                needed: false,
                reason: FetchReason::ExistsNoChecksum,
            }
        }
    }

    /// Fetch one item into the cache.
    ///
    /// Never raises for per-item failures: network errors and checksum
    /// mismatches are reported in the result, the temp file is removed,
    /// and any pre-existing final file is left untouched.
    pub async fn fetch(&self, item: &PlaylistItem) -> FetchResult {
        let filename = item.filename.as_deref().unwrap_or("unknown");

        let decision = self.needs_download(item);
        if !decision.needed {
            if decision.reason == FetchReason::MissingMetadata {
                debug!("Skipping inert item: {}", filename);
            } else {
                info!("Using cached file: {} ({})", filename, decision.reason.as_str());
            }
            return FetchResult {
                filename: filename.to_string(),
                status: FetchStatus::Cached,
                reason: decision.reason.as_str().to_string(),
                bytes_downloaded: 0,
            };
        }

        // needs_download only says "needed" when both fields are present
        let url = item.url.as_deref().expect("downloadable item has url");

        match self.download_to_cache(filename, url, item.checksum.as_deref()).await {
            Ok(bytes) => FetchResult {
                filename: filename.to_string(),
                status: FetchStatus::Downloaded,
                reason: "successfully downloaded".to_string(),
                bytes_downloaded: bytes,
            },
            Err(e) => {
                error!("Download failed for {}: {:#}", filename, e);
                FetchResult::error(filename, format!("{:#}", e))
            }
        }
    }

    async fn download_to_cache(
        &self,
        filename: &str,
        url: &str,
        expected_checksum: Option<&str>,
    ) -> Result<u64> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .with_context(|| format!("Failed to create cache directory {:?}", self.cache_dir))?;

        let temp_path = self.temp_path(filename);
        let final_path = self.media_path(filename);

        info!("Starting download: {} from {}", filename, url);
        let result = self
            .stream_and_install(filename, url, expected_checksum, &temp_path, &final_path)
            .await;

        if result.is_err() {
            // Never leave partial data behind; the previous final file,
            // if any, stays as-is.
            let _ = tokio::fs::remove_file(&temp_path).await;
        }
        result
    }

    async fn stream_and_install(
        &self,
        filename: &str,
        url: &str,
        expected_checksum: Option<&str>,
        temp_path: &Path,
        final_path: &Path,
    ) -> Result<u64> {
        let response = match self.http_client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.progress.start_download(filename, 0).await;
                self.progress
                    .finish_download(filename, DownloadStatus::NetworkError, Some(e.to_string()))
                    .await;
                return Err(e).context("Failed to send HTTP request");
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            self.progress.start_download(filename, 0).await;
            self.progress
                .finish_download(
                    filename,
                    DownloadStatus::NetworkError,
                    Some(format!("HTTP {}", status)),
                )
                .await;
            bail!("HTTP error: {}", status);
        }

        let total_size = response.content_length().unwrap_or(0);
        self.progress.start_download(filename, total_size).await;

        let mut file = tokio::fs::File::create(temp_path)
            .await
            .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;

        let mut stream = response.bytes_stream();
        let mut bytes_downloaded = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    self.progress
                        .finish_download(
                            filename,
                            DownloadStatus::NetworkError,
                            Some(e.to_string()),
                        )
                        .await;
                    return Err(e).context("Failed to read chunk from response");
                }
            };
            file.write_all(&chunk)
                .await
                .context("Failed to write to temp file")?;
            bytes_downloaded += chunk.len() as u64;
            self.progress.update_progress(filename, bytes_downloaded).await;
        }

        file.flush().await.context("Failed to flush temp file")?;
        drop(file);

        info!(
            "Download completed for {}: {} bytes",
            filename, bytes_downloaded
        );

        // Verify before promoting; a mismatch deletes the temp data and
        // leaves any previous final file alone.
        if let Some(expected) = expected_checksum {
            let actual = {
                let path = temp_path.to_path_buf();
                let algorithm = self.algorithm;
                tokio::task::spawn_blocking(move || checksum::digest(&path, algorithm))
                    .await
                    .context("Checksum task panicked")??
            };

            if actual != expected {
                self.progress
                    .finish_download(
                        filename,
                        DownloadStatus::ChecksumFailed,
                        Some("checksum verification failed".to_string()),
                    )
                    .await;
                bail!(
                    "checksum verification failed: expected {}, got {}",
                    expected,
                    actual
                );
            }
            debug!("Checksum verified for downloaded file: {}", filename);
        }

        tokio::fs::rename(temp_path, final_path)
            .await
            .with_context(|| format!("Failed to install {:?}", final_path))?;

        self.progress
            .finish_download(filename, DownloadStatus::Completed, None)
            .await;
        info!("File cached successfully: {} -> {:?}", filename, final_path);

        Ok(bytes_downloaded)
    }

    /// Fetch every item of the playlist, bounded by the configured worker
    /// count. Items are independent: one failure never blocks or fails
    /// the rest. Only a structurally empty playlist is an error.
    pub async fn fetch_all(self: &Arc<Self>, playlist: &Playlist) -> Result<BatchResult> {
        if playlist.items.is_empty() {
            bail!("no items in playlist");
        }

        info!(
            "Starting playlist download: version {} with {} items ({} workers)",
            playlist.version,
            playlist.items.len(),
            self.max_concurrent
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = Vec::with_capacity(playlist.items.len());

        for item in playlist.items.clone() {
            let store = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("download semaphore closed");
                store.fetch(&item).await
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(result) => results.push(result),
                Err(e) => results.push(FetchResult::error("unknown", format!("worker failed: {}", e))),
            }
        }

        let downloaded = results
            .iter()
            .filter(|r| r.status == FetchStatus::Downloaded)
            .count();
        let cached = results
            .iter()
            .filter(|r| r.status == FetchStatus::Cached)
            .count();
        let total_bytes_downloaded = results.iter().map(|r| r.bytes_downloaded).sum();
        let errors: Vec<FetchResult> = results
            .into_iter()
            .filter(|r| r.status == FetchStatus::Error)
            .collect();

        if !errors.is_empty() {
            warn!("Download completed with {} errors:", errors.len());
            for err in &errors {
                error!("  {}: {}", err.filename, err.reason);
            }
        }

        Ok(BatchResult {
            total: playlist.items.len(),
            downloaded,
            cached,
            errors,
            total_bytes_downloaded,
        })
    }

    /// Delete cached files no longer referenced by the playlist.
    ///
    /// Operates on the set difference against the given (active)
    /// playlist's filenames, so a file backing the currently playing item
    /// is by definition never a deletion candidate.
    pub async fn prune(&self, playlist: &Playlist) -> Result<PruneResult> {
        let referenced: std::collections::HashSet<&str> = playlist.filenames().collect();

        let mut deleted_files = Vec::new();
        let mut kept_files = Vec::new();
        let mut freed_bytes = 0u64;

        let mut entries = match tokio::fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PruneResult {
                    deleted_files,
                    freed_bytes,
                    kept_files,
                });
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read cache directory {:?}", self.cache_dir));
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            // Temp files belong to in-flight downloads, dotfiles to the
            // directory itself.
            if name.ends_with(TEMP_SUFFIX) || name.starts_with('.') {
                continue;
            }

            if referenced.contains(name.as_str()) {
                kept_files.push(name);
                continue;
            }

            let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    info!("Pruned stale cache file: {} ({} bytes)", name, size);
                    freed_bytes += size;
                    deleted_files.push(name);
                }
                Err(e) => warn!("Failed to prune {}: {}", name, e),
            }
        }

        info!(
            "Prune complete: {} deleted, {} kept, {} bytes freed",
            deleted_files.len(),
            kept_files.len(),
            freed_bytes
        );

        Ok(PruneResult {
            deleted_files,
            freed_bytes,
            kept_files,
        })
    }

    /// Current cache contents and in-flight download progress, for the
    /// monitoring surface.
    pub async fn status(&self) -> Result<CacheStatus> {
        let mut files = Vec::new();
        let mut total_bytes = 0u64;

        if self.cache_dir.exists() {
            let mut entries = tokio::fs::read_dir(&self.cache_dir)
                .await
                .with_context(|| format!("Failed to read cache directory {:?}", self.cache_dir))?;

            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false)
                    || name.ends_with(TEMP_SUFFIX)
                    || name.starts_with('.')
                {
                    continue;
                }
                let metadata = entry.metadata().await?;
                total_bytes += metadata.len();
                files.push(CachedFileInfo {
                    filename: name,
                    size: metadata.len(),
                    modified: metadata.modified().ok().map(chrono::DateTime::from),
                });
            }
        }

        Ok(CacheStatus {
            total_files: files.len(),
            total_bytes,
            files,
        })
    }

    /// Remove every cached media file. Used by the reset-cache mode.
    pub async fn reset(&self) -> Result<(usize, u64)> {
        let mut removed = 0usize;
        let mut freed = 0u64;

        if !self.cache_dir.exists() {
            return Ok((removed, freed));
        }

        let mut entries = tokio::fs::read_dir(&self.cache_dir)
            .await
            .with_context(|| format!("Failed to read cache directory {:?}", self.cache_dir))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false)
                || name.starts_with('.')
            {
                continue;
            }
            let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
            tokio::fs::remove_file(entry.path())
                .await
                .with_context(|| format!("Failed to remove {:?}", entry.path()))?;
            removed += 1;
            freed += size;
        }

        info!("Cache reset: removed {} files ({} bytes)", removed, freed);
        Ok((removed, freed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use std::fs;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> Arc<CacheStore> {
        let config = DownloadConfig {
            timeout_secs: 5,
            max_concurrent: 2,
            checksum_algorithm: "sha256".to_string(),
        };
        Arc::new(CacheStore::new(dir.path().to_path_buf(), &config).unwrap())
    }

    fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    fn item(filename: &str, url: &str) -> PlaylistItem {
        PlaylistItem::new(filename, url)
    }

    #[tokio::test]
    async fn test_needs_download_decision_order() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        // Inert item: never downloadable
        let inert = PlaylistItem {
            filename: Some("a.mp4".to_string()),
            url: None,
            checksum: None,
            duration: None,
        };
        let decision = store.needs_download(&inert);
        assert!(!decision.needed);
        assert_eq!(decision.reason, FetchReason::MissingMetadata);

        // Absent file
        let plain = item("a.mp4", "http://x/a.mp4");
        let decision = store.needs_download(&plain);
        assert!(decision.needed);
        assert_eq!(decision.reason, FetchReason::NotCached);

        // Zero bytes
        fs::write(store.media_path("a.mp4"), b"").unwrap();
        let decision = store.needs_download(&plain);
        assert!(decision.needed);
        assert_eq!(decision.reason, FetchReason::EmptyFile);

        // Present, no checksum: trusted on existence
        fs::write(store.media_path("a.mp4"), b"content").unwrap();
        let decision = store.needs_download(&plain);
        assert!(!decision.needed);
        assert_eq!(decision.reason, FetchReason::ExistsNoChecksum);

        // Checksum mismatch
        let mut checked = plain.clone();
        checked.checksum = Some(sha256_hex(b"other content"));
        let decision = store.needs_download(&checked);
        assert!(decision.needed);
        assert_eq!(decision.reason, FetchReason::ChecksumMismatch);

        // Checksum valid
        checked.checksum = Some(sha256_hex(b"content"));
        let decision = store.needs_download(&checked);
        assert!(!decision.needed);
        assert_eq!(decision.reason, FetchReason::ChecksumValid);
    }

    #[tokio::test]
    async fn test_needs_download_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.media_path("a.mp4"), b"content").unwrap();

        let mut checked = item("a.mp4", "http://x/a.mp4");
        checked.checksum = Some(sha256_hex(b"different"));

        let first = store.needs_download(&checked);
        let second = store.needs_download(&checked);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_fetch_downloads_verifies_and_installs() {
        let mut server = mockito::Server::new_async().await;
        let body = b"known video bytes";
        let mock = server
            .mock("GET", "/a.mp4")
            .with_body(body)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let mut media = item("a.mp4", &format!("{}/a.mp4", server.url()));
        media.checksum = Some(sha256_hex(body));

        let result = store.fetch(&media).await;
        assert_eq!(result.status, FetchStatus::Downloaded);
        assert_eq!(result.bytes_downloaded, body.len() as u64);
        assert_eq!(fs::read(store.media_path("a.mp4")).unwrap(), body);
        assert!(!store.temp_path("a.mp4").exists());

        // Digest of the installed file matches the declared checksum
        let digest = checksum::digest(&store.media_path("a.mp4"), ChecksumAlgorithm::Sha256)
            .unwrap();
        assert_eq!(Some(digest), media.checksum);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_slow_transfer_outlasting_the_timeout_succeeds() {
        use std::io::Write;

        let mut server = mockito::Server::new_async().await;
        // Five chunks, 300ms apart: ~1.5s total against a 1s timeout,
        // but the stream is never idle for a full second
        server
            .mock("GET", "/slow.mp4")
            .with_chunked_body(|w| {
                for _ in 0..5 {
                    w.write_all(&[0xab; 1024])?;
                    w.flush()?;
                    std::thread::sleep(std::time::Duration::from_millis(300));
                }
                Ok(())
            })
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let config = DownloadConfig {
            timeout_secs: 1,
            max_concurrent: 2,
            checksum_algorithm: "sha256".to_string(),
        };
        let store = Arc::new(CacheStore::new(dir.path().to_path_buf(), &config).unwrap());

        let result = store
            .fetch(&item("slow.mp4", &format!("{}/slow.mp4", server.url())))
            .await;
        assert_eq!(result.status, FetchStatus::Downloaded);
        assert_eq!(result.bytes_downloaded, 5 * 1024);
        assert_eq!(
            fs::metadata(store.media_path("slow.mp4")).unwrap().len(),
            5 * 1024
        );
    }

    #[tokio::test]
    async fn test_stalled_transfer_times_out_and_leaves_no_temp() {
        use std::io::Write;

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/stalled.mp4")
            .with_chunked_body(|w| {
                w.write_all(&[0xab; 1024])?;
                w.flush()?;
                std::thread::sleep(std::time::Duration::from_millis(1500));
                w.write_all(&[0xcd; 1024])
            })
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let config = DownloadConfig {
            timeout_secs: 1,
            max_concurrent: 2,
            checksum_algorithm: "sha256".to_string(),
        };
        let store = Arc::new(CacheStore::new(dir.path().to_path_buf(), &config).unwrap());

        let result = store
            .fetch(&item("stalled.mp4", &format!("{}/stalled.mp4", server.url())))
            .await;
        assert_eq!(result.status, FetchStatus::Error);
        assert!(!store.media_path("stalled.mp4").exists());
        assert!(!store.temp_path("stalled.mp4").exists());
    }

    #[tokio::test]
    async fn test_fetch_skips_valid_cached_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.media_path("a.mp4"), b"content").unwrap();

        // URL is unroutable on purpose: a cache hit must not touch it
        let result = store.fetch(&item("a.mp4", "http://127.0.0.1:1/a.mp4")).await;
        assert_eq!(result.status, FetchStatus::Cached);
        assert_eq!(result.bytes_downloaded, 0);
    }

    #[tokio::test]
    async fn test_failed_transfer_leaves_prior_file_untouched() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/a.mp4")
            .with_status(500)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.media_path("a.mp4"), b"previous good bytes").unwrap();

        // Mismatched checksum forces a re-download attempt
        let mut media = item("a.mp4", &format!("{}/a.mp4", server.url()));
        media.checksum = Some(sha256_hex(b"newer bytes"));

        let result = store.fetch(&media).await;
        assert_eq!(result.status, FetchStatus::Error);
        assert_eq!(
            fs::read(store.media_path("a.mp4")).unwrap(),
            b"previous good bytes"
        );
        assert!(!store.temp_path("a.mp4").exists());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_discards_temp_and_keeps_prior_file() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/a.mp4")
            .with_body(b"corrupted transfer")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.media_path("a.mp4"), b"previous good bytes").unwrap();

        let mut media = item("a.mp4", &format!("{}/a.mp4", server.url()));
        media.checksum = Some(sha256_hex(b"expected bytes"));

        let result = store.fetch(&media).await;
        assert_eq!(result.status, FetchStatus::Error);
        assert!(result.reason.contains("checksum"));
        assert_eq!(
            fs::read(store.media_path("a.mp4")).unwrap(),
            b"previous good bytes"
        );
        assert!(!store.temp_path("a.mp4").exists());

        let progress = store.progress().get_status().await;
        assert_eq!(
            progress.get("a.mp4").unwrap().status,
            DownloadStatus::ChecksumFailed
        );
    }

    #[tokio::test]
    async fn test_fetch_all_aggregates_partial_failures() {
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
        server
            .mock("GET", "/bad.mp4")
            .with_status(404)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let playlist = Playlist::new(
            "v1",
            vec![
                item("a.mp4", &format!("{}/a.mp4", server.url())),
                item("b.mp4", &format!("{}/b.mp4", server.url())),
                item("bad.mp4", &format!("{}/bad.mp4", server.url())),
            ],
        );

        let batch = store.fetch_all(&playlist).await.unwrap();
        assert_eq!(batch.total, 3);
        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.downloaded + batch.cached, 2);
        assert_eq!(batch.errors[0].filename, "bad.mp4");
    }

    #[tokio::test]
    async fn test_fetch_all_of_empty_playlist_is_structural_error() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let playlist = Playlist::new("v1", vec![]);
        assert!(store.fetch_all(&playlist).await.is_err());
    }

    #[tokio::test]
    async fn test_prune_deletes_only_unreferenced_files() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        for name in ["a.mp4", "b.mp4", "stale.mp4"] {
            fs::write(store.media_path(name), b"bytes").unwrap();
        }
        // In-flight temp files and dotfiles are never candidates
        fs::write(store.media_path("inflight.mp4.tmp"), b"partial").unwrap();
        fs::write(store.media_path(".keep"), b"").unwrap();

        let playlist = Playlist::new(
            "v1",
            vec![
                item("a.mp4", "http://x/a.mp4"),
                item("b.mp4", "http://x/b.mp4"),
            ],
        );
        let result = store.prune(&playlist).await.unwrap();

        assert_eq!(result.deleted_files, vec!["stale.mp4"]);
        assert_eq!(result.freed_bytes, 5);
        assert!(store.media_path("a.mp4").exists());
        assert!(store.media_path("b.mp4").exists());
        assert!(store.media_path("inflight.mp4.tmp").exists());
        assert!(store.media_path(".keep").exists());
    }

    #[tokio::test]
    async fn test_prune_never_deletes_referenced_files() {
        // A few generated playlist/cache pairs with overlapping sets
        let cases: &[(&[&str], &[&str])] = &[
            (&["a.mp4"], &["a.mp4"]),
            (&["a.mp4", "b.mp4"], &["b.mp4", "c.mp4"]),
            (&[], &["x.mp4", "y.mp4"]),
            (&["a.mp4", "b.mp4", "c.mp4"], &[]),
        ];

        for (referenced, cached) in cases {
            let dir = TempDir::new().unwrap();
            let store = store_in(&dir);
            fs::create_dir_all(dir.path()).unwrap();
            for name in *cached {
                fs::write(store.media_path(name), b"bytes").unwrap();
            }

            let playlist = Playlist::new(
                "v1",
                referenced
                    .iter()
                    .map(|f| item(f, &format!("http://x/{}", f)))
                    .collect(),
            );
            let result = store.prune(&playlist).await.unwrap();

            for deleted in &result.deleted_files {
                assert!(
                    !referenced.contains(&deleted.as_str()),
                    "pruned a referenced file: {}",
                    deleted
                );
            }
            for name in *referenced {
                if cached.contains(name) {
                    assert!(store.media_path(name).exists());
                }
            }
        }
    }

    #[tokio::test]
    async fn test_prune_of_missing_cache_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let config = DownloadConfig::default();
        let store = CacheStore::new(dir.path().join("never_created"), &config).unwrap();

        let result = store.prune(&Playlist::new("v1", vec![])).await.unwrap();
        assert!(result.deleted_files.is_empty());
        assert!(result.kept_files.is_empty());
    }

    #[tokio::test]
    async fn test_status_excludes_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.media_path("a.mp4"), b"12345").unwrap();
        fs::write(store.media_path("b.mp4.tmp"), b"partial").unwrap();

        let status = store.status().await.unwrap();
        assert_eq!(status.total_files, 1);
        assert_eq!(status.total_bytes, 5);
        assert_eq!(status.files[0].filename, "a.mp4");
    }

    #[tokio::test]
    async fn test_reset_removes_everything() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.media_path("a.mp4"), b"12345").unwrap();
        fs::write(store.media_path("b.mp4"), b"678").unwrap();

        let (removed, freed) = store.reset().await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(freed, 8);
        assert!(!store.media_path("a.mp4").exists());
    }
}
