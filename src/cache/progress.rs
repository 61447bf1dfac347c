use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Terminal and in-flight states of a single download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Downloading,
    Completed,
    ChecksumFailed,
    NetworkError,
    Error,
}

/// Progress of one in-flight (or recently finished) download.
///
/// One entry per filename; a new download of the same filename replaces
/// the previous entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub status: DownloadStatus,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub start_time: DateTime<Utc>,
    /// Bytes per second since the download started
    pub speed: f64,
    /// Estimated seconds remaining, when the total size is known
    pub eta_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadProgress {
    fn new(total_bytes: u64) -> Self {
        Self {
            status: DownloadStatus::Downloading,
            total_bytes,
            downloaded_bytes: 0,
            start_time: Utc::now(),
            speed: 0.0,
            eta_seconds: None,
            error: None,
        }
    }
}

/// Concurrency-safe registry of download progress, one entry per
/// filename. Download workers never share an entry, so concurrent
/// updates only contend on the map itself.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    downloads: Arc<RwLock<HashMap<String, DownloadProgress>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start_download(&self, filename: &str, total_bytes: u64) {
        let mut downloads = self.downloads.write().await;
        downloads.insert(filename.to_string(), DownloadProgress::new(total_bytes));
    }

    pub async fn update_progress(&self, filename: &str, downloaded_bytes: u64) {
        let mut downloads = self.downloads.write().await;
        if let Some(info) = downloads.get_mut(filename) {
            info.downloaded_bytes = downloaded_bytes;
            let elapsed = (Utc::now() - info.start_time).as_seconds_f64();
            if elapsed > 0.0 {
                info.speed = downloaded_bytes as f64 / elapsed;
                if info.total_bytes > 0 && info.speed > 0.0 {
                    let remaining = info.total_bytes.saturating_sub(downloaded_bytes);
                    info.eta_seconds = Some(remaining as f64 / info.speed);
                }
            }
        }
    }

    pub async fn finish_download(
        &self,
        filename: &str,
        status: DownloadStatus,
        error: Option<String>,
    ) {
        let mut downloads = self.downloads.write().await;
        if let Some(info) = downloads.get_mut(filename) {
            info.status = status;
            info.error = error;
        }
    }

    /// Snapshot of all tracked downloads, consumed by the monitoring
    /// surface.
    pub async fn get_status(&self) -> HashMap<String, DownloadProgress> {
        let downloads = self.downloads.read().await;
        downloads.clone()
    }
}
