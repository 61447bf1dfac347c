use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::models::{Playlist, PlaylistItem};

/// Best-effort producer of playlist documents. Absence of a playlist is
/// a normal outcome, not an error.
#[async_trait]
pub trait PlaylistProvider: Send + Sync {
    async fn fetch_playlist(&self) -> Result<Option<Playlist>>;
}

/// Wire format served by the backend.
#[derive(Debug, Deserialize)]
struct BackendPlaylist {
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    version: String,
    #[serde(default)]
    playlist: Vec<BackendItem>,
}

#[derive(Debug, Deserialize)]
struct BackendItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    url: String,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

/// Playlist provider backed by the device-management HTTP API.
pub struct BackendProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    device_id: String,
}

impl BackendProvider {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("marquee/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create backend HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            device_id: config.device_id.clone(),
        })
    }
}

#[async_trait]
impl PlaylistProvider for BackendProvider {
    async fn fetch_playlist(&self) -> Result<Option<Playlist>> {
        let url = format!("{}/api/devices/{}/playlist", self.base_url, self.device_id);
        debug!("Fetching backend playlist from {}", url);

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.context("Backend request failed")?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Backend has no playlist for this device");
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("Backend returned HTTP {}", response.status());
        }

        let backend: BackendPlaylist = response
            .json()
            .await
            .context("Failed to parse backend playlist")?;

        info!(
            "Backend playlist available: version {} with {} items",
            backend.version,
            backend.playlist.len()
        );
        Ok(Some(convert_backend_playlist(backend)))
    }
}

/// Convert the backend wire format to the player document format.
fn convert_backend_playlist(backend: BackendPlaylist) -> Playlist {
    let items = backend
        .playlist
        .iter()
        .map(|item| PlaylistItem {
            filename: Some(filename_for(&item.url, item.id.as_deref())),
            url: Some(item.url.clone()),
            checksum: item.checksum.clone(),
            duration: item.duration,
        })
        .collect();

    Playlist {
        version: backend.version,
        last_updated: backend.timestamp.unwrap_or_else(Utc::now),
        // Loop is forced on the device regardless of backend flags
        loop_enabled: true,
        description: Some("Backend playlist".to_string()),
        source: Some("backend".to_string()),
        items,
    }
}

/// Derive a cache filename from the media URL, falling back to an
/// id-based and finally a hash-based name.
fn filename_for(url: &str, item_id: Option<&str>) -> String {
    if let Some(path) = url.split('?').next() {
        if let Some(last) = path.rsplit('/').next() {
            if last.contains('.') && !last.is_empty() {
                return last.to_string();
            }
        }
    }

    if let Some(id) = item_id {
        return format!("{}.mp4", id);
    }

    let hash = hex::encode(Sha256::digest(url.as_bytes()));
    format!("video_{}.mp4", &hash[..8])
}

/// Built-in sample playlist used as a last resort when neither the
/// backend nor an existing active document can provide content.
pub fn sample_playlist() -> Playlist {
    let samples = [
        ("big_buck_bunny.mp4", 60.0),
        ("elephants_dream.mp4", 60.0),
        ("for_bigger_blazes.mp4", 15.0),
        ("for_bigger_escapes.mp4", 15.0),
        ("for_bigger_fun.mp4", 60.0),
    ];
    let base = "https://commondatastorage.googleapis.com/gtv-videos-bucket/sample";

    let items = samples
        .iter()
        .map(|(filename, duration)| {
            let stem: String = filename
                .trim_end_matches(".mp4")
                .split('_')
                .map(|part| {
                    let mut chars = part.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                        None => String::new(),
                    }
                })
                .collect();
            PlaylistItem {
                filename: Some(filename.to_string()),
                url: Some(format!("{}/{}.mp4", base, stem)),
                checksum: None,
                duration: Some(*duration),
            }
        })
        .collect();

    let mut playlist = Playlist::new("default-samples-v1.0", items);
    playlist.description = Some("Default sample video playlist".to_string());
    playlist.source = Some("default_samples".to_string());
    playlist
}

/// Provider wrapper that reports the sample playlist; used when backend
/// integration is disabled.
pub struct SampleProvider;

#[async_trait]
impl PlaylistProvider for SampleProvider {
    async fn fetch_playlist(&self) -> Result<Option<Playlist>> {
        warn!("Backend integration disabled, serving sample playlist");
        Ok(Some(sample_playlist()))
    }
}
