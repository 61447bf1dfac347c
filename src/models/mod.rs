use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single entry in a playlist.
///
/// Identity is `filename`: two items with the same filename refer to the
/// same cache entry even across playlist versions. An item missing either
/// `filename` or `url` is inert: it is never downloaded and playback
/// skips it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistItem {
    #[serde(default)]
    pub filename: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Playback time limit in seconds. Only positive values are honored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl PlaylistItem {
    pub fn new(filename: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
            url: Some(url.into()),
            checksum: None,
            duration: None,
        }
    }

    /// Whether the item carries enough metadata to be fetched at all.
    pub fn is_downloadable(&self) -> bool {
        self.filename.is_some() && self.url.is_some()
    }

    /// Duration usable as a hard playback time limit.
    pub fn effective_duration(&self) -> Option<f64> {
        self.duration.filter(|d| *d > 0.0)
    }
}

/// The active playlist document.
///
/// `version` is the sole change-detection key: consumers compare version
/// strings, never item contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub version: String,

    pub last_updated: DateTime<Utc>,

    #[serde(rename = "loop", default = "default_loop")]
    pub loop_enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default)]
    pub items: Vec<PlaylistItem>,
}

fn default_loop() -> bool {
    true
}

impl Playlist {
    pub fn new(version: impl Into<String>, items: Vec<PlaylistItem>) -> Self {
        Self {
            version: version.into(),
            last_updated: Utc::now(),
            loop_enabled: true,
            description: None,
            source: None,
            items,
        }
    }

    pub fn same_version_as(&self, other: &Playlist) -> bool {
        self.version == other.version
    }

    /// Filenames referenced by this playlist, skipping inert items.
    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|i| i.filename.as_deref())
    }
}

/// What the supervisor is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Starting,
    Waiting,
    ShowingDefault,
    Playing,
    Finished,
    Error,
    Stopped,
}

/// The observable playback-state document.
///
/// Written exclusively by the playback supervisor on every transition;
/// read-only to everything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub current_item: Option<String>,
    pub playlist_position: usize,
    pub playlist_version: Option<String>,
    pub playlist_total: usize,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
