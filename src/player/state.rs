use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

use crate::models::{PlaybackState, PlaybackStatus};

/// Writes the observable playback-state document.
///
/// The supervisor owns this document exclusively and writes it on every
/// transition; telemetry and the status command read it. Writes are
/// best-effort: a failed write is logged and never interrupts playback.
pub struct StateWriter {
    path: PathBuf,
}

impl StateWriter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn write(&self, state: &PlaybackState) {
        if let Err(e) = self.write_inner(state) {
            warn!("Failed to write playback state: {:#}", e);
        }
    }

    fn write_inner(&self, state: &PlaybackState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write {:?}", self.path))?;
        Ok(())
    }

    /// Read the document back; used by the status command.
    pub fn load(path: &std::path::Path) -> Result<PlaybackState> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read playback state {:?}", path))?;
        serde_json::from_str(&contents).context("Playback state document is corrupt")
    }
}

/// Convenience constructor for a fresh state document.
pub fn state(
    status: PlaybackStatus,
    current_item: Option<&str>,
    playlist_position: usize,
    playlist_version: Option<String>,
    playlist_total: usize,
    message: Option<String>,
) -> PlaybackState {
    PlaybackState {
        status,
        current_item: current_item.map(str::to_string),
        playlist_position,
        playlist_version,
        playlist_total,
        last_updated: Utc::now(),
        message,
    }
}
