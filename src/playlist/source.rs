use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::Playlist;

/// Failure modes of the active playlist document.
#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("playlist document not found")]
    NotFound,

    #[error("playlist document is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Bridges playlist producers (backend fetch, default fallback) into the
/// single active-playlist document that the cache store and the playback
/// supervisor observe.
///
/// No multi-version history: at most one rollback point (the backup of
/// the immediately prior document) exists at any time.
pub struct PlaylistSource {
    active_path: PathBuf,
    backup_path: PathBuf,
}

impl PlaylistSource {
    pub fn new(active_path: PathBuf, backup_path: PathBuf) -> Self {
        Self {
            active_path,
            backup_path,
        }
    }

    pub fn active_path(&self) -> &PathBuf {
        &self.active_path
    }

    /// Load the active playlist document.
    pub fn load_active(&self) -> Result<Playlist, PlaylistError> {
        let contents = match fs::read_to_string(&self.active_path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PlaylistError::NotFound);
            }
            Err(e) => return Err(e.into()),
        };
        let playlist: Playlist = serde_json::from_str(&contents)?;
        debug!(
            "Loaded playlist v{} with {} items",
            playlist.version,
            playlist.items.len()
        );
        Ok(playlist)
    }

    /// Replace the active playlist with `new`, unless its version matches
    /// the current one.
    ///
    /// Version strings are the sole change-detection key: a document with
    /// the same version is ignored even if its items differ. Returns
    /// whether a swap happened. The backup of the previous document is
    /// best-effort; backup failures are logged, never raised.
    pub fn try_swap(&self, new: &Playlist) -> Result<bool, PlaylistError> {
        match self.load_active() {
            Ok(current) if current.same_version_as(new) => {
                debug!("Playlist version {} unchanged, ignoring", new.version);
                return Ok(false);
            }
            Ok(current) => {
                if let Err(e) = fs::copy(&self.active_path, &self.backup_path) {
                    warn!("Failed to back up playlist v{}: {}", current.version, e);
                }
            }
            Err(PlaylistError::NotFound) => {}
            Err(e) => {
                // An unreadable active document is replaced outright.
                warn!("Active playlist unreadable ({}), overwriting", e);
            }
        }

        if let Some(parent) = self.active_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(new)?;
        fs::write(&self.active_path, contents)?;

        info!(
            "Active playlist swapped to v{} ({} items)",
            new.version,
            new.items.len()
        );
        Ok(true)
    }
}
