use std::path::Path;

use crate::config::PlaybackConfig;
use crate::models::PlaylistItem;

/// Media categories that select an external player. Classification is a
/// fixed extension lookup, never inferred from content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Image,
    Unknown,
}

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "aac", "ogg", "m4a", "wma"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff"];

pub fn classify(filename: &str) -> MediaKind {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
        MediaKind::Video
    } else if AUDIO_EXTENSIONS.contains(&extension.as_str()) {
        MediaKind::Audio
    } else if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        MediaKind::Image
    } else {
        MediaKind::Unknown
    }
}

/// Build the external player command line for a cached media file.
///
/// Video/audio get the item duration as a hard time limit only when it
/// is positive; images always get a display duration (item-specified or
/// the configured default). Unknown types fall back to the video player.
pub fn player_command(
    media_path: &Path,
    item: &PlaylistItem,
    playback: &PlaybackConfig,
) -> Vec<String> {
    let filename = media_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match classify(&filename) {
        MediaKind::Video | MediaKind::Audio => {
            let mut cmd = vec![
                "cvlc".to_string(),
                "--intf".to_string(),
                "dummy".to_string(),
                "--quiet".to_string(),
                "--no-video-title-show".to_string(),
                "--fullscreen".to_string(),
                "--no-osd".to_string(),
                media_path.to_string_lossy().into_owned(),
            ];
            if let Some(duration) = item.effective_duration() {
                cmd.push("--run-time".to_string());
                cmd.push((duration as u64).to_string());
            }
            cmd
        }
        MediaKind::Image => {
            // Fractional delays pass through untruncated; casting 0.5 to
            // an integer would make feh wait forever on a zero delay
            let delay = item
                .effective_duration()
                .map(|d| d.to_string())
                .unwrap_or_else(|| playback.image_display_secs.to_string());
            vec![
                "feh".to_string(),
                "--fullscreen".to_string(),
                "--hide-pointer".to_string(),
                "--quiet".to_string(),
                "--slideshow-delay".to_string(),
                delay,
                media_path.to_string_lossy().into_owned(),
            ]
        }
        MediaKind::Unknown => {
            vec![
                "cvlc".to_string(),
                "--intf".to_string(),
                "dummy".to_string(),
                "--quiet".to_string(),
                media_path.to_string_lossy().into_owned(),
            ]
        }
    }
}

/// Command displaying the default screen asset, invoked like an image
/// player without a slideshow delay so it stays up until stopped.
pub fn default_screen_command(asset_path: &Path) -> Vec<String> {
    vec![
        "feh".to_string(),
        "--fullscreen".to_string(),
        "--hide-pointer".to_string(),
        "--quiet".to_string(),
        "--no-menus".to_string(),
        asset_path.to_string_lossy().into_owned(),
    ]
}
