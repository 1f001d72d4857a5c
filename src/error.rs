use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    #[error("track {track} cannot be played: {reason}")]
    TrackNotPlayable { track: PathBuf, reason: String },

    #[error("track {0} has not been prepared for playback")]
    NoPlaybackContext(PathBuf),

    #[error("transcoding {track} failed: {reason}")]
    TranscodingFailed { track: PathBuf, reason: String },

    #[error("transcoding {0} was cancelled")]
    TranscodingCancelled(PathBuf),

    #[error("io error: {0}")]
    Io(String),
}

impl PlaybackError {
    pub fn not_playable(track: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::TrackNotPlayable {
            track: track.into(),
            reason: reason.into(),
        }
    }

    /// The track this error refers to, when there is one.
    pub fn track(&self) -> Option<&PathBuf> {
        match self {
            Self::TrackNotPlayable { track, .. } | Self::TranscodingFailed { track, .. } => {
                Some(track)
            }
            Self::NoPlaybackContext(track) | Self::TranscodingCancelled(track) => Some(track),
            Self::Io(_) => None,
        }
    }
}

impl From<std::io::Error> for PlaybackError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
