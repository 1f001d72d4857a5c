use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlaybackState {
    #[default]
    NoTrack,
    Waiting,
    Transcoding,
    Playing,
    Paused,
}

impl PlaybackState {
    pub fn is_playing_or_paused(self) -> bool {
        matches!(self, Self::Playing | Self::Paused)
    }
}

/// Everything needed to turn seconds into frame positions for one playable file.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackContext {
    pub file: PathBuf,
    pub sample_rate: f64,
    pub frames: u64,
}

impl PlaybackContext {
    pub fn new(file: impl Into<PathBuf>, sample_rate: f64, frames: u64) -> Self {
        Self {
            file: file.into(),
            sample_rate,
            frames,
        }
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate
    }

    pub fn frame_at(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate) as u64
    }

    pub fn last_frame(&self) -> u64 {
        self.frames.saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub start_time: f64,
    pub end_time: f64,
}

impl Chapter {
    pub fn contains(&self, position: f64) -> bool {
        position >= self.start_time && position < self.end_time
    }
}

#[derive(Debug, Default)]
struct TrackPlayback {
    context: Option<PlaybackContext>,
    transcoded: Option<PathBuf>,
}

#[derive(Debug)]
pub struct Track {
    pub path: PathBuf,
    pub title: String,
    pub duration: f64,
    pub chapters: Vec<Chapter>,
    playback: Mutex<TrackPlayback>,
}

impl Track {
    pub fn new(path: impl Into<PathBuf>, title: impl Into<String>, duration: f64) -> Self {
        Self {
            path: path.into(),
            title: title.into(),
            duration,
            chapters: Vec::new(),
            playback: Mutex::new(TrackPlayback::default()),
        }
    }

    pub fn with_chapters(mut self, chapters: Vec<Chapter>) -> Self {
        self.chapters = chapters;
        self
    }

    pub fn with_playback_context(self, context: PlaybackContext) -> Self {
        self.set_playback_context(context);
        self
    }

    pub fn playback_context(&self) -> Option<PlaybackContext> {
        lock(&self.playback).context.clone()
    }

    pub fn set_playback_context(&self, context: PlaybackContext) {
        lock(&self.playback).context = Some(context);
    }

    pub fn is_prepared(&self) -> bool {
        lock(&self.playback).context.is_some()
    }

    /// File that should actually be decoded: the transcoded copy when one exists.
    pub fn playable_path(&self) -> PathBuf {
        lock(&self.playback)
            .transcoded
            .clone()
            .unwrap_or_else(|| self.path.clone())
    }

    pub fn transcoded_file(&self) -> Option<PathBuf> {
        lock(&self.playback).transcoded.clone()
    }

    pub fn set_transcoded_file(&self, file: PathBuf) {
        let mut playback = lock(&self.playback);
        playback.transcoded = Some(file);
        playback.context = None;
    }

    pub fn is(&self, path: &Path) -> bool {
        self.path == path
    }

    pub fn has_chapters(&self) -> bool {
        !self.chapters.is_empty()
    }

    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GapPosition {
    BeforeTrack,
    AfterTrack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapKind {
    Persistent,
    TillAppExits,
    OneTime,
    /// Inserted from the "gap between tracks" preference rather than configured per track.
    Implicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackGap {
    pub duration: f64,
    pub position: GapPosition,
    pub kind: GapKind,
}

impl PlaybackGap {
    pub fn new(duration: f64, position: GapPosition, kind: GapKind) -> Self {
        Self {
            duration,
            position,
            kind,
        }
    }

    pub fn before(duration: f64) -> Self {
        Self::new(duration, GapPosition::BeforeTrack, GapKind::Persistent)
    }

    pub fn after(duration: f64) -> Self {
        Self::new(duration, GapPosition::AfterTrack, GapKind::Persistent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackProfile {
    pub track: PathBuf,
    pub last_position: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SeekLengthOption {
    #[default]
    Constant,
    Percentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeekLength {
    pub option: SeekLengthOption,
    pub constant_seconds: u32,
    pub percentage: f64,
}

impl SeekLength {
    pub fn constant(seconds: u32) -> Self {
        Self {
            option: SeekLengthOption::Constant,
            constant_seconds: seconds,
            percentage: 2.0,
        }
    }

    pub fn percentage(percentage: f64) -> Self {
        Self {
            option: SeekLengthOption::Percentage,
            constant_seconds: 5,
            percentage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserInputMode {
    Discrete,
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RememberLastPosition {
    #[default]
    Off,
    IndividualTracks,
    AllTracks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SchedulerSelection {
    #[default]
    Auto,
    Callback,
    Polling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackPreferences {
    #[serde(default = "default_primary_seek_length")]
    pub primary_seek_length: SeekLength,
    #[serde(default = "default_secondary_seek_length")]
    pub secondary_seek_length: SeekLength,
    #[serde(default = "default_continuous_seek_seconds")]
    pub continuous_seek_seconds: f64,
    #[serde(default)]
    pub remember_last_position: RememberLastPosition,
    #[serde(default)]
    pub gap_between_tracks: bool,
    #[serde(default = "default_gap_between_tracks_seconds")]
    pub gap_between_tracks_seconds: f64,
    #[serde(default)]
    pub scheduler: SchedulerSelection,
    #[serde(default = "default_transcode_extensions")]
    pub transcode_extensions: Vec<String>,
}

fn default_primary_seek_length() -> SeekLength {
    SeekLength::constant(5)
}

fn default_secondary_seek_length() -> SeekLength {
    SeekLength {
        option: SeekLengthOption::Constant,
        constant_seconds: 30,
        percentage: 10.0,
    }
}

fn default_continuous_seek_seconds() -> f64 {
    5.0
}

fn default_gap_between_tracks_seconds() -> f64 {
    5.0
}

fn default_transcode_extensions() -> Vec<String> {
    vec![String::from("m4a"), String::from("aac")]
}

impl Default for PlaybackPreferences {
    fn default() -> Self {
        Self {
            primary_seek_length: default_primary_seek_length(),
            secondary_seek_length: default_secondary_seek_length(),
            continuous_seek_seconds: default_continuous_seek_seconds(),
            remember_last_position: RememberLastPosition::default(),
            gap_between_tracks: false,
            gap_between_tracks_seconds: default_gap_between_tracks_seconds(),
            scheduler: SchedulerSelection::default(),
            transcode_extensions: default_transcode_extensions(),
        }
    }
}

/// Preferences shared between the orchestrator and the chain actions that read them.
pub type SharedPreferences = Arc<Mutex<PlaybackPreferences>>;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistedState {
    #[serde(default)]
    pub preferences: PlaybackPreferences,
    #[serde(default)]
    pub profiles: Vec<PlaybackProfile>,
}
