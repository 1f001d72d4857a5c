use super::ChainServices;
use crate::audio::TrackPreparer;
use crate::chain::context::{ContextRegistry, Generation};
use crate::error::{PlaybackError, Result};
use crate::events::{EventBus, Message};
use crate::lock;
use crate::model::{PlaybackContext, PlaybackPreferences, PlaybackState, Track};
use crate::player::{PlaybackControl, SeekResult};
use crate::profiles::PlaybackProfiles;
use crate::queue::TrackQueue;
use crate::session::PlaybackLoop;
use crate::transcoder::Transcoder;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub(crate) fn track(name: &str, duration: f64) -> Arc<Track> {
    Arc::new(Track::new(name, name, duration))
}

#[derive(Default)]
pub(crate) struct RecordingPlayer {
    pub state: Mutex<PlaybackState>,
    pub track: Mutex<Option<Arc<Track>>>,
    pub stops: AtomicUsize,
    pub plays: Mutex<Vec<(PathBuf, f64, Option<f64>)>>,
}

impl RecordingPlayer {
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn plays(&self) -> Vec<(PathBuf, f64, Option<f64>)> {
        lock(&self.plays).clone()
    }
}

impl PlaybackControl for RecordingPlayer {
    fn state(&self) -> PlaybackState {
        *lock(&self.state)
    }

    fn playing_track(&self) -> Option<Arc<Track>> {
        lock(&self.track).clone()
    }

    fn seek_position(&self) -> f64 {
        0.0
    }

    fn play(&self, track: &Arc<Track>, start: f64, end: Option<f64>) -> Result<()> {
        lock(&self.plays).push((track.path.clone(), start, end));
        *lock(&self.track) = Some(Arc::clone(track));
        *lock(&self.state) = PlaybackState::Playing;
        Ok(())
    }

    fn pause(&self) {
        *lock(&self.state) = PlaybackState::Paused;
    }

    fn resume(&self) {
        *lock(&self.state) = PlaybackState::Playing;
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *lock(&self.track) = None;
        *lock(&self.state) = PlaybackState::NoTrack;
    }

    fn waiting(&self) {
        *lock(&self.state) = PlaybackState::Waiting;
    }

    fn transcoding(&self) {
        *lock(&self.state) = PlaybackState::Transcoding;
    }

    fn attempt_seek_to_time(&self, _: &Track, time: f64) -> SeekResult {
        SeekResult {
            actual_position: time,
            loop_removed: false,
            track_playback_completed: false,
        }
    }

    fn force_seek_to_time(&self, track: &Track, time: f64) -> SeekResult {
        self.attempt_seek_to_time(track, time)
    }

    fn toggle_loop(&self) -> Option<PlaybackLoop> {
        None
    }

    fn define_loop(&self, start_time: f64, end_time: f64) -> Option<PlaybackLoop> {
        Some(PlaybackLoop::bounded(start_time, end_time))
    }

    fn playback_loop(&self) -> Option<PlaybackLoop> {
        None
    }

    fn playing_track_start_time(&self) -> Option<Instant> {
        None
    }
}

#[derive(Default)]
pub(crate) struct FakePreparer {
    pub broken: Mutex<Vec<PathBuf>>,
    pub prepared: AtomicUsize,
}

impl TrackPreparer for FakePreparer {
    fn validate(&self, track: &Track) -> Result<()> {
        if lock(&self.broken).contains(&track.path) {
            return Err(PlaybackError::not_playable(&track.path, "unreadable"));
        }
        Ok(())
    }

    fn prepare(&self, track: &Track) -> Result<()> {
        self.validate(track)?;
        self.prepared.fetch_add(1, Ordering::SeqCst);
        let frames = (track.duration * 1_000.0) as u64;
        track.set_playback_context(PlaybackContext::new(track.playable_path(), 1_000.0, frames));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeTranscoder {
    pub started: Mutex<Vec<(PathBuf, Generation)>>,
    pub cancelled: Mutex<Vec<PathBuf>>,
}

impl Transcoder for FakeTranscoder {
    fn needs_transcoding(&self, track: &Track) -> bool {
        track.extension().as_deref() == Some("m4a") && !self.is_transcoded(track)
    }

    fn is_transcoded(&self, track: &Track) -> bool {
        track.transcoded_file().is_some()
    }

    fn is_transcoding(&self, track: &Track) -> bool {
        lock(&self.started).iter().any(|(path, _)| *path == track.path)
    }

    fn transcode(&self, track: &Arc<Track>, generation: Generation) {
        lock(&self.started).push((track.path.clone(), generation));
    }

    fn cancel(&self, track: &Track) {
        lock(&self.cancelled).push(track.path.clone());
    }
}

pub(crate) struct Harness {
    pub player: Arc<RecordingPlayer>,
    pub queue: Arc<TrackQueue>,
    pub preparer: Arc<FakePreparer>,
    pub transcoder: Arc<FakeTranscoder>,
    pub receiver: Receiver<Message>,
}

pub(crate) fn services(tracks: Vec<Arc<Track>>) -> (ChainServices, Harness) {
    let (events, receiver) = EventBus::channel();
    let player = Arc::new(RecordingPlayer::default());
    let queue = Arc::new(TrackQueue::new(tracks));
    let preparer = Arc::new(FakePreparer::default());
    let transcoder = Arc::new(FakeTranscoder::default());
    let services = ChainServices {
        player: player.clone(),
        queue: queue.clone(),
        preparer: preparer.clone(),
        transcoder: transcoder.clone(),
        profiles: PlaybackProfiles::new(),
        preferences: Arc::new(Mutex::new(PlaybackPreferences::default())),
        contexts: ContextRegistry::new(),
        events,
    };
    (
        services,
        Harness {
            player,
            queue,
            preparer,
            transcoder,
            receiver,
        },
    )
}
