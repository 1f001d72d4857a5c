#![allow(dead_code)]

use segue::audio::{CompletionHandler, PlayerNode, TrackPreparer};
use segue::chain::actions::ChainServices;
use segue::chain::context::{ContextRegistry, Generation};
use segue::error::{PlaybackError, Result};
use segue::events::EventBus;
use segue::model::{PlaybackContext, PlaybackPreferences, Track};
use segue::orchestrator::PlaybackOrchestrator;
use segue::player::Player;
use segue::profiles::PlaybackProfiles;
use segue::queue::TrackQueue;
use segue::scheduler::{CallbackScheduler, Scheduler};
use segue::segment::PlaybackSegment;
use segue::session::SessionRegistry;
use segue::transcoder::Transcoder;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

pub const SAMPLE_RATE: f64 = 1_000.0;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("test mutex")
}

pub fn prepared_track(name: &str, duration: f64) -> Arc<Track> {
    let frames = (duration * SAMPLE_RATE) as u64;
    Arc::new(
        Track::new(name, name, duration)
            .with_playback_context(PlaybackContext::new(name, SAMPLE_RATE, frames)),
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSegment {
    pub id: u64,
    pub file: PathBuf,
    pub first_frame: u64,
    pub last_frame: u64,
    pub immediate: bool,
}

#[derive(Default)]
struct NodeState {
    scheduled: Vec<ScheduledSegment>,
    pending: VecDeque<Option<CompletionHandler>>,
    playing: bool,
    position: Option<f64>,
    stops: usize,
}

/// Player node that records what it is asked to play and only completes segments when
/// a test says so.
#[derive(Default)]
pub struct RecordingNode {
    state: Mutex<NodeState>,
}

impl RecordingNode {
    pub fn scheduled(&self) -> Vec<ScheduledSegment> {
        lock(&self.state).scheduled.clone()
    }

    pub fn stops(&self) -> usize {
        lock(&self.state).stops
    }

    pub fn set_position(&self, position: f64) {
        lock(&self.state).position = Some(position);
    }

    /// Finishes the oldest pending segment and runs its handler, if it had one.
    pub fn complete_segment(&self) -> bool {
        let handler = lock(&self.state).pending.pop_front();
        match handler {
            Some(Some(handler)) => {
                handler();
                true
            }
            Some(None) => true,
            None => false,
        }
    }
}

impl PlayerNode for RecordingNode {
    fn schedule_segment(
        &self,
        segment: &PlaybackSegment,
        immediate: bool,
        on_complete: Option<CompletionHandler>,
    ) -> Result<()> {
        let mut state = lock(&self.state);
        if immediate {
            state.pending.clear();
        }
        state.scheduled.push(ScheduledSegment {
            id: segment.id,
            file: segment.file.clone(),
            first_frame: segment.first_frame,
            last_frame: segment.last_frame,
            immediate,
        });
        state.pending.push_back(on_complete);
        Ok(())
    }

    fn play(&self) {
        lock(&self.state).playing = true;
    }

    fn pause(&self) {
        lock(&self.state).playing = false;
    }

    fn stop(&self) {
        let mut state = lock(&self.state);
        state.pending.clear();
        state.playing = false;
        state.stops += 1;
    }

    fn is_playing(&self) -> bool {
        lock(&self.state).playing
    }

    fn seek_position(&self) -> Option<f64> {
        lock(&self.state).position
    }
}

/// Installs a context at the test sample rate; tracks listed as broken fail.
#[derive(Default)]
pub struct MemoryPreparer {
    pub broken: Mutex<Vec<PathBuf>>,
}

impl TrackPreparer for MemoryPreparer {
    fn validate(&self, track: &Track) -> Result<()> {
        if lock(&self.broken).contains(&track.path) {
            return Err(PlaybackError::not_playable(&track.path, "unsupported codec"));
        }
        Ok(())
    }

    fn prepare(&self, track: &Track) -> Result<()> {
        self.validate(track)?;
        if !track.is_prepared() {
            let frames = (track.duration * SAMPLE_RATE) as u64;
            track.set_playback_context(PlaybackContext::new(
                track.playable_path(),
                SAMPLE_RATE,
                frames,
            ));
        }
        Ok(())
    }
}

/// Treats `.m4a` as needing conversion and records requests; tests finish jobs by
/// sending the signal themselves.
#[derive(Default)]
pub struct MemoryTranscoder {
    pub started: Mutex<Vec<(PathBuf, Generation)>>,
    pub cancelled: Mutex<Vec<PathBuf>>,
}

impl MemoryTranscoder {
    pub fn started(&self) -> Vec<(PathBuf, Generation)> {
        lock(&self.started).clone()
    }
}

impl Transcoder for MemoryTranscoder {
    fn needs_transcoding(&self, track: &Track) -> bool {
        track.extension().as_deref() == Some("m4a") && track.transcoded_file().is_none()
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

pub struct Rig {
    pub orchestrator: PlaybackOrchestrator,
    pub sessions: SessionRegistry,
    pub node: Arc<RecordingNode>,
    pub queue: Arc<TrackQueue>,
    pub preparer: Arc<MemoryPreparer>,
    pub transcoder: Arc<MemoryTranscoder>,
    pub events: EventBus,
}

/// Full stack over a [`RecordingNode`]: callback scheduler, real player, real chains.
pub fn rig(tracks: Vec<Arc<Track>>, preferences: PlaybackPreferences) -> Rig {
    let (events, receiver) = EventBus::channel();
    let sessions = SessionRegistry::new();
    let node = Arc::new(RecordingNode::default());
    let scheduler: Arc<dyn Scheduler> = Arc::new(CallbackScheduler::new(
        node.clone(),
        sessions.clone(),
        events.clone(),
    ));
    let queue = Arc::new(TrackQueue::new(tracks));
    let preparer = Arc::new(MemoryPreparer::default());
    let transcoder = Arc::new(MemoryTranscoder::default());
    let services = ChainServices {
        player: Arc::new(Player::new(scheduler, sessions.clone())),
        queue: queue.clone(),
        preparer: preparer.clone(),
        transcoder: transcoder.clone(),
        profiles: PlaybackProfiles::new(),
        preferences: Arc::new(Mutex::new(preferences)),
        contexts: ContextRegistry::new(),
        events: events.clone(),
    };
    Rig {
        orchestrator: PlaybackOrchestrator::new(services, sessions.clone(), receiver),
        sessions,
        node,
        queue,
        preparer,
        transcoder,
        events,
    }
}
