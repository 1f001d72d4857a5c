use crate::lock;
use crate::model::Track;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackLoop {
    pub start_time: f64,
    pub end_time: Option<f64>,
}

impl PlaybackLoop {
    pub fn starting_at(start_time: f64) -> Self {
        Self {
            start_time,
            end_time: None,
        }
    }

    pub fn bounded(start_time: f64, end_time: f64) -> Self {
        Self {
            start_time,
            end_time: Some(end_time),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn contains_position(&self, position: f64) -> bool {
        match self.end_time {
            Some(end) => position >= self.start_time && position <= end,
            None => position >= self.start_time,
        }
    }
}

/// One attempt to play a track. Two sessions are equal only if they share an id.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub id: SessionId,
    pub timestamp: Instant,
    pub track: Arc<Track>,
    pub playback_loop: Option<PlaybackLoop>,
}

impl PlaybackSession {
    fn new(track: Arc<Track>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Instant::now(),
            track,
            playback_loop: None,
        }
    }

    fn successor(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: self.timestamp,
            track: Arc::clone(&self.track),
            playback_loop: self.playback_loop,
        }
    }

    pub fn has_loop(&self) -> bool {
        self.playback_loop.is_some()
    }

    pub fn has_complete_loop(&self) -> bool {
        self.playback_loop.is_some_and(|l| l.is_complete())
    }
}

impl PartialEq for PlaybackSession {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PlaybackSession {}

/// Holds the single current session. Clones share the same slot, so the scheduler,
/// the player and completion handlers all see the same generation.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    current: Arc<Mutex<Option<PlaybackSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, track: Arc<Track>) -> PlaybackSession {
        let session = PlaybackSession::new(track);
        debug!(session = %session.id, track = %session.track.path.display(), "session started");
        *lock(&self.current) = Some(session.clone());
        session
    }

    pub fn start_new_session_for_playing_track(&self) -> Option<PlaybackSession> {
        let mut current = lock(&self.current);
        let session = current.as_ref()?.successor();
        trace!(session = %session.id, "session superseded for playing track");
        *current = Some(session.clone());
        Some(session)
    }

    pub fn end_current(&self) -> Option<PlaybackSession> {
        let ended = lock(&self.current).take();
        if let Some(session) = &ended {
            debug!(session = %session.id, "session ended");
        }
        ended
    }

    pub fn is_current(&self, session: &PlaybackSession) -> bool {
        self.is_current_id(session.id)
    }

    pub fn is_current_id(&self, id: SessionId) -> bool {
        lock(&self.current).as_ref().is_some_and(|s| s.id == id)
    }

    pub fn has_current_session(&self) -> bool {
        lock(&self.current).is_some()
    }

    pub fn current_session(&self) -> Option<PlaybackSession> {
        lock(&self.current).clone()
    }

    pub fn current_loop(&self) -> Option<PlaybackLoop> {
        lock(&self.current).as_ref().and_then(|s| s.playback_loop)
    }

    pub fn has_loop(&self) -> bool {
        self.current_loop().is_some()
    }

    pub fn has_complete_loop(&self) -> bool {
        self.current_loop().is_some_and(|l| l.is_complete())
    }

    pub fn begin_loop(&self, start_time: f64) -> Option<PlaybackSession> {
        self.mutate_loop(|_| Some(Some(PlaybackLoop::starting_at(start_time))))
    }

    /// Completes the pending loop. Ignored when there is no loop or `end_time`
    /// precedes its start.
    pub fn end_loop(&self, end_time: f64) -> Option<PlaybackSession> {
        self.mutate_loop(|existing| {
            let start = existing?.start_time;
            (end_time >= start).then_some(Some(PlaybackLoop::bounded(start, end_time)))
        })
    }

    pub fn define_loop(&self, start_time: f64, end_time: f64) -> Option<PlaybackSession> {
        self.mutate_loop(|_| {
            (end_time >= start_time).then_some(Some(PlaybackLoop::bounded(start_time, end_time)))
        })
    }

    pub fn remove_loop(&self) -> Option<PlaybackSession> {
        self.mutate_loop(|existing| existing.map(|_| None))
    }

    // Every loop change moves the current session to a fresh id so completions
    // scheduled under the old loop are dropped.
    fn mutate_loop(
        &self,
        change: impl FnOnce(Option<PlaybackLoop>) -> Option<Option<PlaybackLoop>>,
    ) -> Option<PlaybackSession> {
        let mut current = lock(&self.current);
        let existing = current.as_ref()?;
        let new_loop = change(existing.playback_loop)?;
        let mut session = existing.successor();
        session.playback_loop = new_loop;
        debug!(session = %session.id, playback_loop = ?new_loop, "playback loop changed");
        *current = Some(session.clone());
        Some(session)
    }
}
