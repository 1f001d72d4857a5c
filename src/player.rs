use crate::error::Result;
use crate::lock;
use crate::model::{PlaybackState, Track};
use crate::scheduler::Scheduler;
use crate::session::{PlaybackLoop, SessionRegistry};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekResult {
    pub actual_position: f64,
    pub loop_removed: bool,
    pub track_playback_completed: bool,
}

/// Transport operations the chain actions and the orchestrator drive.
pub trait PlaybackControl: Send + Sync {
    fn state(&self) -> PlaybackState;
    fn playing_track(&self) -> Option<Arc<Track>>;
    fn seek_position(&self) -> f64;
    /// Starts `track` at `start_position`. With an `end_position` the range becomes a
    /// loop and plays as one.
    fn play(&self, track: &Arc<Track>, start_position: f64, end_position: Option<f64>)
    -> Result<()>;
    fn pause(&self);
    fn resume(&self);
    fn stop(&self);
    fn waiting(&self);
    fn transcoding(&self);
    /// Seeks without ever removing a loop: positions outside it land on its start.
    fn attempt_seek_to_time(&self, track: &Track, time: f64) -> SeekResult;
    /// Seeks anywhere, removing a loop that does not contain `time`.
    fn force_seek_to_time(&self, track: &Track, time: f64) -> SeekResult;
    /// Cycles loop state: none, pending start, complete, none.
    fn toggle_loop(&self) -> Option<PlaybackLoop>;
    fn define_loop(&self, start_time: f64, end_time: f64) -> Option<PlaybackLoop>;
    fn playback_loop(&self) -> Option<PlaybackLoop>;
    fn playing_track_start_time(&self) -> Option<Instant>;
}

pub struct Player {
    scheduler: Arc<dyn Scheduler>,
    sessions: SessionRegistry,
    state: Mutex<PlaybackState>,
}

impl Player {
    pub fn new(scheduler: Arc<dyn Scheduler>, sessions: SessionRegistry) -> Self {
        Self {
            scheduler,
            sessions,
            state: Mutex::new(PlaybackState::NoTrack),
        }
    }

    fn set_state(&self, state: PlaybackState) {
        *lock(&self.state) = state;
    }

    fn seek(&self, track: &Track, time: f64, loop_removed: bool) -> SeekResult {
        let state = self.state();
        let track_playback_completed = time >= track.duration && state == PlaybackState::Playing;
        let actual_position = time.clamp(0.0, track.duration.max(0.0));

        if !track_playback_completed
            && let Some(session) = self.sessions.start_new_session_for_playing_track()
            && let Err(err) = self.scheduler.seek_to_time(
                &session,
                actual_position,
                state == PlaybackState::Playing,
            )
        {
            warn!(%err, "seek failed");
        }

        SeekResult {
            actual_position,
            loop_removed,
            track_playback_completed,
        }
    }
}

impl PlaybackControl for Player {
    fn state(&self) -> PlaybackState {
        *lock(&self.state)
    }

    fn playing_track(&self) -> Option<Arc<Track>> {
        self.sessions.current_session().map(|session| session.track)
    }

    fn seek_position(&self) -> f64 {
        if self.state().is_playing_or_paused() {
            self.scheduler.seek_position()
        } else {
            0.0
        }
    }

    fn play(
        &self,
        track: &Arc<Track>,
        start_position: f64,
        end_position: Option<f64>,
    ) -> Result<()> {
        let session = self.sessions.start(Arc::clone(track));
        let looped = end_position.and_then(|end| self.sessions.define_loop(start_position, end));

        let scheduled = match &looped {
            Some(looped) => self.scheduler.play_loop(looped, true),
            None => self.scheduler.play_track(&session, start_position),
        };
        if let Err(err) = scheduled {
            self.sessions.end_current();
            self.scheduler.stop();
            self.set_state(PlaybackState::NoTrack);
            return Err(err);
        }

        debug!(track = %track.path.display(), start_position, ?end_position, "playing");
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    fn pause(&self) {
        self.scheduler.pause();
        self.set_state(PlaybackState::Paused);
    }

    fn resume(&self) {
        self.scheduler.resume();
        self.set_state(PlaybackState::Playing);
    }

    fn stop(&self) {
        self.sessions.end_current();
        self.scheduler.stop();
        self.set_state(PlaybackState::NoTrack);
    }

    fn waiting(&self) {
        self.set_state(PlaybackState::Waiting);
    }

    fn transcoding(&self) {
        self.set_state(PlaybackState::Transcoding);
    }

    fn attempt_seek_to_time(&self, track: &Track, time: f64) -> SeekResult {
        let mut time = time;
        if let Some(playback_loop) = self.sessions.current_loop() {
            if time < playback_loop.start_time {
                time = playback_loop.start_time;
            } else if let Some(end) = playback_loop.end_time
                && time >= end
            {
                time = playback_loop.start_time;
            }
        }
        self.seek(track, time, false)
    }

    fn force_seek_to_time(&self, track: &Track, time: f64) -> SeekResult {
        let loop_removed = self
            .sessions
            .current_loop()
            .is_some_and(|l| !l.contains_position(time))
            && self.sessions.remove_loop().is_some();
        self.seek(track, time, loop_removed)
    }

    fn toggle_loop(&self) -> Option<PlaybackLoop> {
        if !self.state().is_playing_or_paused() {
            return None;
        }
        let position = self.seek_position();
        let begin_playback = self.state() == PlaybackState::Playing;

        match self.sessions.current_loop() {
            None => {
                let session = self.sessions.begin_loop(position)?;
                // The running segment still reports to the old session.
                if let Err(err) = self.scheduler.seek_to_time(&session, position, begin_playback)
                {
                    warn!(%err, "failed to reschedule after loop start");
                }
                session.playback_loop
            }
            Some(pending) if !pending.is_complete() => {
                let session = self.sessions.end_loop(position)?;
                if let Err(err) = self.scheduler.play_loop(&session, begin_playback) {
                    warn!(%err, "failed to start loop");
                }
                session.playback_loop
            }
            Some(complete) => {
                let end_time = complete.end_time?;
                let session = self.sessions.remove_loop()?;
                if let Err(err) = self.scheduler.end_loop(&session, end_time, begin_playback) {
                    warn!(%err, "failed to continue after loop");
                }
                None
            }
        }
    }

    fn define_loop(&self, start_time: f64, end_time: f64) -> Option<PlaybackLoop> {
        let position = self.seek_position();
        let session = self.sessions.define_loop(start_time, end_time)?;
        let playback_loop = session.playback_loop?;
        let begin_playback = self.state() == PlaybackState::Playing;
        let start = if playback_loop.contains_position(position) {
            position
        } else {
            playback_loop.start_time
        };
        if let Err(err) = self
            .scheduler
            .play_loop_from(&session, start, begin_playback)
        {
            warn!(%err, "failed to start loop");
        }
        Some(playback_loop)
    }

    fn playback_loop(&self) -> Option<PlaybackLoop> {
        self.sessions.current_loop()
    }

    fn playing_track_start_time(&self) -> Option<Instant> {
        self.sessions
            .current_session()
            .map(|session| session.timestamp)
    }
}
