use super::{Scheduler, SchedulerCore};
use crate::audio::{CompletionHandler, PlayerNode};
use crate::error::Result;
use crate::events::EventBus;
use crate::session::{PlaybackSession, SessionRegistry};
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

/// Learns about segment ends from the node's completion handlers.
pub struct CallbackScheduler {
    core: Arc<SchedulerCore>,
}

impl CallbackScheduler {
    pub fn new(node: Arc<dyn PlayerNode>, sessions: SessionRegistry, events: EventBus) -> Self {
        Self {
            core: Arc::new(SchedulerCore::new(node, sessions, events)),
        }
    }
}

// Handlers hold the core weakly: a dropped scheduler must not be revived by a
// segment that finishes afterwards.
fn track_handler(core: &Arc<SchedulerCore>, session: &PlaybackSession) -> CompletionHandler {
    let core = Arc::downgrade(core);
    let session = session.clone();
    Box::new(move || {
        if let Some(core) = core.upgrade() {
            core.track_segment_completed(&session);
        }
    })
}

fn loop_handler(core: &Arc<SchedulerCore>, session: &PlaybackSession) -> CompletionHandler {
    let core: Weak<SchedulerCore> = Arc::downgrade(core);
    let session = session.clone();
    Box::new(move || {
        let Some(core) = core.upgrade() else {
            return;
        };
        if !core.is_current_loop(&session) {
            trace!(session = %session.id, "loop completion for stale session dropped");
            return;
        }
        if let Err(err) = restart_loop(&core, &session) {
            warn!(%err, "failed to restart loop");
        }
    })
}

fn restart_loop(core: &Arc<SchedulerCore>, session: &PlaybackSession) -> Result<()> {
    core.schedule_loop_restart(session, Some(loop_handler(core, session)))
}

impl Scheduler for CallbackScheduler {
    fn play_track(&self, session: &PlaybackSession, start_position: f64) -> Result<()> {
        if session.has_complete_loop() {
            return self.play_loop(session, true);
        }
        self.seek_to_time(session, start_position, true)
    }

    fn seek_to_time(
        &self,
        session: &PlaybackSession,
        time: f64,
        begin_playback: bool,
    ) -> Result<()> {
        if let Some(playback_loop) = session.playback_loop.filter(|l| l.is_complete()) {
            let start = if playback_loop.contains_position(time) {
                time
            } else {
                playback_loop.start_time
            };
            return self.play_loop_from(session, start, begin_playback);
        }
        self.core.schedule_track_from(
            session,
            time,
            begin_playback,
            Some(track_handler(&self.core, session)),
        )
    }

    fn play_loop_from(
        &self,
        session: &PlaybackSession,
        start_time: f64,
        begin_playback: bool,
    ) -> Result<()> {
        self.core
            .schedule_loop_from(
                session,
                start_time,
                begin_playback,
                Some(loop_handler(&self.core, session)),
            )
            .map(|_| ())
    }

    fn end_loop(
        &self,
        session: &PlaybackSession,
        loop_end_time: f64,
        begin_playback: bool,
    ) -> Result<()> {
        self.core.schedule_continuation(
            session,
            loop_end_time,
            begin_playback,
            Some(track_handler(&self.core, session)),
        )
    }

    fn restart_loop(&self, session: &PlaybackSession) -> Result<()> {
        restart_loop(&self.core, session)
    }

    fn pause(&self) {
        self.core.pause();
    }

    fn resume(&self) {
        self.core.resume();
    }

    fn stop(&self) {
        self.core.stop();
    }

    fn seek_position(&self) -> f64 {
        self.core.seek_position()
    }

    fn is_playing(&self) -> bool {
        self.core.node.is_playing()
    }
}
