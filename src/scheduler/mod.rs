//! Segment scheduling on top of a [`PlayerNode`].
//!
//! Both schedulers share [`SchedulerCore`] for the frame math, the cached loop segment
//! and the completed-while-paused flag. They differ only in how they learn that a
//! segment has ended: [`CallbackScheduler`] attaches a handler to every segment,
//! [`PollingScheduler`] samples the node's position on a timer.

mod callback;
mod polling;

pub use callback::CallbackScheduler;
pub use polling::{COMPLETION_TOLERANCE, POLL_INTERVAL, PollingScheduler, RepeatingTask};

use crate::audio::{CompletionHandler, PlayerNode};
use crate::error::Result;
use crate::events::{EventBus, PlaybackEvent};
use crate::lock;
use crate::model::SchedulerSelection;
use crate::segment::PlaybackSegment;
use crate::session::{PlaybackLoop, PlaybackSession, SessionId, SessionRegistry};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, trace};

pub trait Scheduler: Send + Sync {
    /// Starts playback at `start_position`. A session that already carries a complete
    /// loop always starts as a loop.
    fn play_track(&self, session: &PlaybackSession, start_position: f64) -> Result<()>;

    fn seek_to_time(&self, session: &PlaybackSession, time: f64, begin_playback: bool)
    -> Result<()>;

    fn play_loop(&self, session: &PlaybackSession, begin_playback: bool) -> Result<()> {
        let Some(playback_loop) = session.playback_loop else {
            return Ok(());
        };
        self.play_loop_from(session, playback_loop.start_time, begin_playback)
    }

    fn play_loop_from(
        &self,
        session: &PlaybackSession,
        start_time: f64,
        begin_playback: bool,
    ) -> Result<()>;

    /// Continues from the end of a removed loop to the end of the track without an
    /// audible seam.
    fn end_loop(
        &self,
        session: &PlaybackSession,
        loop_end_time: f64,
        begin_playback: bool,
    ) -> Result<()>;

    fn restart_loop(&self, session: &PlaybackSession) -> Result<()>;

    fn pause(&self);

    fn resume(&self);

    fn stop(&self);

    fn seek_position(&self) -> f64;

    fn is_playing(&self) -> bool;
}

/// Picks the scheduler variant for `node`.
pub fn create_scheduler(
    selection: SchedulerSelection,
    node: Arc<dyn PlayerNode>,
    sessions: SessionRegistry,
    events: EventBus,
) -> Arc<dyn Scheduler> {
    let polling = match selection {
        SchedulerSelection::Polling => true,
        SchedulerSelection::Callback => false,
        SchedulerSelection::Auto => !node.reliable_completion_callbacks(),
    };
    if polling {
        info!("using polling scheduler");
        Arc::new(PollingScheduler::new(node, sessions, events))
    } else {
        info!("using callback scheduler");
        Arc::new(CallbackScheduler::new(node, sessions, events))
    }
}

#[derive(Default)]
struct CoreState {
    loop_segment: Option<PlaybackSegment>,
    completed_while_paused: Option<SessionId>,
}

pub(crate) struct SchedulerCore {
    node: Arc<dyn PlayerNode>,
    sessions: SessionRegistry,
    events: EventBus,
    state: Mutex<CoreState>,
}

impl SchedulerCore {
    fn new(node: Arc<dyn PlayerNode>, sessions: SessionRegistry, events: EventBus) -> Self {
        Self {
            node,
            sessions,
            events,
            state: Mutex::new(CoreState::default()),
        }
    }

    fn stop(&self) {
        self.node.stop();
        lock(&self.state).completed_while_paused = None;
    }

    fn pause(&self) {
        self.node.pause();
    }

    fn resume(&self) {
        let pending = lock(&self.state).completed_while_paused.take();
        if let Some(id) = pending
            && let Some(session) = self.sessions.current_session()
            && session.id == id
        {
            debug!(session = %id, "delivering completion deferred by pause");
            self.events.publish(PlaybackEvent::TrackCompleted(session));
            return;
        }
        self.node.play();
    }

    fn seek_position(&self) -> f64 {
        let raw = self.node.seek_position().unwrap_or(0.0);
        let Some(session) = self.sessions.current_session() else {
            return raw.max(0.0);
        };
        clamp_position(raw, session.track.duration, session.playback_loop)
    }

    fn schedule_track_from(
        &self,
        session: &PlaybackSession,
        time: f64,
        begin_playback: bool,
        on_complete: Option<CompletionHandler>,
    ) -> Result<()> {
        self.stop();
        let segment = PlaybackSegment::compute(session, time, None, None)?;
        debug!(
            session = %session.id,
            segment = segment.id,
            first_frame = segment.first_frame,
            last_frame = segment.last_frame,
            "scheduling track segment"
        );
        self.node.schedule_segment(&segment, true, on_complete)?;
        if begin_playback {
            self.node.play();
        }
        Ok(())
    }

    /// Returns false when the session has no complete loop containing `start_time`.
    fn schedule_loop_from(
        &self,
        session: &PlaybackSession,
        start_time: f64,
        begin_playback: bool,
        on_complete: Option<CompletionHandler>,
    ) -> Result<bool> {
        self.stop();
        let Some((playback_loop, end_time)) = complete_loop(session) else {
            return Ok(false);
        };
        if !playback_loop.contains_position(start_time) {
            debug!(session = %session.id, start_time, "loop start outside loop bounds");
            return Ok(false);
        }

        let segment = PlaybackSegment::compute(session, start_time, Some(end_time), None)?;
        // Only a segment spanning the whole loop can be replayed on restart.
        lock(&self.state).loop_segment =
            (start_time == playback_loop.start_time).then(|| segment.clone());
        debug!(
            session = %session.id,
            segment = segment.id,
            start_time,
            end_time,
            "scheduling loop segment"
        );
        self.node.schedule_segment(&segment, true, on_complete)?;
        if begin_playback {
            self.node.play();
        }
        self.publish_loop_restarted(session);
        Ok(true)
    }

    fn schedule_loop_restart(
        &self,
        session: &PlaybackSession,
        on_complete: Option<CompletionHandler>,
    ) -> Result<()> {
        let Some((playback_loop, end_time)) = complete_loop(session) else {
            return Ok(());
        };
        let was_playing = self.node.is_playing();
        self.stop();

        let cached = lock(&self.state)
            .loop_segment
            .clone()
            .filter(|segment| segment.session == *session);
        let segment = match cached {
            Some(segment) => segment,
            None => {
                let segment = PlaybackSegment::compute(
                    session,
                    playback_loop.start_time,
                    Some(end_time),
                    None,
                )?;
                lock(&self.state).loop_segment = Some(segment.clone());
                segment
            }
        };

        trace!(session = %session.id, segment = segment.id, "restarting loop");
        self.node.schedule_segment(&segment, true, on_complete)?;
        if was_playing {
            self.node.play();
        }
        self.publish_loop_restarted(session);
        Ok(())
    }

    fn schedule_continuation(
        &self,
        session: &PlaybackSession,
        loop_end_time: f64,
        begin_playback: bool,
        on_complete: Option<CompletionHandler>,
    ) -> Result<()> {
        let start_frame = lock(&self.state)
            .loop_segment
            .take()
            .filter(|segment| segment.session.track.path == session.track.path)
            .map(|segment| segment.last_frame + 1);
        let segment = PlaybackSegment::compute(session, loop_end_time, None, start_frame)?;
        debug!(
            session = %session.id,
            segment = segment.id,
            first_frame = segment.first_frame,
            "scheduling continuation after loop"
        );
        self.node.schedule_segment(&segment, false, on_complete)?;
        if begin_playback && !self.node.is_playing() {
            self.node.play();
        }
        Ok(())
    }

    fn track_segment_completed(&self, session: &PlaybackSession) {
        if !self.sessions.is_current(session) {
            trace!(session = %session.id, "completion for stale session dropped");
            return;
        }
        if self.node.is_playing() {
            debug!(session = %session.id, "track completed");
            self.events
                .publish(PlaybackEvent::TrackCompleted(session.clone()));
        } else {
            debug!(session = %session.id, "track completed while paused");
            lock(&self.state).completed_while_paused = Some(session.id);
        }
    }

    fn is_current_loop(&self, session: &PlaybackSession) -> bool {
        self.sessions.is_current(session) && session.has_complete_loop()
    }

    fn publish_loop_restarted(&self, session: &PlaybackSession) {
        self.events.publish(PlaybackEvent::LoopRestarted {
            track: session.track.path.clone(),
        });
    }
}

fn complete_loop(session: &PlaybackSession) -> Option<(PlaybackLoop, f64)> {
    let playback_loop = session.playback_loop?;
    Some((playback_loop, playback_loop.end_time?))
}

/// Keeps a reported position inside the audible region: the loop when there is one,
/// otherwise the whole track.
pub fn clamp_position(position: f64, duration: f64, playback_loop: Option<PlaybackLoop>) -> f64 {
    let duration = duration.max(0.0);
    match playback_loop {
        Some(l) => {
            let upper = l.end_time.unwrap_or(duration).max(l.start_time);
            position.clamp(l.start_time, upper)
        }
        None => position.clamp(0.0, duration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prop_assert;

    #[test]
    fn clamps_into_complete_loop() {
        let l = PlaybackLoop::bounded(25.0, 37.0);
        assert_eq!(clamp_position(10.0, 100.0, Some(l)), 25.0);
        assert_eq!(clamp_position(40.0, 100.0, Some(l)), 37.0);
        assert_eq!(clamp_position(30.0, 100.0, Some(l)), 30.0);
    }

    #[test]
    fn pending_loop_clamps_only_its_start() {
        let l = PlaybackLoop::starting_at(25.0);
        assert_eq!(clamp_position(10.0, 100.0, Some(l)), 25.0);
        assert_eq!(clamp_position(90.0, 100.0, Some(l)), 90.0);
        assert_eq!(clamp_position(120.0, 100.0, Some(l)), 100.0);
    }

    proptest::proptest! {
        #[test]
        fn clamped_position_is_within_track(
            position in -100.0f64..1_000.0,
            duration in 0.0f64..600.0,
        ) {
            let clamped = clamp_position(position, duration, None);
            prop_assert!((0.0..=duration).contains(&clamped));
        }
    }
}
