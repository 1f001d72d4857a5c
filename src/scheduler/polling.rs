use super::{Scheduler, SchedulerCore};
use crate::audio::PlayerNode;
use crate::error::Result;
use crate::events::EventBus;
use crate::lock;
use crate::session::{PlaybackSession, SessionRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

pub const POLL_INTERVAL: Duration = Duration::from_millis(125);

/// Slack allowed when comparing the sampled position with an end time.
pub const COMPLETION_TOLERANCE: f64 = 0.001;

/// Runs `tick` every `interval` on its own thread until cancelled, dropped, or `tick`
/// returns false.
pub struct RepeatingTask {
    cancelled: Arc<AtomicBool>,
}

impl RepeatingTask {
    pub fn start(interval: Duration, mut tick: impl FnMut() -> bool + Send + 'static) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        thread::spawn(move || {
            loop {
                thread::sleep(interval);
                if flag.load(Ordering::Acquire) || !tick() {
                    break;
                }
            }
        });
        Self { cancelled }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Detects segment ends by sampling the node's position, for nodes whose completion
/// callbacks fire early or not at all.
pub struct PollingScheduler {
    core: Arc<SchedulerCore>,
    poller: Mutex<Option<RepeatingTask>>,
}

impl PollingScheduler {
    pub fn new(node: Arc<dyn PlayerNode>, sessions: SessionRegistry, events: EventBus) -> Self {
        Self {
            core: Arc::new(SchedulerCore::new(node, sessions, events)),
            poller: Mutex::new(None),
        }
    }

    fn arm(&self, session: &PlaybackSession) {
        let core = Arc::clone(&self.core);
        let session = session.clone();
        let task = RepeatingTask::start(POLL_INTERVAL, move || poll(&core, &session));
        if let Some(previous) = lock(&self.poller).replace(task) {
            previous.cancel();
        }
    }

    fn disarm(&self) {
        if let Some(task) = lock(&self.poller).take() {
            task.cancel();
        }
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.poller)
            .as_ref()
            .is_some_and(|task| !task.is_cancelled())
    }
}

// One sample of the completion poll. Returns false once this session needs no more polling.
fn poll(core: &SchedulerCore, session: &PlaybackSession) -> bool {
    if !core.sessions.is_current(session) {
        trace!(session = %session.id, "poller for stale session stopped");
        return false;
    }
    let position = core.node.seek_position().unwrap_or(0.0);

    if let Some(end_time) = session.playback_loop.and_then(|l| l.end_time) {
        if position >= end_time - COMPLETION_TOLERANCE {
            if let Err(err) = core.schedule_loop_restart(session, None) {
                warn!(%err, "failed to restart loop");
                return false;
            }
        }
        return true;
    }

    if position >= session.track.duration - COMPLETION_TOLERANCE && core.node.is_playing() {
        debug!(session = %session.id, position, "end of track detected by polling");
        core.track_segment_completed(session);
        return false;
    }
    true
}

impl Scheduler for PollingScheduler {
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
        self.disarm();
        self.core
            .schedule_track_from(session, time, begin_playback, None)?;
        self.arm(session);
        Ok(())
    }

    fn play_loop_from(
        &self,
        session: &PlaybackSession,
        start_time: f64,
        begin_playback: bool,
    ) -> Result<()> {
        self.disarm();
        if self
            .core
            .schedule_loop_from(session, start_time, begin_playback, None)?
        {
            self.arm(session);
        }
        Ok(())
    }

    fn end_loop(
        &self,
        session: &PlaybackSession,
        loop_end_time: f64,
        begin_playback: bool,
    ) -> Result<()> {
        self.disarm();
        self.core
            .schedule_continuation(session, loop_end_time, begin_playback, None)?;
        self.arm(session);
        Ok(())
    }

    fn restart_loop(&self, session: &PlaybackSession) -> Result<()> {
        self.core.schedule_loop_restart(session, None)
    }

    fn pause(&self) {
        self.core.pause();
    }

    fn resume(&self) {
        self.core.resume();
    }

    fn stop(&self) {
        self.disarm();
        self.core.stop();
    }

    fn seek_position(&self) -> f64 {
        self.core.seek_position()
    }

    fn is_playing(&self) -> bool {
        self.core.node.is_playing()
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}
