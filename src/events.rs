//! Playback events and the single channel that carries them.
//!
//! Scheduler completions, chain signals (delay elapsed, transcoding finished) and
//! UI-facing notifications all travel over one `mpsc` channel, so the orchestrator
//! can block on a single receiver while it waits for anything to happen.

use crate::chain::context::ChainSignal;
use crate::error::PlaybackError;
use crate::model::PlaybackState;
use crate::session::PlaybackSession;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::trace;

#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    /// A segment played to its natural end while its session was still current.
    TrackCompleted(PlaybackSession),

    LoopRestarted {
        track: PathBuf,
    },

    PlaybackLoopChanged {
        track: PathBuf,
    },

    TrackChanged {
        old_track: Option<PathBuf>,
        old_state: PlaybackState,
        new_track: Option<PathBuf>,
    },

    TrackNotPlayed {
        old_track: Option<PathBuf>,
        error: PlaybackError,
    },

    /// Silence before `new_track` starts; `delay` is in seconds.
    GapStarted {
        old_track: Option<PathBuf>,
        new_track: PathBuf,
        delay: f64,
    },

    PreTrackPlayback {
        old_track: Option<PathBuf>,
        old_state: PlaybackState,
        new_track: Option<PathBuf>,
    },
}

#[derive(Debug, Clone)]
pub enum Message {
    Event(PlaybackEvent),
    Signal(ChainSignal),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: Sender<Message>,
}

impl EventBus {
    pub fn channel() -> (Self, Receiver<Message>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }

    pub fn publish(&self, event: PlaybackEvent) {
        trace!(?event, "publish");
        // A closed receiver means the orchestrator is gone; nothing left to notify.
        let _ = self.sender.send(Message::Event(event));
    }

    pub fn signal(&self, signal: ChainSignal) {
        trace!(?signal, "signal");
        let _ = self.sender.send(Message::Signal(signal));
    }
}
