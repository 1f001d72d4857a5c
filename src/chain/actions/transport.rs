use crate::chain::context::PlaybackRequestContext;
use crate::chain::{ActionOutcome, PlaybackChainAction};
use crate::events::{EventBus, PlaybackEvent};
use crate::model::PlaybackState;
use crate::player::PlaybackControl;
use crate::queue::PlayQueue;
use crate::transcoder::Transcoder;
use std::sync::Arc;
use tracing::debug;

/// Abandons an in-flight transcode of the outgoing track.
pub struct CancelTranscoding {
    transcoder: Arc<dyn Transcoder>,
}

impl CancelTranscoding {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self { transcoder }
    }
}

impl PlaybackChainAction for CancelTranscoding {
    fn name(&self) -> &'static str {
        "cancel_transcoding"
    }

    fn execute(&self, context: &mut PlaybackRequestContext) -> ActionOutcome {
        if let Some(current) = &context.current_track
            && !context.requested_track_is(&current.path)
            && self.transcoder.is_transcoding(current)
        {
            self.transcoder.cancel(current);
        }
        ActionOutcome::Proceed
    }
}

pub struct HaltPlayback {
    player: Arc<dyn PlaybackControl>,
}

impl HaltPlayback {
    pub fn new(player: Arc<dyn PlaybackControl>) -> Self {
        Self { player }
    }
}

impl PlaybackChainAction for HaltPlayback {
    fn name(&self) -> &'static str {
        "halt_playback"
    }

    fn execute(&self, context: &mut PlaybackRequestContext) -> ActionOutcome {
        if context.current_state != PlaybackState::NoTrack {
            self.player.stop();
        }
        ActionOutcome::Proceed
    }
}

pub struct EndPlaybackSequence {
    queue: Arc<dyn PlayQueue>,
    events: EventBus,
}

impl EndPlaybackSequence {
    pub fn new(queue: Arc<dyn PlayQueue>, events: EventBus) -> Self {
        Self { queue, events }
    }
}

impl PlaybackChainAction for EndPlaybackSequence {
    fn name(&self) -> &'static str {
        "end_playback_sequence"
    }

    fn execute(&self, context: &mut PlaybackRequestContext) -> ActionOutcome {
        self.queue.end();
        self.events.publish(PlaybackEvent::TrackChanged {
            old_track: context.current_track.as_ref().map(|t| t.path.clone()),
            old_state: context.current_state,
            new_track: None,
        });
        ActionOutcome::Proceed
    }
}

/// Hands the prepared track to the player.
pub struct StartPlayback {
    player: Arc<dyn PlaybackControl>,
    events: EventBus,
}

impl StartPlayback {
    pub fn new(player: Arc<dyn PlaybackControl>, events: EventBus) -> Self {
        Self { player, events }
    }
}

impl PlaybackChainAction for StartPlayback {
    fn name(&self) -> &'static str {
        "start_playback"
    }

    fn execute(&self, context: &mut PlaybackRequestContext) -> ActionOutcome {
        let Some(track) = context.requested_track.clone() else {
            return ActionOutcome::Terminate(None);
        };
        let old_track = context.current_track.as_ref().map(|t| t.path.clone());
        self.events.publish(PlaybackEvent::PreTrackPlayback {
            old_track: old_track.clone(),
            old_state: context.current_state,
            new_track: Some(track.path.clone()),
        });

        let start = context.params.start_position.unwrap_or(0.0);
        if let Err(err) = self
            .player
            .play(&track, start, context.params.end_position)
        {
            return ActionOutcome::Terminate(Some(err));
        }
        debug!(track = %track.path.display(), start, "playback started");

        self.events.publish(PlaybackEvent::TrackChanged {
            old_track,
            old_state: context.current_state,
            new_track: Some(track.path.clone()),
        });
        ActionOutcome::Proceed
    }
}
