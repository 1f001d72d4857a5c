use crate::chain::context::PlaybackRequestContext;
use crate::chain::{ActionOutcome, PlaybackChainAction};
use crate::lock;
use crate::model::{GapKind, GapPosition, PlaybackGap, SharedPreferences};
use crate::queue::PlayQueue;
use std::sync::Arc;
use tracing::debug;

/// Collects the gap configured before the requested track, or the request's own delay.
pub struct SetPlaybackDelay {
    queue: Arc<dyn PlayQueue>,
}

impl SetPlaybackDelay {
    pub fn new(queue: Arc<dyn PlayQueue>) -> Self {
        Self { queue }
    }
}

impl PlaybackChainAction for SetPlaybackDelay {
    fn name(&self) -> &'static str {
        "set_playback_delay"
    }

    fn execute(&self, context: &mut PlaybackRequestContext) -> ActionOutcome {
        let Some(track) = context.requested_track.clone() else {
            return ActionOutcome::Terminate(None);
        };
        if !context.params.allow_delay {
            return ActionOutcome::Proceed;
        }

        if let Some(delay) = context.params.delay {
            context.remove_all_gaps();
            if delay > 0.0 {
                context.add_gap(PlaybackGap::new(
                    delay,
                    GapPosition::BeforeTrack,
                    GapKind::OneTime,
                ));
            }
            return ActionOutcome::Proceed;
        }

        if let Some(gap) = self.queue.gap_before(&track) {
            // An explicit gap replaces the one implied by the preferences.
            context.remove_gaps_of_kind(GapKind::Implicit);
            context.add_gap(gap);
            if gap.kind == GapKind::OneTime {
                self.queue.remove_gap(&track, GapPosition::BeforeTrack);
            }
        }
        if let Some(delay) = context.delay() {
            debug!(track = %track.path.display(), delay, "delay before playback");
        }
        ActionOutcome::Proceed
    }
}

/// Inserts the gap that follows a track which just finished on its own.
pub struct DelayAfterTrackCompletion {
    queue: Arc<dyn PlayQueue>,
    preferences: SharedPreferences,
}

impl DelayAfterTrackCompletion {
    pub fn new(queue: Arc<dyn PlayQueue>, preferences: SharedPreferences) -> Self {
        Self { queue, preferences }
    }
}

impl PlaybackChainAction for DelayAfterTrackCompletion {
    fn name(&self) -> &'static str {
        "delay_after_track_completion"
    }

    fn execute(&self, context: &mut PlaybackRequestContext) -> ActionOutcome {
        let (Some(completed), Some(_)) = (context.current_track.clone(), &context.requested_track) else {
            return ActionOutcome::Proceed;
        };

        if let Some(gap) = self.queue.gap_after(&completed) {
            context.add_gap(gap);
            if gap.kind == GapKind::OneTime {
                self.queue.remove_gap(&completed, GapPosition::AfterTrack);
            }
            return ActionOutcome::Proceed;
        }

        let preferences = lock(&self.preferences);
        if preferences.gap_between_tracks && preferences.gap_between_tracks_seconds > 0.0 {
            let gap = PlaybackGap::new(
                preferences.gap_between_tracks_seconds,
                GapPosition::AfterTrack,
                GapKind::Implicit,
            );
            context.add_gap(gap);
        }
        ActionOutcome::Proceed
    }
}
