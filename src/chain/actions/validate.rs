use crate::audio::TrackPreparer;
use crate::chain::context::PlaybackRequestContext;
use crate::chain::{ActionOutcome, PlaybackChainAction};
use crate::queue::PlayQueue;
use std::sync::Arc;

/// Rejects tracks that cannot be played before anything is scheduled for them. A
/// rejected track also ends the queue's sequence.
pub struct ValidateNewTrack {
    preparer: Arc<dyn TrackPreparer>,
    queue: Arc<dyn PlayQueue>,
}

impl ValidateNewTrack {
    pub fn new(preparer: Arc<dyn TrackPreparer>, queue: Arc<dyn PlayQueue>) -> Self {
        Self { preparer, queue }
    }
}

impl PlaybackChainAction for ValidateNewTrack {
    fn name(&self) -> &'static str {
        "validate_new_track"
    }

    fn execute(&self, context: &mut PlaybackRequestContext) -> ActionOutcome {
        let Some(track) = &context.requested_track else {
            return ActionOutcome::Terminate(None);
        };
        match self.preparer.validate(track) {
            Ok(()) => ActionOutcome::Proceed,
            Err(err) => {
                self.queue.end();
                ActionOutcome::Terminate(Some(err))
            }
        }
    }
}
