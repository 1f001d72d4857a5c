mod delay;
mod prepare;
mod profile;
#[cfg(test)]
pub(crate) mod testing;
mod transport;
mod validate;

pub use delay::{DelayAfterTrackCompletion, SetPlaybackDelay};
pub use prepare::{AudioFilePreparation, PredictiveTrackPreparation};
pub use profile::{ApplyPlaybackProfile, SavePlaybackProfile, save_profile};
pub use transport::{CancelTranscoding, EndPlaybackSequence, HaltPlayback, StartPlayback};
pub use validate::ValidateNewTrack;

use super::PlaybackChain;
use super::context::ContextRegistry;
use crate::audio::TrackPreparer;
use crate::events::EventBus;
use crate::model::SharedPreferences;
use crate::player::PlaybackControl;
use crate::profiles::PlaybackProfiles;
use crate::queue::PlayQueue;
use crate::transcoder::Transcoder;
use std::sync::Arc;

/// Everything the chain actions reach into, bundled so the three chains can be built
/// from one place.
#[derive(Clone)]
pub struct ChainServices {
    pub player: Arc<dyn PlaybackControl>,
    pub queue: Arc<dyn PlayQueue>,
    pub preparer: Arc<dyn TrackPreparer>,
    pub transcoder: Arc<dyn Transcoder>,
    pub profiles: PlaybackProfiles,
    pub preferences: SharedPreferences,
    pub contexts: ContextRegistry,
    pub events: EventBus,
}

impl ChainServices {
    fn chain(&self, name: &'static str) -> PlaybackChain {
        PlaybackChain::new(name, self.contexts.clone(), self.events.clone())
    }

    fn save_profile(&self) -> SavePlaybackProfile {
        SavePlaybackProfile::new(self.profiles.clone(), Arc::clone(&self.preferences))
    }

    // Shared tail of the start and track-completed chains.
    fn with_start_steps(&self, chain: PlaybackChain) -> PlaybackChain {
        chain
            .with_action(CancelTranscoding::new(Arc::clone(&self.transcoder)))
            .with_action(HaltPlayback::new(Arc::clone(&self.player)))
            .with_action(ValidateNewTrack::new(
                Arc::clone(&self.preparer),
                Arc::clone(&self.queue),
            ))
            .with_action(ApplyPlaybackProfile::new(
                self.profiles.clone(),
                Arc::clone(&self.preferences),
            ))
            .with_action(SetPlaybackDelay::new(Arc::clone(&self.queue)))
            .with_action(AudioFilePreparation::new(
                Arc::clone(&self.player),
                Arc::clone(&self.preparer),
                Arc::clone(&self.transcoder),
                Arc::clone(&self.queue),
                self.events.clone(),
            ))
            .with_action(StartPlayback::new(
                Arc::clone(&self.player),
                self.events.clone(),
            ))
            .with_action(PredictiveTrackPreparation::new(
                Arc::clone(&self.queue),
                Arc::clone(&self.preparer),
                Arc::clone(&self.transcoder),
            ))
    }

    pub fn start_chain(&self) -> PlaybackChain {
        self.with_start_steps(self.chain("start").with_action(self.save_profile()))
    }

    pub fn stop_chain(&self) -> PlaybackChain {
        self.chain("stop")
            .with_action(self.save_profile())
            .with_action(CancelTranscoding::new(Arc::clone(&self.transcoder)))
            .with_action(HaltPlayback::new(Arc::clone(&self.player)))
            .with_action(EndPlaybackSequence::new(
                Arc::clone(&self.queue),
                self.events.clone(),
            ))
    }

    pub fn track_completed_chain(&self) -> PlaybackChain {
        let chain = self
            .chain("track-completed")
            .with_action(self.save_profile())
            .with_action(DelayAfterTrackCompletion::new(
                Arc::clone(&self.queue),
                Arc::clone(&self.preferences),
            ));
        self.with_start_steps(chain)
    }
}
