use crate::chain::context::PlaybackRequestContext;
use crate::chain::{ActionOutcome, PlaybackChainAction};
use crate::lock;
use crate::model::{PlaybackProfile, RememberLastPosition, SharedPreferences, Track};
use crate::profiles::PlaybackProfiles;
use tracing::debug;

/// Records `position` as the place to resume `track` from. A position at or past the
/// end is stored as 0. Returns whether a profile was written.
pub fn save_profile(
    profiles: &PlaybackProfiles,
    remember: RememberLastPosition,
    track: &Track,
    position: f64,
) -> bool {
    let last_position = if position >= track.duration {
        0.0
    } else {
        position.max(0.0)
    };
    let save = match remember {
        RememberLastPosition::Off => false,
        RememberLastPosition::AllTracks => true,
        RememberLastPosition::IndividualTracks => profiles.has(&track.path),
    };
    if save {
        debug!(track = %track.path.display(), last_position, "saving playback profile");
        profiles.add(PlaybackProfile {
            track: track.path.clone(),
            last_position,
        });
    }
    save
}

/// Remembers where the outgoing track stopped.
pub struct SavePlaybackProfile {
    profiles: PlaybackProfiles,
    preferences: SharedPreferences,
}

impl SavePlaybackProfile {
    pub fn new(profiles: PlaybackProfiles, preferences: SharedPreferences) -> Self {
        Self {
            profiles,
            preferences,
        }
    }
}

impl PlaybackChainAction for SavePlaybackProfile {
    fn name(&self) -> &'static str {
        "save_playback_profile"
    }

    fn execute(&self, context: &mut PlaybackRequestContext) -> ActionOutcome {
        if context.current_state.is_playing_or_paused()
            && let Some(track) = &context.current_track
        {
            let remember = lock(&self.preferences).remember_last_position;
            save_profile(
                &self.profiles,
                remember,
                track,
                context.current_seek_position,
            );
        }
        ActionOutcome::Proceed
    }
}

/// Starts the requested track where its profile left off, unless the request already
/// names a start position.
pub struct ApplyPlaybackProfile {
    profiles: PlaybackProfiles,
    preferences: SharedPreferences,
}

impl ApplyPlaybackProfile {
    pub fn new(profiles: PlaybackProfiles, preferences: SharedPreferences) -> Self {
        Self {
            profiles,
            preferences,
        }
    }
}

impl PlaybackChainAction for ApplyPlaybackProfile {
    fn name(&self) -> &'static str {
        "apply_playback_profile"
    }

    fn execute(&self, context: &mut PlaybackRequestContext) -> ActionOutcome {
        if context.params.start_position.is_some()
            || lock(&self.preferences).remember_last_position == RememberLastPosition::Off
        {
            return ActionOutcome::Proceed;
        }
        let Some(track) = &context.requested_track else {
            return ActionOutcome::Proceed;
        };
        if let Some(profile) = self.profiles.get(&track.path) {
            let position = if profile.last_position >= track.duration {
                0.0
            } else {
                profile.last_position
            };
            debug!(track = %track.path.display(), position, "resuming from profile");
            context.params.start_position = Some(position);
        }
        ActionOutcome::Proceed
    }
}
