//! Front door for playback commands.
//!
//! `PlaybackOrchestrator` turns user-level commands into playback requests for the
//! chains, forwards seeks and loop changes to the player, and drains the event channel
//! so completions and chain signals are handled on the caller's thread.

use crate::chain::actions::{ChainServices, save_profile};
use crate::chain::context::{ChainSignal, ContextRegistry, PlaybackParams};
use crate::chain::{ChainOutcome, PlaybackChain};
use crate::events::{EventBus, Message, PlaybackEvent};
use crate::lock;
use crate::model::{
    Chapter, PlaybackPreferences, PlaybackProfile, PlaybackState, SeekLength, SeekLengthOption,
    SharedPreferences, Track, UserInputMode,
};
use crate::player::{PlaybackControl, SeekResult};
use crate::profiles::PlaybackProfiles;
use crate::queue::PlayQueue;
use crate::session::{PlaybackLoop, PlaybackSession, SessionRegistry};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Nudge past a chapter boundary so seeking to a chapter never lands in the previous one.
pub const CHAPTER_START_MARGIN: f64 = 0.001;

const FALLBACK_PRIMARY_SEEK: f64 = 5.0;
const FALLBACK_SECONDARY_SEEK: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackPosition {
    pub elapsed: f64,
    pub percentage: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    None,
    Started,
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChapter {
    pub index: usize,
    pub chapter: Chapter,
}

/// Where `position` falls among `chapters`: `Ok(index)` inside a chapter, `Err(index)`
/// in a gap before the chapter at `index` (which may be one past the end).
pub fn locate_chapter(chapters: &[Chapter], position: f64) -> Result<usize, usize> {
    chapters.binary_search_by(|chapter| {
        if chapter.contains(position) {
            std::cmp::Ordering::Equal
        } else if chapter.start_time > position {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Less
        }
    })
}

fn chapter_start(chapter: &Chapter) -> f64 {
    if chapter.start_time > 0.0 {
        chapter.start_time + CHAPTER_START_MARGIN
    } else {
        chapter.start_time
    }
}

pub struct PlaybackOrchestrator {
    player: Arc<dyn PlaybackControl>,
    queue: Arc<dyn PlayQueue>,
    profiles: PlaybackProfiles,
    preferences: SharedPreferences,
    contexts: ContextRegistry,
    sessions: SessionRegistry,
    events: EventBus,
    receiver: Receiver<Message>,
    start_chain: PlaybackChain,
    stop_chain: PlaybackChain,
    completed_chain: PlaybackChain,
}

impl PlaybackOrchestrator {
    /// `receiver` must be the other end of `services.events`.
    pub fn new(
        services: ChainServices,
        sessions: SessionRegistry,
        receiver: Receiver<Message>,
    ) -> Self {
        Self {
            start_chain: services.start_chain(),
            stop_chain: services.stop_chain(),
            completed_chain: services.track_completed_chain(),
            player: services.player,
            queue: services.queue,
            profiles: services.profiles,
            preferences: services.preferences,
            contexts: services.contexts,
            sessions,
            events: services.events,
            receiver,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.player.state()
    }

    pub fn queue(&self) -> &Arc<dyn PlayQueue> {
        &self.queue
    }

    pub fn profiles(&self) -> &PlaybackProfiles {
        &self.profiles
    }

    pub fn preferences(&self) -> PlaybackPreferences {
        lock(&self.preferences).clone()
    }

    pub fn set_preferences(&self, preferences: PlaybackPreferences) {
        *lock(&self.preferences) = preferences;
    }

    /// The queue's current track while it is playing or paused.
    pub fn playing_track(&self) -> Option<Arc<Track>> {
        if self.state().is_playing_or_paused() {
            self.queue.current()
        } else {
            None
        }
    }

    // Includes tracks still waiting out a gap or a transcode.
    fn active_track(&self) -> Option<Arc<Track>> {
        if self.state() == PlaybackState::NoTrack {
            None
        } else {
            self.queue.current()
        }
    }

    pub fn position(&self) -> PlaybackPosition {
        let Some(track) = self.playing_track() else {
            return PlaybackPosition::default();
        };
        let elapsed = self.player.seek_position();
        let percentage = if track.duration > 0.0 {
            elapsed * 100.0 / track.duration
        } else {
            0.0
        };
        PlaybackPosition {
            elapsed,
            percentage,
            duration: track.duration,
        }
    }

    pub fn playing_track_start_time(&self) -> Option<Instant> {
        self.player.playing_track_start_time()
    }

    // ---- transport ----

    /// Plays, pauses or resumes depending on the current state, returning the new one.
    pub fn toggle_play_pause(&self) -> PlaybackState {
        match self.state() {
            PlaybackState::NoTrack => {
                self.request(|queue| queue.start(), PlaybackParams::default());
            }
            PlaybackState::Paused => self.player.resume(),
            PlaybackState::Playing => self.player.pause(),
            PlaybackState::Waiting | PlaybackState::Transcoding => {}
        }
        self.state()
    }

    pub fn play_track_at(&self, index: usize, params: PlaybackParams) -> Option<ChainOutcome> {
        self.request(|queue| queue.select(index), params)
    }

    pub fn play_track(&self, track: &Track, params: PlaybackParams) -> Option<ChainOutcome> {
        self.request(|queue| queue.select_track(track), params)
    }

    pub fn next_track(&self) -> Option<ChainOutcome> {
        if self.state() == PlaybackState::NoTrack {
            return None;
        }
        self.request(|queue| queue.next(), PlaybackParams::default())
    }

    pub fn previous_track(&self) -> Option<ChainOutcome> {
        if self.state() == PlaybackState::NoTrack {
            return None;
        }
        self.request(|queue| queue.previous(), PlaybackParams::default())
    }

    fn request(
        &self,
        select: impl FnOnce(&dyn PlayQueue) -> Option<Arc<Track>>,
        params: PlaybackParams,
    ) -> Option<ChainOutcome> {
        let state = self.state();
        let current = self.active_track();
        let position = self.player.seek_position();
        if !params.interrupt_playback && current.is_some() {
            debug!("request would interrupt playback; ignored");
            return None;
        }
        let requested = select(self.queue.as_ref())?;
        let context = self
            .contexts
            .begin(state, current, position, Some(requested), params);
        Some(self.start_chain.execute(context))
    }

    pub fn stop(&self) -> Option<ChainOutcome> {
        let state = self.state();
        if state == PlaybackState::NoTrack {
            return None;
        }
        let context = self.contexts.begin(
            state,
            self.active_track(),
            self.player.seek_position(),
            None,
            PlaybackParams::default(),
        );
        Some(self.stop_chain.execute(context))
    }

    pub fn replay(&self) {
        if self.state().is_playing_or_paused() {
            self.seek_to_time(0.0);
            self.resume_if_paused();
        }
    }

    pub fn resume_if_paused(&self) {
        if self.state() == PlaybackState::Paused {
            self.player.resume();
        }
    }

    // ---- seeking ----

    fn seek_length(&self, length: SeekLength, fallback: f64) -> f64 {
        match length.option {
            SeekLengthOption::Constant => f64::from(length.constant_seconds),
            SeekLengthOption::Percentage => self
                .playing_track()
                .map_or(fallback, |track| track.duration * length.percentage / 100.0),
        }
    }

    pub fn primary_seek_length(&self, mode: UserInputMode) -> f64 {
        let (length, continuous) = {
            let preferences = lock(&self.preferences);
            (
                preferences.primary_seek_length,
                preferences.continuous_seek_seconds,
            )
        };
        match mode {
            UserInputMode::Continuous => continuous,
            UserInputMode::Discrete => self.seek_length(length, FALLBACK_PRIMARY_SEEK),
        }
    }

    pub fn secondary_seek_length(&self) -> f64 {
        let length = lock(&self.preferences).secondary_seek_length;
        self.seek_length(length, FALLBACK_SECONDARY_SEEK)
    }

    pub fn seek_forward(&self, mode: UserInputMode) -> Option<SeekResult> {
        self.attempt_seek(self.player.seek_position() + self.primary_seek_length(mode))
    }

    pub fn seek_backward(&self, mode: UserInputMode) -> Option<SeekResult> {
        self.attempt_seek(self.player.seek_position() - self.primary_seek_length(mode))
    }

    pub fn seek_forward_secondary(&self) -> Option<SeekResult> {
        self.attempt_seek(self.player.seek_position() + self.secondary_seek_length())
    }

    pub fn seek_backward_secondary(&self) -> Option<SeekResult> {
        self.attempt_seek(self.player.seek_position() - self.secondary_seek_length())
    }

    pub fn seek_to_percentage(&self, percentage: f64) -> Option<SeekResult> {
        let track = self.playing_track()?;
        self.force_seek(percentage * track.duration / 100.0)
    }

    pub fn seek_to_time(&self, seconds: f64) -> Option<SeekResult> {
        self.force_seek(seconds)
    }

    fn attempt_seek(&self, position: f64) -> Option<SeekResult> {
        let track = self.playing_track()?;
        let result = self.player.attempt_seek_to_time(&track, position);
        if result.track_playback_completed {
            self.complete_playing_track();
        }
        Some(result)
    }

    fn force_seek(&self, position: f64) -> Option<SeekResult> {
        let track = self.playing_track()?;
        let result = self.player.force_seek_to_time(&track, position);
        if result.track_playback_completed {
            self.complete_playing_track();
        } else if result.loop_removed {
            self.events.publish(PlaybackEvent::PlaybackLoopChanged {
                track: track.path.clone(),
            });
        }
        Some(result)
    }

    // ---- loops ----

    pub fn toggle_loop(&self) -> Option<PlaybackLoop> {
        let track = self.playing_track()?;
        let toggled = self.player.toggle_loop();
        self.events.publish(PlaybackEvent::PlaybackLoopChanged {
            track: track.path.clone(),
        });
        toggled
    }

    pub fn playback_loop(&self) -> Option<PlaybackLoop> {
        self.player.playback_loop()
    }

    pub fn loop_state(&self) -> LoopState {
        match self.player.playback_loop() {
            Some(playback_loop) if playback_loop.is_complete() => LoopState::Complete,
            Some(_) => LoopState::Started,
            None => LoopState::None,
        }
    }

    // ---- chapters ----

    pub fn chapter_count(&self) -> usize {
        self.playing_track().map_or(0, |track| track.chapters.len())
    }

    pub fn current_chapter_index(&self) -> Option<usize> {
        let track = self.playing_track()?;
        locate_chapter(&track.chapters, self.player.seek_position()).ok()
    }

    pub fn playing_chapter(&self) -> Option<IndexedChapter> {
        let track = self.playing_track()?;
        let index = locate_chapter(&track.chapters, self.player.seek_position()).ok()?;
        track.chapters.get(index).map(|chapter| IndexedChapter {
            index,
            chapter: chapter.clone(),
        })
    }

    pub fn previous_chapter_index(&self) -> Option<usize> {
        let track = self.playing_track()?;
        if track.chapters.is_empty() {
            return None;
        }
        match locate_chapter(&track.chapters, self.player.seek_position()) {
            Ok(index) | Err(index) => index.checked_sub(1),
        }
    }

    pub fn next_chapter_index(&self) -> Option<usize> {
        let track = self.playing_track()?;
        let next = match locate_chapter(&track.chapters, self.player.seek_position()) {
            Ok(index) => index + 1,
            Err(index) => index,
        };
        (next < track.chapters.len()).then_some(next)
    }

    pub fn play_chapter(&self, index: usize) {
        let Some(track) = self.playing_track() else {
            return;
        };
        let Some(chapter) = track.chapters.get(index) else {
            return;
        };
        self.seek_to_time(chapter_start(chapter));
        self.resume_if_paused();
    }

    pub fn previous_chapter(&self) {
        if let Some(index) = self.previous_chapter_index() {
            self.play_chapter(index);
        }
    }

    pub fn next_chapter(&self) {
        if let Some(index) = self.next_chapter_index() {
            self.play_chapter(index);
        }
    }

    pub fn replay_chapter(&self) {
        if let Some(playing) = self.playing_chapter() {
            self.seek_to_time(chapter_start(&playing.chapter));
            self.resume_if_paused();
        }
    }

    fn chapter_loop(chapter: &Chapter) -> PlaybackLoop {
        PlaybackLoop::bounded(
            chapter_start(chapter),
            chapter.end_time - CHAPTER_START_MARGIN,
        )
    }

    pub fn chapter_loop_exists(&self) -> bool {
        let Some(current) = self.player.playback_loop() else {
            return false;
        };
        self.playing_track().is_some_and(|track| {
            track
                .chapters
                .iter()
                .any(|chapter| Self::chapter_loop(chapter) == current)
        })
    }

    /// Loops the playing chapter, or removes an existing chapter loop. Returns whether a
    /// chapter loop is now in place.
    pub fn toggle_chapter_loop(&self) -> bool {
        let Some(playing) = self.playing_chapter() else {
            return false;
        };
        if self.chapter_loop_exists() {
            self.toggle_loop();
            return false;
        }
        let bounds = Self::chapter_loop(&playing.chapter);
        let Some(end_time) = bounds.end_time else {
            return false;
        };
        let defined = self.player.define_loop(bounds.start_time, end_time);
        if let Some(track) = self.playing_track() {
            self.events.publish(PlaybackEvent::PlaybackLoopChanged {
                track: track.path.clone(),
            });
        }
        defined.is_some()
    }

    // ---- profiles ----

    /// Stores the playing track's position regardless of the remember-last-position mode.
    pub fn save_playback_profile(&self) {
        if let Some(track) = self.playing_track() {
            self.profiles.add(PlaybackProfile {
                track: track.path.clone(),
                last_position: self.player.seek_position(),
            });
        }
    }

    pub fn delete_playback_profile(&self) {
        if let Some(track) = self.playing_track() {
            self.profiles.remove(&track.path);
        }
    }

    pub fn on_app_exit(&self) {
        if let Some(track) = self.playing_track() {
            let remember = lock(&self.preferences).remember_last_position;
            save_profile(&self.profiles, remember, &track, self.player.seek_position());
        }
    }

    // ---- events ----

    /// Handles everything already queued on the event channel and returns the events
    /// meant for the outside world.
    pub fn pump(&self) -> Vec<PlaybackEvent> {
        let mut published = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            self.handle(message, &mut published);
        }
        published
    }

    /// Like [`pump`](Self::pump), but first waits up to `timeout` for something to arrive.
    pub fn wait_and_pump(&self, timeout: Duration) -> Vec<PlaybackEvent> {
        let mut published = Vec::new();
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => self.handle(message, &mut published),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                return published;
            }
        }
        published.extend(self.pump());
        published
    }

    fn handle(&self, message: Message, published: &mut Vec<PlaybackEvent>) {
        match message {
            Message::Signal(signal) => self.resume_chains(&signal),
            Message::Event(PlaybackEvent::TrackCompleted(session)) => {
                self.track_playback_completed(&session);
                published.push(PlaybackEvent::TrackCompleted(session));
            }
            Message::Event(event) => published.push(event),
        }
    }

    fn resume_chains(&self, signal: &ChainSignal) {
        for chain in [&self.start_chain, &self.completed_chain] {
            if let Some(outcome) = chain.resume(signal) {
                debug!(chain = chain.name(), ?outcome, "resumed");
                return;
            }
        }
        debug!(generation = signal.generation(), "signal for a superseded request");
    }

    fn track_playback_completed(&self, session: &PlaybackSession) {
        if self.sessions.is_current(session) {
            self.complete_playing_track();
        } else {
            let remember = lock(&self.preferences).remember_last_position;
            save_profile(&self.profiles, remember, &session.track, 0.0);
        }
    }

    fn complete_playing_track(&self) {
        let state = self.state();
        let completed = self.active_track();
        info!(
            track = ?completed.as_ref().map(|t| t.path.display().to_string()),
            "track finished"
        );
        let subsequent = self.queue.subsequent();
        let chain = if subsequent.is_some() {
            &self.completed_chain
        } else {
            &self.stop_chain
        };
        let context =
            self.contexts
                .begin(state, completed, 0.0, subsequent, PlaybackParams::default());
        chain.execute(context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::actions::testing::{services, track};
    use crate::model::RememberLastPosition;
    use std::path::Path;

    fn chapters() -> Vec<Chapter> {
        [(0.0, 10.0), (10.0, 20.0), (25.0, 40.0)]
            .into_iter()
            .enumerate()
            .map(|(i, (start_time, end_time))| Chapter {
                title: format!("chapter {i}"),
                start_time,
                end_time,
            })
            .collect()
    }

    fn orchestrator(tracks: Vec<Arc<Track>>) -> PlaybackOrchestrator {
        let (services, harness) = services(tracks);
        PlaybackOrchestrator::new(services, SessionRegistry::new(), harness.receiver)
    }

    #[test]
    fn locate_chapter_handles_gaps() {
        let chapters = chapters();
        assert_eq!(locate_chapter(&chapters, 0.0), Ok(0));
        assert_eq!(locate_chapter(&chapters, 10.0), Ok(1));
        assert_eq!(locate_chapter(&chapters, 22.0), Err(2));
        assert_eq!(locate_chapter(&chapters, 45.0), Err(3));
        assert_eq!(locate_chapter(&[], 1.0), Err(0));
    }

    #[test]
    fn chapter_start_skips_margin_at_zero() {
        let chapters = chapters();
        assert_eq!(chapter_start(&chapters[0]), 0.0);
        assert_eq!(chapter_start(&chapters[1]), 10.0 + CHAPTER_START_MARGIN);
    }

    #[test]
    fn toggle_play_pause_starts_the_queue() {
        let orchestrator = orchestrator(vec![track("a.flac", 30.0), track("b.flac", 30.0)]);
        assert_eq!(orchestrator.toggle_play_pause(), PlaybackState::Playing);
        assert_eq!(
            orchestrator.playing_track().map(|t| t.path.clone()),
            Some(Path::new("a.flac").to_path_buf())
        );
        assert_eq!(orchestrator.toggle_play_pause(), PlaybackState::Paused);
        assert_eq!(orchestrator.toggle_play_pause(), PlaybackState::Playing);
    }

    #[test]
    fn percentage_seek_length_follows_track_duration() {
        let orchestrator = orchestrator(vec![track("a.flac", 200.0)]);
        let mut preferences = orchestrator.preferences();
        preferences.primary_seek_length = SeekLength::percentage(5.0);
        orchestrator.set_preferences(preferences);

        assert_eq!(
            orchestrator.primary_seek_length(UserInputMode::Discrete),
            FALLBACK_PRIMARY_SEEK
        );
        orchestrator.toggle_play_pause();
        assert_eq!(orchestrator.primary_seek_length(UserInputMode::Discrete), 10.0);
        assert_eq!(orchestrator.primary_seek_length(UserInputMode::Continuous), 5.0);
        assert_eq!(orchestrator.secondary_seek_length(), 30.0);
    }

    #[test]
    fn non_interrupting_request_is_ignored_while_playing() {
        let orchestrator = orchestrator(vec![track("a.flac", 30.0), track("b.flac", 30.0)]);
        orchestrator.toggle_play_pause();
        let outcome =
            orchestrator.play_track_at(1, PlaybackParams::default().with_interrupt_playback(false));
        assert_eq!(outcome, None);
        assert_eq!(
            orchestrator.playing_track().map(|t| t.path.clone()),
            Some(Path::new("a.flac").to_path_buf())
        );
    }

    #[test]
    fn stop_ends_the_sequence() {
        let orchestrator = orchestrator(vec![track("a.flac", 30.0)]);
        orchestrator.toggle_play_pause();
        assert_eq!(orchestrator.stop(), Some(ChainOutcome::Completed));
        assert_eq!(orchestrator.state(), PlaybackState::NoTrack);
        assert!(orchestrator.queue().current().is_none());
        assert_eq!(orchestrator.stop(), None);
    }

    #[test]
    fn app_exit_saves_profile_per_preference() {
        let orchestrator = orchestrator(vec![track("a.flac", 30.0)]);
        orchestrator.toggle_play_pause();
        orchestrator.on_app_exit();
        assert!(orchestrator.profiles().is_empty());

        let mut preferences = orchestrator.preferences();
        preferences.remember_last_position = RememberLastPosition::AllTracks;
        orchestrator.set_preferences(preferences);
        orchestrator.on_app_exit();
        assert!(orchestrator.profiles().has(Path::new("a.flac")));
    }
}
