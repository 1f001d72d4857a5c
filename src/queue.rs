use crate::lock;
use crate::model::{GapPosition, PlaybackGap, Track};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ShuffleMode {
    #[default]
    Off,
    On,
}

/// The sequencer the playback chains consult for what plays next.
pub trait PlayQueue: Send + Sync {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn current(&self) -> Option<Arc<Track>>;
    /// Begins a new sequence at the first track (first in shuffle order when shuffling).
    fn start(&self) -> Option<Arc<Track>>;
    fn select(&self, index: usize) -> Option<Arc<Track>>;
    fn select_track(&self, track: &Track) -> Option<Arc<Track>>;
    /// Advances the way the end of a track does: repeat-one stays on the same track.
    fn subsequent(&self) -> Option<Arc<Track>>;
    /// Advances the way a user skip does: repeat-one is ignored.
    fn next(&self) -> Option<Arc<Track>>;
    fn previous(&self) -> Option<Arc<Track>>;
    fn peek_subsequent(&self) -> Option<Arc<Track>>;
    fn peek_next(&self) -> Option<Arc<Track>>;
    fn peek_previous(&self) -> Option<Arc<Track>>;
    fn end(&self);
    fn repeat_mode(&self) -> RepeatMode;
    fn shuffle_mode(&self) -> ShuffleMode;
    fn set_repeat_mode(&self, mode: RepeatMode);
    fn set_shuffle_mode(&self, mode: ShuffleMode);
    fn gap_before(&self, track: &Track) -> Option<PlaybackGap>;
    fn gap_after(&self, track: &Track) -> Option<PlaybackGap>;
    fn set_gap(&self, track: &Track, gap: PlaybackGap);
    fn remove_gap(&self, track: &Track, position: GapPosition) -> Option<PlaybackGap>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Subsequent,
    Next,
    Previous,
}

#[derive(Debug)]
struct QueueState {
    tracks: Vec<Arc<Track>>,
    current: Option<usize>,
    repeat: RepeatMode,
    shuffle: ShuffleMode,
    shuffle_order: Vec<usize>,
    shuffle_cursor: usize,
    shuffle_rng: SmallRng,
    gaps: HashMap<(PathBuf, GapPosition), PlaybackGap>,
}

impl QueueState {
    fn rebuild_shuffle_order(&mut self) {
        self.shuffle_order = (0..self.tracks.len()).collect();
        self.shuffle_order.shuffle(&mut self.shuffle_rng);
        self.shuffle_cursor = 0;
    }

    // Moves `index` to the front of a fresh order so the rest of the pass follows it.
    fn reshuffle_from(&mut self, index: usize) {
        self.rebuild_shuffle_order();
        if let Some(pos) = self.shuffle_order.iter().position(|idx| *idx == index) {
            self.shuffle_order.swap(0, pos);
        }
    }

    fn first_index(&mut self) -> Option<usize> {
        if self.tracks.is_empty() {
            return None;
        }
        if self.shuffle == ShuffleMode::On {
            self.rebuild_shuffle_order();
            return self.shuffle_order.first().copied();
        }
        Some(0)
    }

    /// Index and shuffle cursor `step` leads to, without moving.
    fn target(&self, step: Step) -> Option<(usize, usize)> {
        let current = self.current?;
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }
        if step == Step::Subsequent && self.repeat == RepeatMode::One {
            return Some((current, self.shuffle_cursor));
        }
        let wraps = self.repeat != RepeatMode::Off;

        if self.shuffle == ShuffleMode::On && self.shuffle_order.len() == len {
            let cursor = self
                .shuffle_order
                .iter()
                .position(|idx| *idx == current)
                .unwrap_or(self.shuffle_cursor);
            let cursor = match step {
                Step::Previous if cursor == 0 => wraps.then(|| len - 1)?,
                Step::Previous => cursor - 1,
                _ if cursor + 1 == len => wraps.then_some(0)?,
                _ => cursor + 1,
            };
            return self.shuffle_order.get(cursor).map(|idx| (*idx, cursor));
        }

        let index = match step {
            Step::Previous if current == 0 => wraps.then(|| len - 1)?,
            Step::Previous => current - 1,
            _ if current + 1 >= len => wraps.then_some(0)?,
            _ => current + 1,
        };
        Some((index, self.shuffle_cursor))
    }

    fn step(&mut self, step: Step) -> Option<Arc<Track>> {
        let target = self.target(step);
        let Some((index, cursor)) = target else {
            self.current = None;
            return None;
        };
        self.current = Some(index);
        self.shuffle_cursor = cursor;
        self.tracks.get(index).cloned()
    }

    fn peek(&self, step: Step) -> Option<Arc<Track>> {
        let (index, _) = self.target(step)?;
        self.tracks.get(index).cloned()
    }
}

/// In-memory play queue over a fixed list of tracks.
#[derive(Debug)]
pub struct TrackQueue {
    inner: Mutex<QueueState>,
}

impl TrackQueue {
    pub fn new(tracks: Vec<Arc<Track>>) -> Self {
        let mut state = QueueState {
            tracks,
            current: None,
            repeat: RepeatMode::Off,
            shuffle: ShuffleMode::Off,
            shuffle_order: Vec::new(),
            shuffle_cursor: 0,
            shuffle_rng: SmallRng::from_os_rng(),
            gaps: HashMap::new(),
        };
        state.rebuild_shuffle_order();
        Self {
            inner: Mutex::new(state),
        }
    }

    pub fn tracks(&self) -> Vec<Arc<Track>> {
        lock(&self.inner).tracks.clone()
    }

    pub fn current_index(&self) -> Option<usize> {
        lock(&self.inner).current
    }
}

impl PlayQueue for TrackQueue {
    fn len(&self) -> usize {
        lock(&self.inner).tracks.len()
    }

    fn current(&self) -> Option<Arc<Track>> {
        let state = lock(&self.inner);
        state.current.and_then(|idx| state.tracks.get(idx).cloned())
    }

    fn start(&self) -> Option<Arc<Track>> {
        let mut state = lock(&self.inner);
        let index = state.first_index()?;
        state.current = Some(index);
        state.tracks.get(index).cloned()
    }

    fn select(&self, index: usize) -> Option<Arc<Track>> {
        let mut state = lock(&self.inner);
        let track = state.tracks.get(index).cloned()?;
        if state.shuffle == ShuffleMode::On {
            state.reshuffle_from(index);
        }
        state.current = Some(index);
        Some(track)
    }

    fn select_track(&self, track: &Track) -> Option<Arc<Track>> {
        let index = lock(&self.inner)
            .tracks
            .iter()
            .position(|candidate| candidate.path == track.path)?;
        self.select(index)
    }

    fn subsequent(&self) -> Option<Arc<Track>> {
        lock(&self.inner).step(Step::Subsequent)
    }

    fn next(&self) -> Option<Arc<Track>> {
        let mut state = lock(&self.inner);
        // A user skip past the end keeps the current track instead of ending the sequence.
        state.target(Step::Next)?;
        state.step(Step::Next)
    }

    fn previous(&self) -> Option<Arc<Track>> {
        let mut state = lock(&self.inner);
        state.target(Step::Previous)?;
        state.step(Step::Previous)
    }

    fn peek_subsequent(&self) -> Option<Arc<Track>> {
        lock(&self.inner).peek(Step::Subsequent)
    }

    fn peek_next(&self) -> Option<Arc<Track>> {
        lock(&self.inner).peek(Step::Next)
    }

    fn peek_previous(&self) -> Option<Arc<Track>> {
        lock(&self.inner).peek(Step::Previous)
    }

    fn end(&self) {
        lock(&self.inner).current = None;
    }

    fn repeat_mode(&self) -> RepeatMode {
        lock(&self.inner).repeat
    }

    fn shuffle_mode(&self) -> ShuffleMode {
        lock(&self.inner).shuffle
    }

    fn set_repeat_mode(&self, mode: RepeatMode) {
        lock(&self.inner).repeat = mode;
    }

    fn set_shuffle_mode(&self, mode: ShuffleMode) {
        let mut state = lock(&self.inner);
        state.shuffle = mode;
        if mode == ShuffleMode::On {
            match state.current {
                Some(index) => state.reshuffle_from(index),
                None => state.rebuild_shuffle_order(),
            }
        }
    }

    fn gap_before(&self, track: &Track) -> Option<PlaybackGap> {
        lock(&self.inner)
            .gaps
            .get(&(track.path.clone(), GapPosition::BeforeTrack))
            .copied()
    }

    fn gap_after(&self, track: &Track) -> Option<PlaybackGap> {
        lock(&self.inner)
            .gaps
            .get(&(track.path.clone(), GapPosition::AfterTrack))
            .copied()
    }

    fn set_gap(&self, track: &Track, gap: PlaybackGap) {
        lock(&self.inner)
            .gaps
            .insert((track.path.clone(), gap.position), gap);
    }

    fn remove_gap(&self, track: &Track, position: GapPosition) -> Option<PlaybackGap> {
        lock(&self.inner)
            .gaps
            .remove(&(track.path.clone(), position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prop_assert;
    use std::collections::HashSet;

    fn queue(len: usize) -> TrackQueue {
        TrackQueue::new(
            (0..len)
                .map(|n| Arc::new(Track::new(format!("song_{n}.mp3"), format!("song_{n}"), 60.0)))
                .collect(),
        )
    }

    #[test]
    fn repeat_all_wraps() {
        let queue = queue(2);
        queue.set_repeat_mode(RepeatMode::All);
        queue.select(1);

        let next = queue.subsequent().expect("next");
        assert_eq!(next.path, PathBuf::from("song_0.mp3"));
    }

    #[test]
    fn repeat_off_ends_sequence_after_last_track() {
        let queue = queue(2);
        queue.select(1);
        assert!(queue.peek_subsequent().is_none());
        assert!(queue.subsequent().is_none());
        assert!(queue.current().is_none());
    }

    #[test]
    fn repeat_one_repeats_only_for_subsequent() {
        let queue = queue(3);
        queue.set_repeat_mode(RepeatMode::One);
        queue.select(1);
        assert_eq!(queue.peek_subsequent().expect("same").path, PathBuf::from("song_1.mp3"));
        assert_eq!(queue.next().expect("next").path, PathBuf::from("song_2.mp3"));
    }

    #[test]
    fn next_at_end_keeps_current_track() {
        let queue = queue(2);
        queue.select(1);
        assert!(queue.next().is_none());
        assert_eq!(queue.current_index(), Some(1));
    }

    #[test]
    fn shuffle_visits_each_track_before_repeat() {
        let queue = queue(4);
        queue.set_shuffle_mode(ShuffleMode::On);
        let mut seen = HashSet::new();
        seen.insert(queue.start().expect("start").path.clone());
        for _ in 0..3 {
            let track = queue.subsequent().expect("next");
            seen.insert(track.path.clone());
        }

        assert_eq!(seen.len(), 4);
        assert!(queue.subsequent().is_none());
    }

    #[test]
    fn gaps_are_stored_per_track_and_position() {
        let queue = queue(2);
        let track = queue.select(0).expect("track");
        queue.set_gap(&track, PlaybackGap::before(3.0));
        queue.set_gap(&track, PlaybackGap::after(5.0));

        assert_eq!(queue.gap_before(&track).map(|g| g.duration), Some(3.0));
        assert_eq!(
            queue.remove_gap(&track, GapPosition::AfterTrack).map(|g| g.duration),
            Some(5.0)
        );
        assert!(queue.gap_after(&track).is_none());
    }

    proptest::proptest! {
        #[test]
        fn steps_stay_in_bounds(
            len in 1usize..30,
            start in 0usize..30,
            ops in proptest::collection::vec(0u8..8, 1..100),
        ) {
            let queue = queue(len);
            queue.select(start.min(len - 1));

            for op in ops {
                match op {
                    0 => { let _ = queue.subsequent(); }
                    1 => { let _ = queue.next(); }
                    2 => { let _ = queue.previous(); }
                    3 => queue.set_repeat_mode(RepeatMode::All),
                    4 => queue.set_repeat_mode(RepeatMode::One),
                    5 => queue.set_shuffle_mode(ShuffleMode::On),
                    6 => queue.set_shuffle_mode(ShuffleMode::Off),
                    _ => { let _ = queue.start(); }
                }
                if let Some(index) = queue.current_index() {
                    prop_assert!(index < len);
                }
                if let Some(peeked) = queue.peek_subsequent() {
                    prop_assert!(queue.tracks().iter().any(|t| t.path == peeked.path));
                }
            }
        }
    }
}
