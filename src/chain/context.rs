use crate::error::PlaybackError;
use crate::lock;
use crate::model::{GapKind, GapPosition, PlaybackGap, PlaybackState, Track};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub type Generation = u64;

/// Parameters of a playback request as issued by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackParams {
    pub start_position: Option<f64>,
    pub end_position: Option<f64>,
    pub delay: Option<f64>,
    pub allow_delay: bool,
    pub interrupt_playback: bool,
}

impl Default for PlaybackParams {
    fn default() -> Self {
        Self {
            start_position: None,
            end_position: None,
            delay: None,
            allow_delay: true,
            interrupt_playback: true,
        }
    }
}

impl PlaybackParams {
    pub fn with_start_position(mut self, position: f64) -> Self {
        self.start_position = Some(position);
        self
    }

    pub fn with_end_position(mut self, position: f64) -> Self {
        self.end_position = Some(position);
        self
    }

    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_allow_delay(mut self, allow: bool) -> Self {
        self.allow_delay = allow;
        self
    }

    pub fn with_interrupt_playback(mut self, interrupt: bool) -> Self {
        self.interrupt_playback = interrupt;
        self
    }
}

/// Asynchronous input a suspended chain may be waiting for.
#[derive(Debug, Clone)]
pub enum ChainSignal {
    DelayElapsed {
        generation: Generation,
    },
    TranscodingFinished {
        track: PathBuf,
        generation: Generation,
        result: Result<PathBuf, PlaybackError>,
    },
}

impl ChainSignal {
    pub fn generation(&self) -> Generation {
        match self {
            Self::DelayElapsed { generation } | Self::TranscodingFinished { generation, .. } => {
                *generation
            }
        }
    }
}

/// What a suspended action is waiting for.
#[derive(Debug, Clone, PartialEq)]
pub enum Awaiting {
    Delay,
    Transcoding(PathBuf),
}

/// State threaded through one chain run for one playback request.
#[derive(Debug, Clone)]
pub struct PlaybackRequestContext {
    pub generation: Generation,
    pub current_state: PlaybackState,
    pub current_track: Option<Arc<Track>>,
    pub current_seek_position: f64,
    pub requested_track: Option<Arc<Track>>,
    pub params: PlaybackParams,
    pub gaps: Vec<PlaybackGap>,
    pub awaiting: Option<Awaiting>,
    /// Set once the delay for this request has run out, so resumed actions skip it.
    pub delay_elapsed: bool,
}

impl PlaybackRequestContext {
    pub fn add_gap(&mut self, gap: PlaybackGap) {
        self.gaps.push(gap);
    }

    pub fn remove_all_gaps(&mut self) {
        self.gaps.clear();
    }

    pub fn remove_gaps_of_kind(&mut self, kind: GapKind) {
        self.gaps.retain(|gap| gap.kind != kind);
    }

    pub fn has_gap(&self, position: GapPosition) -> bool {
        self.gaps.iter().any(|gap| gap.position == position)
    }

    /// Total silence before the requested track, in seconds.
    pub fn delay(&self) -> Option<f64> {
        if self.gaps.is_empty() {
            return None;
        }
        Some(self.gaps.iter().map(|gap| gap.duration).sum())
    }

    pub fn requested_track_is(&self, path: &std::path::Path) -> bool {
        self.requested_track
            .as_ref()
            .is_some_and(|track| track.path == path)
    }

    /// True when the requested track differs from the one playing before the request.
    pub fn track_changed(&self) -> bool {
        match (&self.current_track, &self.requested_track) {
            (Some(current), Some(requested)) => current.path != requested.path,
            (None, None) => false,
            _ => true,
        }
    }
}

/// Hands out request generations and remembers which one is live.
#[derive(Debug, Clone, Default)]
pub struct ContextRegistry {
    next: Arc<AtomicU64>,
    current: Arc<Mutex<Option<Generation>>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(
        &self,
        current_state: PlaybackState,
        current_track: Option<Arc<Track>>,
        current_seek_position: f64,
        requested_track: Option<Arc<Track>>,
        params: PlaybackParams,
    ) -> PlaybackRequestContext {
        let generation = self.next.fetch_add(1, Ordering::AcqRel) + 1;
        *lock(&self.current) = Some(generation);
        PlaybackRequestContext {
            generation,
            current_state,
            current_track,
            current_seek_position,
            requested_track,
            params,
            gaps: Vec::new(),
            awaiting: None,
            delay_elapsed: false,
        }
    }

    pub fn is_current(&self, context: &PlaybackRequestContext) -> bool {
        self.is_current_generation(context.generation)
    }

    pub fn is_current_generation(&self, generation: Generation) -> bool {
        *lock(&self.current) == Some(generation)
    }

    /// Retires `context` if it is still the live one.
    pub fn close(&self, context: &PlaybackRequestContext) {
        let mut current = lock(&self.current);
        if *current == Some(context.generation) {
            *current = None;
        }
    }

    pub fn has_current(&self) -> bool {
        lock(&self.current).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn begin(registry: &ContextRegistry) -> PlaybackRequestContext {
        registry.begin(
            PlaybackState::NoTrack,
            None,
            0.0,
            Some(Arc::new(Track::new("a", "a", 10.0))),
            PlaybackParams::default(),
        )
    }

    #[test]
    fn later_request_supersedes_earlier() {
        let registry = ContextRegistry::new();
        let first = begin(&registry);
        let second = begin(&registry);
        assert!(!registry.is_current(&first));
        assert!(registry.is_current(&second));
        assert!(second.generation > first.generation);
    }

    #[test]
    fn closing_a_stale_context_keeps_the_live_one() {
        let registry = ContextRegistry::new();
        let first = begin(&registry);
        let second = begin(&registry);
        registry.close(&first);
        assert!(registry.is_current(&second));
        registry.close(&second);
        assert!(!registry.has_current());
    }

    #[test]
    fn delay_sums_all_gaps() {
        let registry = ContextRegistry::new();
        let mut context = begin(&registry);
        assert_eq!(context.delay(), None);
        context.add_gap(PlaybackGap::before(2.0));
        context.add_gap(PlaybackGap::after(3.5));
        assert_eq!(context.delay(), Some(5.5));
        context.remove_gaps_of_kind(GapKind::Persistent);
        assert_eq!(context.delay(), None);
    }
}
