mod probe;

pub use probe::{SymphoniaPreparer, TrackPreparer, probe_track};

use crate::error::{PlaybackError, Result};
use crate::lock;
use crate::segment::PlaybackSegment;
use rodio::mixer::Mixer;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source};
#[cfg(unix)]
use std::ffi::CString;
use std::collections::VecDeque;
use std::fs::File;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

pub type CompletionHandler = Box<dyn FnOnce() + Send + 'static>;

/// The device-facing end of the scheduler: plays segments back to back and calls each
/// segment's handler once it has been fully rendered.
pub trait PlayerNode: Send + Sync {
    /// Queues `segment` behind whatever is already scheduled. With `immediate`, anything
    /// pending is discarded first.
    fn schedule_segment(
        &self,
        segment: &PlaybackSegment,
        immediate: bool,
        on_complete: Option<CompletionHandler>,
    ) -> Result<()>;
    fn play(&self);
    fn pause(&self);
    /// Halts output and drops every pending segment without running its handler.
    fn stop(&self);
    fn is_playing(&self) -> bool;
    /// Position in the file, in seconds, of the audio being rendered.
    fn seek_position(&self) -> Option<f64>;
    fn reliable_completion_callbacks(&self) -> bool {
        true
    }
}

struct Scheduled {
    token: u64,
    start_time: f64,
    duration: f64,
    on_complete: Option<CompletionHandler>,
}

#[derive(Default)]
struct RodioState {
    entries: VecDeque<Scheduled>,
    next_token: u64,
    playing: bool,
    last_position: Option<f64>,
}

pub struct RodioPlayerNode {
    mixer: Mixer,
    sink: Mutex<Sink>,
    state: Arc<Mutex<RodioState>>,
    finished: Sender<u64>,
}

impl RodioPlayerNode {
    /// Builds a node on `mixer`. The stream that owns the mixer must outlive the node.
    pub fn new(mixer: Mixer) -> Self {
        let sink = Sink::connect_new(&mixer);
        sink.pause();
        let state = Arc::new(Mutex::new(RodioState::default()));
        let (finished, receiver) = mpsc::channel();
        spawn_completion_worker(Arc::downgrade(&state), receiver);
        Self {
            mixer,
            sink: Mutex::new(sink),
            state,
            finished,
        }
    }

    fn open_segment(segment: &PlaybackSegment) -> Result<Box<dyn Source + Send>> {
        let file = File::open(&segment.file)?;
        let mut decoder = Decoder::try_from(file).map_err(|err| {
            PlaybackError::not_playable(&segment.file, format!("failed to decode: {err}"))
        })?;
        let offset = Duration::from_secs_f64(segment.first_frame_time().max(0.0));
        let length = Duration::from_secs_f64(segment.duration().max(0.0));
        if offset.is_zero() || decoder.try_seek(offset).is_ok() {
            return Ok(Box::new(decoder.take_duration(length)));
        }
        Ok(Box::new(decoder.skip_duration(offset).take_duration(length)))
    }
}

impl PlayerNode for RodioPlayerNode {
    fn schedule_segment(
        &self,
        segment: &PlaybackSegment,
        immediate: bool,
        on_complete: Option<CompletionHandler>,
    ) -> Result<()> {
        if immediate {
            self.stop();
        }
        let source = Self::open_segment(segment)?;

        let mut state = lock(&self.state);
        state.next_token += 1;
        let token = state.next_token;
        state.entries.push_back(Scheduled {
            token,
            start_time: segment.first_frame_time(),
            duration: segment.duration(),
            on_complete,
        });
        drop(state);

        lock(&self.sink).append(NotifyingSource {
            inner: source,
            token,
            finished: Some(self.finished.clone()),
        });
        trace!(segment = segment.id, token, "segment queued on sink");
        Ok(())
    }

    fn play(&self) {
        lock(&self.state).playing = true;
        lock(&self.sink).play();
    }

    fn pause(&self) {
        lock(&self.state).playing = false;
        lock(&self.sink).pause();
    }

    fn stop(&self) {
        let mut sink = lock(&self.sink);
        sink.stop();
        *sink = Sink::connect_new(&self.mixer);
        sink.pause();
        drop(sink);

        let mut state = lock(&self.state);
        state.entries.clear();
        state.playing = false;
        state.last_position = None;
    }

    fn is_playing(&self) -> bool {
        lock(&self.state).playing
    }

    fn seek_position(&self) -> Option<f64> {
        let state = lock(&self.state);
        let Some(front) = state.entries.front() else {
            return state.last_position;
        };
        let elapsed = lock(&self.sink).get_pos().as_secs_f64().min(front.duration);
        Some(front.start_time + elapsed)
    }
}

// Runs segment handlers in order on one thread, away from the audio callback and the
// caller's thread. Exits once the node is dropped.
fn spawn_completion_worker(state: Weak<Mutex<RodioState>>, finished: Receiver<u64>) {
    thread::spawn(move || {
        while let Ok(token) = finished.recv() {
            let Some(state) = state.upgrade() else {
                break;
            };
            let handler = {
                let mut state = lock(&state);
                let Some(index) = state.entries.iter().position(|e| e.token == token) else {
                    trace!(token, "completion for discarded segment ignored");
                    continue;
                };
                let mut done = None;
                for _ in 0..=index {
                    done = state.entries.pop_front();
                }
                done.and_then(|entry| {
                    state.last_position = Some(entry.start_time + entry.duration);
                    entry.on_complete
                })
            };
            if let Some(handler) = handler {
                handler();
            }
        }
    });
}

/// Reports `token` on `finished` once the wrapped source runs dry.
struct NotifyingSource<S> {
    inner: S,
    token: u64,
    finished: Option<Sender<u64>>,
}

impl<S: Source> Iterator for NotifyingSource<S> {
    type Item = rodio::Sample;

    fn next(&mut self) -> Option<Self::Item> {
        let sample = self.inner.next();
        if sample.is_none()
            && let Some(finished) = self.finished.take()
        {
            let _ = finished.send(self.token);
        }
        sample
    }
}

impl<S: Source> Source for NotifyingSource<S> {
    fn current_span_len(&self) -> Option<usize> {
        self.inner.current_span_len()
    }

    fn channels(&self) -> rodio::ChannelCount {
        self.inner.channels()
    }

    fn sample_rate(&self) -> rodio::SampleRate {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }
}

/// Opens the default output device. Keep the returned stream alive for as long as any
/// node built from its mixer.
pub fn open_default_output() -> anyhow::Result<OutputStream> {
    use anyhow::Context;

    let mut stream = with_silenced_stderr(|| {
        OutputStreamBuilder::from_default_device()
            .context("failed to open default system output stream")?
            .with_error_callback(|err| warn!(%err, "audio output error"))
            .open_stream_or_fallback()
            .context("failed to start default output stream")
    })?;
    stream.log_on_drop(false);
    debug!("default audio output opened");
    Ok(stream)
}

#[cfg(unix)]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
    if saved < 0 {
        return operation();
    }

    let devnull = CString::new("/dev/null")
        .ok()
        .map(|path| unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) })
        .unwrap_or(-1);

    if devnull >= 0 {
        unsafe {
            libc::dup2(devnull, libc::STDERR_FILENO);
            libc::close(devnull);
        }
    }

    let result = operation();

    unsafe {
        libc::dup2(saved, libc::STDERR_FILENO);
        libc::close(saved);
    }

    result
}

#[cfg(not(unix))]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    operation()
}

const NULL_TICK: Duration = Duration::from_millis(5);

#[derive(Default)]
struct NullState {
    entries: VecDeque<Scheduled>,
    next_token: u64,
    playing: bool,
    resumed_at: Option<Instant>,
    offset: Duration,
    last_position: Option<f64>,
}

impl NullState {
    fn elapsed(&self) -> Duration {
        let mut elapsed = self.offset;
        if self.playing
            && let Some(resumed_at) = self.resumed_at
        {
            elapsed = elapsed.saturating_add(resumed_at.elapsed());
        }
        elapsed
    }

    // Pops every segment the clock has run past and hands back their handlers.
    fn drain_finished(&mut self) -> Vec<CompletionHandler> {
        let mut handlers = Vec::new();
        loop {
            let elapsed = self.elapsed().as_secs_f64();
            let Some(front) = self.entries.front() else {
                break;
            };
            if elapsed < front.duration {
                break;
            }
            let carry = Duration::from_secs_f64(elapsed - front.duration);
            let Some(done) = self.entries.pop_front() else {
                break;
            };
            self.offset = carry;
            self.resumed_at = self.playing.then(Instant::now);
            self.last_position = Some(done.start_time + done.duration);
            if let Some(handler) = done.on_complete {
                handlers.push(handler);
            }
        }
        handlers
    }
}

/// Clock-driven node for machines without an output device. Segments "play" in real
/// time and complete from the node's own ticker thread.
pub struct NullPlayerNode {
    state: Arc<Mutex<NullState>>,
}

impl NullPlayerNode {
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(NullState::default()));
        let weak = Arc::downgrade(&state);
        thread::spawn(move || {
            loop {
                thread::sleep(NULL_TICK);
                let Some(state) = weak.upgrade() else {
                    break;
                };
                let handlers = lock(&state).drain_finished();
                drop(state);
                for handler in handlers {
                    handler();
                }
            }
        });
        Self { state }
    }
}

impl Default for NullPlayerNode {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerNode for NullPlayerNode {
    fn schedule_segment(
        &self,
        segment: &PlaybackSegment,
        immediate: bool,
        on_complete: Option<CompletionHandler>,
    ) -> Result<()> {
        if immediate {
            self.stop();
        }
        let mut state = lock(&self.state);
        if state.entries.is_empty() {
            state.offset = Duration::ZERO;
            state.resumed_at = state.playing.then(Instant::now);
        }
        state.next_token += 1;
        let token = state.next_token;
        state.entries.push_back(Scheduled {
            token,
            start_time: segment.first_frame_time(),
            duration: segment.duration(),
            on_complete,
        });
        Ok(())
    }

    fn play(&self) {
        let mut state = lock(&self.state);
        if !state.playing {
            state.playing = true;
            state.resumed_at = Some(Instant::now());
        }
    }

    fn pause(&self) {
        let mut state = lock(&self.state);
        state.offset = state.elapsed();
        state.resumed_at = None;
        state.playing = false;
    }

    fn stop(&self) {
        let mut state = lock(&self.state);
        state.entries.clear();
        state.playing = false;
        state.resumed_at = None;
        state.offset = Duration::ZERO;
        state.last_position = None;
    }

    fn is_playing(&self) -> bool {
        lock(&self.state).playing
    }

    fn seek_position(&self) -> Option<f64> {
        let state = lock(&self.state);
        let Some(front) = state.entries.front() else {
            return state.last_position;
        };
        let elapsed = state.elapsed().as_secs_f64().min(front.duration);
        Some(front.start_time + elapsed)
    }
}
