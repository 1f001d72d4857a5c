use crate::audio::TrackPreparer;
use crate::chain::context::{Awaiting, ChainSignal, PlaybackRequestContext};
use crate::chain::{ActionOutcome, PlaybackChainAction};
use crate::error::PlaybackError;
use crate::events::{EventBus, PlaybackEvent};
use crate::model::Track;
use crate::player::PlaybackControl;
use crate::queue::PlayQueue;
use crate::transcoder::Transcoder;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Waits out any gap, then makes sure the requested track has a playable file and a
/// playback context. Both the gap and a transcode suspend the chain.
pub struct AudioFilePreparation {
    player: Arc<dyn PlaybackControl>,
    preparer: Arc<dyn TrackPreparer>,
    transcoder: Arc<dyn Transcoder>,
    queue: Arc<dyn PlayQueue>,
    events: EventBus,
}

impl AudioFilePreparation {
    pub fn new(
        player: Arc<dyn PlaybackControl>,
        preparer: Arc<dyn TrackPreparer>,
        transcoder: Arc<dyn Transcoder>,
        queue: Arc<dyn PlayQueue>,
        events: EventBus,
    ) -> Self {
        Self {
            player,
            preparer,
            transcoder,
            queue,
            events,
        }
    }

    fn start_delay(&self, context: &mut PlaybackRequestContext, track: &Arc<Track>, delay: f64) {
        self.player.waiting();
        self.events.publish(PlaybackEvent::GapStarted {
            old_track: context.current_track.as_ref().map(|t| t.path.clone()),
            new_track: track.path.clone(),
            delay,
        });

        // Use the gap to get the file ready.
        if self.transcoder.needs_transcoding(track) {
            self.transcoder.transcode(track, context.generation);
        } else if let Err(err) = self.preparer.prepare(track) {
            debug!(%err, "early preparation failed");
        }

        let events = self.events.clone();
        let generation = context.generation;
        thread::spawn(move || {
            thread::sleep(Duration::from_secs_f64(delay));
            events.signal(ChainSignal::DelayElapsed { generation });
        });
        context.awaiting = Some(Awaiting::Delay);
    }

    fn prepare_now(&self, context: &mut PlaybackRequestContext, track: &Arc<Track>) -> ActionOutcome {
        if self.transcoder.needs_transcoding(track) {
            self.transcoder.transcode(track, context.generation);
            self.player.transcoding();
            context.awaiting = Some(Awaiting::Transcoding(track.path.clone()));
            return ActionOutcome::Suspend;
        }
        self.finish(track)
    }

    fn finish(&self, track: &Track) -> ActionOutcome {
        match self.preparer.prepare(track) {
            Ok(()) => ActionOutcome::Proceed,
            Err(err) => self.fail(err),
        }
    }

    fn fail(&self, err: PlaybackError) -> ActionOutcome {
        self.player.stop();
        self.queue.end();
        ActionOutcome::Terminate(Some(err))
    }
}

impl PlaybackChainAction for AudioFilePreparation {
    fn name(&self) -> &'static str {
        "audio_file_preparation"
    }

    fn execute(&self, context: &mut PlaybackRequestContext) -> ActionOutcome {
        let Some(track) = context.requested_track.clone() else {
            return ActionOutcome::Terminate(None);
        };
        if !context.delay_elapsed
            && let Some(delay) = context
                .delay()
                .filter(|delay| delay.is_finite() && *delay > 0.0)
        {
            self.start_delay(context, &track, delay);
            return ActionOutcome::Suspend;
        }
        self.prepare_now(context, &track)
    }

    fn resume(&self, context: &mut PlaybackRequestContext, signal: &ChainSignal) -> ActionOutcome {
        let Some(track) = context.requested_track.clone() else {
            return ActionOutcome::Terminate(None);
        };
        match (signal, &context.awaiting) {
            (ChainSignal::DelayElapsed { .. }, Some(Awaiting::Delay)) => {
                context.awaiting = None;
                context.delay_elapsed = true;
                self.prepare_now(context, &track)
            }
            (
                ChainSignal::TranscodingFinished {
                    track: finished,
                    result,
                    ..
                },
                Some(Awaiting::Transcoding(awaited)),
            ) if finished == awaited => {
                context.awaiting = None;
                match result {
                    Ok(_) => self.finish(&track),
                    Err(err) => self.fail(err.clone()),
                }
            }
            _ => {
                trace!(?signal, "signal not awaited");
                ActionOutcome::Suspend
            }
        }
    }
}

/// Gets the tracks most likely to be requested next ready in the background. Failures
/// only cost the head start.
pub struct PredictiveTrackPreparation {
    queue: Arc<dyn PlayQueue>,
    preparer: Arc<dyn TrackPreparer>,
    transcoder: Arc<dyn Transcoder>,
}

impl PredictiveTrackPreparation {
    pub fn new(
        queue: Arc<dyn PlayQueue>,
        preparer: Arc<dyn TrackPreparer>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            queue,
            preparer,
            transcoder,
        }
    }

    fn candidates(&self, requested: Option<&Arc<Track>>) -> Vec<Arc<Track>> {
        let mut candidates: Vec<Arc<Track>> = Vec::new();
        let peeked = [
            self.queue.peek_subsequent(),
            self.queue.peek_next(),
            self.queue.peek_previous(),
        ];
        for track in peeked.into_iter().flatten() {
            let is_requested = requested.is_some_and(|r| r.path == track.path);
            if !is_requested && !candidates.iter().any(|c| c.path == track.path) {
                candidates.push(track);
            }
        }
        candidates
    }
}

impl PlaybackChainAction for PredictiveTrackPreparation {
    fn name(&self) -> &'static str {
        "predictive_track_preparation"
    }

    fn execute(&self, context: &mut PlaybackRequestContext) -> ActionOutcome {
        let candidates = self.candidates(context.requested_track.as_ref());
        if candidates.is_empty() {
            return ActionOutcome::Proceed;
        }
        let preparer = Arc::clone(&self.preparer);
        let transcoder = Arc::clone(&self.transcoder);
        thread::spawn(move || {
            for track in candidates {
                if track.is_prepared() || transcoder.needs_transcoding(&track) {
                    continue;
                }
                match preparer.prepare(&track) {
                    Ok(()) => trace!(track = %track.path.display(), "prepared ahead of time"),
                    Err(err) => trace!(%err, "predictive preparation skipped"),
                }
            }
        });
        ActionOutcome::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::actions::testing::{FakePreparer, FakeTranscoder, RecordingPlayer, track};
    use crate::chain::context::{ContextRegistry, PlaybackParams};
    use crate::events::Message;
    use crate::lock;
    use crate::model::{PlaybackGap, PlaybackState};
    use crate::queue::TrackQueue;
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;

    struct Fixture {
        action: AudioFilePreparation,
        player: Arc<RecordingPlayer>,
        transcoder: Arc<FakeTranscoder>,
        receiver: std::sync::mpsc::Receiver<Message>,
    }

    fn fixture() -> Fixture {
        let (events, receiver) = EventBus::channel();
        let player = Arc::new(RecordingPlayer::default());
        let transcoder = Arc::new(FakeTranscoder::default());
        let action = AudioFilePreparation::new(
            player.clone(),
            Arc::new(FakePreparer::default()),
            transcoder.clone(),
            Arc::new(TrackQueue::new(Vec::new())),
            events,
        );
        Fixture {
            action,
            player,
            transcoder,
            receiver,
        }
    }

    fn request(track: Arc<Track>) -> PlaybackRequestContext {
        ContextRegistry::new().begin(
            PlaybackState::NoTrack,
            None,
            0.0,
            Some(track),
            PlaybackParams::default(),
        )
    }

    #[test]
    fn ready_track_is_prepared_in_place() {
        let fixture = fixture();
        let track = track("a.flac", 3.0);
        let mut context = request(track.clone());
        assert_eq!(fixture.action.execute(&mut context), ActionOutcome::Proceed);
        assert!(track.is_prepared());
    }

    #[test]
    fn delay_suspends_until_elapsed_signal() {
        let fixture = fixture();
        let mut context = request(track("a.flac", 3.0));
        context.add_gap(PlaybackGap::before(0.01));

        assert_eq!(fixture.action.execute(&mut context), ActionOutcome::Suspend);
        assert_eq!(fixture.player.state(), PlaybackState::Waiting);
        assert_eq!(context.awaiting, Some(Awaiting::Delay));

        let mut signal = None;
        for message in fixture.receiver.iter() {
            if let Message::Signal(s) = message {
                signal = Some(s);
                break;
            }
        }
        let signal = signal.expect("delay signal");
        assert_eq!(signal.generation(), context.generation);
        assert_eq!(
            fixture.action.resume(&mut context, &signal),
            ActionOutcome::Proceed
        );
        assert!(context.delay_elapsed);
    }

    #[test]
    fn unusable_gap_length_plays_without_waiting() {
        for length in [f64::NAN, f64::INFINITY] {
            let fixture = fixture();
            let track = track("a.flac", 3.0);
            let mut context = request(track.clone());
            context.add_gap(PlaybackGap::before(length));

            assert_eq!(fixture.action.execute(&mut context), ActionOutcome::Proceed);
            assert_eq!(context.awaiting, None);
            assert!(track.is_prepared());
        }
    }

    #[test]
    fn transcoding_suspends_and_resumes_on_its_track() {
        let fixture = fixture();
        let track = track("song.m4a", 3.0);
        let mut context = request(track.clone());
        assert_eq!(fixture.action.execute(&mut context), ActionOutcome::Suspend);
        assert_eq!(fixture.player.state(), PlaybackState::Transcoding);
        assert_eq!(
            *lock(&fixture.transcoder.started),
            [(PathBuf::from("song.m4a"), context.generation)]
        );

        let other = ChainSignal::TranscodingFinished {
            track: PathBuf::from("other.m4a"),
            generation: context.generation,
            result: Ok(PathBuf::from("other.wav")),
        };
        assert_eq!(fixture.action.resume(&mut context, &other), ActionOutcome::Suspend);

        track.set_transcoded_file(PathBuf::from("song.wav"));
        let done = ChainSignal::TranscodingFinished {
            track: PathBuf::from("song.m4a"),
            generation: context.generation,
            result: Ok(PathBuf::from("song.wav")),
        };
        assert_eq!(fixture.action.resume(&mut context, &done), ActionOutcome::Proceed);
        assert_eq!(
            track.playback_context().map(|c| c.file),
            Some(PathBuf::from("song.wav"))
        );
    }

    #[test]
    fn failed_transcode_terminates_with_error() {
        let fixture = fixture();
        let mut context = request(track("song.m4a", 3.0));
        fixture.action.execute(&mut context);
        let failed = ChainSignal::TranscodingFinished {
            track: PathBuf::from("song.m4a"),
            generation: context.generation,
            result: Err(PlaybackError::TranscodingFailed {
                track: PathBuf::from("song.m4a"),
                reason: String::from("bad stream"),
            }),
        };
        assert!(matches!(
            fixture.action.resume(&mut context, &failed),
            ActionOutcome::Terminate(Some(PlaybackError::TranscodingFailed { .. }))
        ));
        assert_eq!(fixture.player.state(), PlaybackState::NoTrack);
    }

    #[test]
    fn predictive_preparation_skips_requested_and_duplicates() {
        let a = track("a.flac", 3.0);
        let b = track("b.flac", 3.0);
        let c = track("c.flac", 3.0);
        let queue = Arc::new(TrackQueue::new(vec![a.clone(), b.clone(), c.clone()]));
        queue.select(1);
        let preparer = Arc::new(FakePreparer::default());
        let action = PredictiveTrackPreparation::new(
            queue,
            preparer.clone(),
            Arc::new(FakeTranscoder::default()),
        );

        let candidates = action.candidates(Some(&b));
        let paths: Vec<_> = candidates.iter().map(|t| t.path.clone()).collect();
        assert_eq!(paths, [PathBuf::from("c.flac"), PathBuf::from("a.flac")]);

        action.execute(&mut request(b.clone()));
        for _ in 0..200 {
            if preparer.prepared.load(Ordering::SeqCst) == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(a.is_prepared());
        assert!(c.is_prepared());
        assert!(!b.is_prepared());
    }
}
