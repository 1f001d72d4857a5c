use crate::error::{PlaybackError, Result};
use crate::session::PlaybackSession;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shortest slice a node is ever asked to play.
pub const MIN_FRAMES: u64 = 2;

static NEXT_SEGMENT_ID: AtomicU64 = AtomicU64::new(1);

/// A bounded, frame-accurate slice of one session's audio file.
#[derive(Debug, Clone)]
pub struct PlaybackSegment {
    pub id: u64,
    pub session: PlaybackSession,
    pub file: PathBuf,
    pub sample_rate: f64,
    pub start_time: f64,
    pub end_time: f64,
    pub first_frame: u64,
    pub last_frame: u64,
    pub frame_count: u64,
}

impl PlaybackSegment {
    /// Computes the frame range covering `start_time..end_time`, or to the end of the
    /// file when `end_time` is `None`. `start_frame` overrides the frame derived from
    /// `start_time` when the caller needs sample-exact continuation.
    pub fn compute(
        session: &PlaybackSession,
        start_time: f64,
        end_time: Option<f64>,
        start_frame: Option<u64>,
    ) -> Result<Self> {
        let track = &session.track;
        let context = track
            .playback_context()
            .ok_or_else(|| PlaybackError::NoPlaybackContext(track.path.clone()))?;
        if context.sample_rate <= 0.0 || context.frames == 0 {
            return Err(PlaybackError::not_playable(
                &track.path,
                "audio file contains no frames",
            ));
        }

        let file_last_frame = context.last_frame();
        let last_frame = end_time
            .map(|end| context.frame_at(end))
            .unwrap_or(file_last_frame)
            .max(MIN_FRAMES - 1)
            .min(file_last_frame);
        let mut first_frame = start_frame.unwrap_or_else(|| context.frame_at(start_time));

        if first_frame > last_frame || last_frame - first_frame + 1 < MIN_FRAMES {
            first_frame = last_frame.saturating_sub(MIN_FRAMES - 1);
        }

        Ok(Self {
            id: NEXT_SEGMENT_ID.fetch_add(1, Ordering::Relaxed),
            session: session.clone(),
            file: context.file.clone(),
            sample_rate: context.sample_rate,
            start_time,
            end_time: end_time.unwrap_or_else(|| context.duration()),
            first_frame,
            last_frame,
            frame_count: last_frame - first_frame + 1,
        })
    }

    pub fn first_frame_time(&self) -> f64 {
        self.first_frame as f64 / self.sample_rate
    }

    pub fn duration(&self) -> f64 {
        self.frame_count as f64 / self.sample_rate
    }
}
