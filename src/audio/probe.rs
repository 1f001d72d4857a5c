use crate::error::{PlaybackError, Result};
use crate::model::{Chapter, PlaybackContext, Track};
use std::ffi::OsStr;
use std::fs::File;
use std::path::Path;
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::{Cue, FormatOptions};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;
use symphonia::default::get_probe;
use tracing::debug;

/// Checks and prepares tracks before the scheduler touches them.
pub trait TrackPreparer: Send + Sync {
    fn validate(&self, track: &Track) -> Result<()>;
    /// Installs a playback context for the track's playable file.
    fn prepare(&self, track: &Track) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct SymphoniaPreparer;

impl TrackPreparer for SymphoniaPreparer {
    fn validate(&self, track: &Track) -> Result<()> {
        if !track.path.is_file() {
            return Err(PlaybackError::not_playable(&track.path, "file does not exist"));
        }
        probe_file(&track.path)
            .map(|_| ())
            .map_err(|reason| PlaybackError::not_playable(&track.path, reason))
    }

    fn prepare(&self, track: &Track) -> Result<()> {
        if track.is_prepared() {
            return Ok(());
        }
        let file = track.playable_path();
        let info =
            probe_file(&file).map_err(|reason| PlaybackError::not_playable(&track.path, reason))?;
        debug!(
            track = %track.path.display(),
            sample_rate = info.sample_rate,
            frames = info.frames,
            "track prepared"
        );
        track.set_playback_context(PlaybackContext::new(
            file,
            f64::from(info.sample_rate),
            info.frames,
        ));
        Ok(())
    }
}

/// Builds a prepared track for `path`, with chapters taken from the container's cues.
pub fn probe_track(path: &Path) -> anyhow::Result<Track> {
    let info = probe_file(path)
        .map_err(|reason| anyhow::anyhow!("failed to probe {}: {reason}", path.display()))?;
    let title = path
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("Unknown")
        .to_string();
    let context = PlaybackContext::new(path, f64::from(info.sample_rate), info.frames);
    let duration = context.duration();
    Ok(Track::new(path, title, duration)
        .with_chapters(info.chapters)
        .with_playback_context(context))
}

struct FileInfo {
    sample_rate: u32,
    frames: u64,
    chapters: Vec<Chapter>,
}

fn probe_file(path: &Path) -> std::result::Result<FileInfo, String> {
    let file = File::open(path).map_err(|err| format!("failed to open: {err}"))?;
    let source = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(OsStr::to_str) {
        hint.with_extension(extension);
    }

    let probed = get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| format!("unsupported format: {err}"))?;

    let Some(track) = probed.format.default_track() else {
        return Err(String::from("no audio track"));
    };
    let params = &track.codec_params;
    if params.codec == CODEC_TYPE_NULL {
        return Err(String::from("unknown codec"));
    }
    let Some(sample_rate) = params.sample_rate.filter(|rate| *rate > 0) else {
        return Err(String::from("unknown sample rate"));
    };
    let Some(frames) = params.n_frames.filter(|frames| *frames > 0) else {
        return Err(String::from("unknown length"));
    };

    let duration = frames as f64 / f64::from(sample_rate);
    let time_base = params
        .time_base
        .unwrap_or_else(|| TimeBase::new(1, sample_rate));
    let chapters = chapters_from_cues(probed.format.cues(), time_base, duration);

    Ok(FileInfo {
        sample_rate,
        frames,
        chapters,
    })
}

fn chapters_from_cues(cues: &[Cue], time_base: TimeBase, duration: f64) -> Vec<Chapter> {
    let starts: Vec<f64> = cues
        .iter()
        .map(|cue| {
            let time = time_base.calc_time(cue.start_ts);
            time.seconds as f64 + time.frac
        })
        .collect();

    cues.iter()
        .enumerate()
        .map(|(index, cue)| {
            let title = cue
                .tags
                .iter()
                .find(|tag| tag.std_key == Some(StandardTagKey::TrackTitle))
                .map(|tag| tag.value.to_string())
                .unwrap_or_else(|| format!("Chapter {}", index + 1));
            Chapter {
                title,
                start_time: starts[index],
                end_time: starts.get(index + 1).copied().unwrap_or(duration),
            }
        })
        .collect()
}
