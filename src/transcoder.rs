use crate::chain::context::{ChainSignal, Generation};
use crate::error::PlaybackError;
use crate::events::EventBus;
use crate::lock;
use crate::model::Track;
use rodio::{Decoder, Source};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Converts tracks the output path cannot decode into a file it can.
pub trait Transcoder: Send + Sync {
    fn needs_transcoding(&self, track: &Track) -> bool;
    fn is_transcoded(&self, track: &Track) -> bool {
        track.transcoded_file().is_some_and(|file| file.exists())
    }
    fn is_transcoding(&self, track: &Track) -> bool;
    /// Starts converting `track` in the background and reports the outcome as a
    /// [`ChainSignal::TranscodingFinished`] tagged with `generation`. A second call for a
    /// track already in progress only retags the pending report.
    fn transcode(&self, track: &Arc<Track>, generation: Generation);
    fn cancel(&self, track: &Track);
}

struct Job {
    cancelled: AtomicBool,
    generation: AtomicU64,
}

/// Decodes with `rodio` and writes 16-bit PCM WAV files into a cache directory.
pub struct WavTranscoder {
    cache_dir: PathBuf,
    extensions: Vec<String>,
    events: EventBus,
    jobs: Arc<Mutex<HashMap<PathBuf, Arc<Job>>>>,
}

impl WavTranscoder {
    pub fn new(cache_dir: impl Into<PathBuf>, extensions: Vec<String>, events: EventBus) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            extensions: extensions
                .into_iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
            events,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Transcoder for WavTranscoder {
    fn needs_transcoding(&self, track: &Track) -> bool {
        !self.is_transcoded(track)
            && track
                .extension()
                .is_some_and(|ext| self.extensions.contains(&ext))
    }

    fn is_transcoding(&self, track: &Track) -> bool {
        lock(&self.jobs).contains_key(&track.path)
    }

    fn transcode(&self, track: &Arc<Track>, generation: Generation) {
        let mut jobs = lock(&self.jobs);
        if let Some(job) = jobs.get(&track.path) {
            job.generation.store(generation, Ordering::Release);
            return;
        }
        let job = Arc::new(Job {
            cancelled: AtomicBool::new(false),
            generation: AtomicU64::new(generation),
        });
        jobs.insert(track.path.clone(), Arc::clone(&job));
        drop(jobs);

        info!(track = %track.path.display(), "transcoding started");
        let track = Arc::clone(track);
        let output = self.cache_dir.join(format!("{}.wav", Uuid::new_v4()));
        let jobs = Arc::clone(&self.jobs);
        let events = self.events.clone();
        thread::spawn(move || {
            let result = match transcode_to_wav(&track.path, &output, &job.cancelled) {
                Ok(()) => {
                    info!(track = %track.path.display(), "transcoding finished");
                    track.set_transcoded_file(output.clone());
                    Ok(output)
                }
                Err(err) => {
                    let _ = fs::remove_file(&output);
                    warn!(track = %track.path.display(), %err, "transcoding did not complete");
                    Err(err)
                }
            };
            // The file is installed first so the track never looks untouched in between.
            lock(&jobs).remove(&track.path);
            events.signal(ChainSignal::TranscodingFinished {
                track: track.path.clone(),
                generation: job.generation.load(Ordering::Acquire),
                result,
            });
        });
    }

    fn cancel(&self, track: &Track) {
        if let Some(job) = lock(&self.jobs).get(&track.path) {
            debug!(track = %track.path.display(), "cancelling transcode");
            job.cancelled.store(true, Ordering::Release);
        }
    }
}

const CANCEL_CHECK_INTERVAL: usize = 4_096;

fn transcode_to_wav(
    input: &Path,
    output: &Path,
    cancelled: &AtomicBool,
) -> Result<(), PlaybackError> {
    let failed = |reason: String| PlaybackError::TranscodingFailed {
        track: input.to_path_buf(),
        reason,
    };

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|err| failed(err.to_string()))?;
    }
    let file = File::open(input).map_err(|err| failed(err.to_string()))?;
    let source =
        Decoder::try_from(file).map_err(|err| failed(format!("failed to decode: {err}")))?;
    let channels = u16::from(source.channels()).max(1);
    let sample_rate = u32::from(source.sample_rate());

    let mut writer =
        BufWriter::new(File::create(output).map_err(|err| failed(err.to_string()))?);
    write_wav_header(&mut writer, channels, sample_rate, 0)
        .map_err(|err| failed(err.to_string()))?;

    let mut data_size: u32 = 0;
    for (index, sample) in source.enumerate() {
        if index % CANCEL_CHECK_INTERVAL == 0 && cancelled.load(Ordering::Acquire) {
            return Err(PlaybackError::TranscodingCancelled(input.to_path_buf()));
        }
        let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        writer
            .write_all(&value.to_le_bytes())
            .map_err(|err| failed(err.to_string()))?;
        data_size = data_size.saturating_add(2);
    }

    let mut file = writer
        .into_inner()
        .map_err(|err| failed(err.to_string()))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|err| failed(err.to_string()))?;
    write_wav_header(&mut file, channels, sample_rate, data_size)
        .map_err(|err| failed(err.to_string()))?;
    Ok(())
}

fn write_wav_header(
    out: &mut impl Write,
    channels: u16,
    sample_rate: u32,
    data_size: u32,
) -> std::io::Result<()> {
    let bits_per_sample: u16 = 16;
    let block_align = channels * (bits_per_sample / 8);
    let byte_rate = sample_rate * u32::from(block_align);

    out.write_all(b"RIFF")?;
    out.write_all(&36_u32.saturating_add(data_size).to_le_bytes())?;
    out.write_all(b"WAVE")?;
    out.write_all(b"fmt ")?;
    out.write_all(&16_u32.to_le_bytes())?;
    out.write_all(&1_u16.to_le_bytes())?;
    out.write_all(&channels.to_le_bytes())?;
    out.write_all(&sample_rate.to_le_bytes())?;
    out.write_all(&byte_rate.to_le_bytes())?;
    out.write_all(&block_align.to_le_bytes())?;
    out.write_all(&bits_per_sample.to_le_bytes())?;
    out.write_all(b"data")?;
    out.write_all(&data_size.to_le_bytes())
}
