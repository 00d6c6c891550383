//! WAV-file transport: plays a recording into a session as if it were a live
//! caller and captures the assistant's audio into another WAV file.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use palaver_core::audio::frames_from_samples;
use palaver_core::audio::resample::RateConverter;
use palaver_core::AudioFrame;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const FRAME_MS: u32 = 20;
const RESAMPLE_CHUNK: usize = 1024;

/// Decode `path` to mono f32 at `target_rate`.
pub fn read_wav(path: &Path, target_rate: u32) -> Result<Vec<f32>> {
    let mut reader =
        WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .context("decoding float samples")?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .context("decoding integer samples")?
        }
    };
    let mono = downmix(&interleaved, spec.channels);
    info!(
        path = %path.display(),
        rate = spec.sample_rate,
        channels = spec.channels,
        seconds = mono.len() as f32 / spec.sample_rate.max(1) as f32,
        "input recording loaded"
    );

    let mut converter = RateConverter::new(spec.sample_rate, target_rate, RESAMPLE_CHUNK)?;
    if converter.is_passthrough() {
        return Ok(mono);
    }
    let out = converter.convert_all(&mono)?;
    debug!(from = spec.sample_rate, to = target_rate, samples = out.len(), "input resampled");
    Ok(out)
}

fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Feed `samples` into a session as 20 ms frames, followed by `tail` of
/// silence so the final utterance seals. Returns once every frame is sent;
/// dropping `frames_in` afterwards signals end of input.
///
/// With `realtime` set, frames are released at the rate a live caller would
/// produce them.
pub async fn send_recording(
    samples: &[f32],
    sample_rate: u32,
    tail: Duration,
    realtime: bool,
    frames_in: &mpsc::Sender<AudioFrame>,
) -> Result<usize> {
    let mut frames = frames_from_samples(samples, sample_rate, FRAME_MS, Duration::ZERO);
    let start = frames.last().map(AudioFrame::end).unwrap_or_default();
    let silence = vec![0.0; (sample_rate as u64 * tail.as_millis() as u64 / 1000) as usize];
    frames.extend(frames_from_samples(&silence, sample_rate, FRAME_MS, start));

    let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_MS as u64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let total = frames.len();
    for frame in frames {
        if realtime {
            ticker.tick().await;
        }
        if frames_in.send(frame).await.is_err() {
            warn!("session stopped accepting input");
            break;
        }
    }
    debug!(frames = total, "recording sent");
    Ok(total)
}

/// Drain reply frames until the session closes its output. Frames are
/// downmixed to mono; frames at a different rate than the first are dropped.
pub async fn collect_replies(mut frames_out: mpsc::Receiver<AudioFrame>) -> (u32, Vec<f32>) {
    let mut rate = None;
    let mut samples = Vec::new();
    while let Some(frame) = frames_out.recv().await {
        let frame_rate = *rate.get_or_insert(frame.sample_rate);
        if frame.sample_rate != frame_rate {
            warn!(expected = frame_rate, got = frame.sample_rate, "reply frame at unexpected rate");
            continue;
        }
        samples.extend(downmix(&frame.samples, frame.channels));
    }
    (rate.unwrap_or(16_000), samples)
}

/// Write mono f32 samples as 16-bit PCM.
pub fn write_wav(path: &Path, sample_rate: u32, samples: &[f32]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer =
        WavWriter::create(path, spec).with_context(|| format!("creating {}", path.display()))?;
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    info!(path = %path.display(), seconds = samples.len() as f32 / sample_rate as f32, "reply audio written");
    Ok(())
}
