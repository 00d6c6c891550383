//! Bringing transport audio to the session sample rate.
//!
//! Transports deliver audio at whatever rate the far end produces (44.1 kHz
//! WAV files, 48 kHz WebRTC tracks). The turn buffer rejects frames that are
//! not at the session rate, so transports push their audio through a
//! `RateConverter` first. Equal rates make it a passthrough with no rubato
//! state at all.
//!
//! A whole recording converts in one call:
//!
//! ```ignore
//! let mut rc = RateConverter::new(44_100, 16_000, 1024)?;
//! let session_audio = rc.convert_all(&recording)?;
//! ```
//!
//! Streaming transports call `process` per packet and `flush` once the far
//! end hangs up. Output length tracks the input duration: the zero padding
//! `flush` feeds rubato is trimmed off again.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{PalaverError, Result};

/// Fixed-ratio mono converter from a transport's rate to the session rate.
pub struct RateConverter {
    resampler: Option<FastFixedIn<f32>>,
    ratio: f64,
    /// Input samples waiting for a full rubato chunk.
    pending: Vec<f32>,
    chunk_size: usize,
    /// rubato output scratch, `[1][output_frames_max]`.
    scratch: Vec<Vec<f32>>,
    /// Real (unpadded) input samples seen so far.
    samples_in: usize,
    samples_out: usize,
}

impl RateConverter {
    /// `chunk_size` is the input block rubato converts per call. Larger
    /// blocks are cheaper but hold more audio back until `flush`.
    ///
    /// # Errors
    /// Returns `PalaverError::Resample` for a zero rate or chunk size, or if
    /// rubato rejects the ratio.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 || chunk_size == 0 {
            return Err(PalaverError::Resample(format!(
                "invalid conversion {source_rate} Hz -> {target_rate} Hz in chunks of {chunk_size}"
            )));
        }
        let ratio = target_rate as f64 / source_rate as f64;
        let mut converter = Self {
            resampler: None,
            ratio,
            pending: Vec::new(),
            chunk_size,
            scratch: Vec::new(),
            samples_in: 0,
            samples_out: 0,
        };
        if source_rate == target_rate {
            return Ok(converter);
        }

        let resampler =
            FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
                .map_err(|e| PalaverError::Resample(format!("resampler init: {e}")))?;
        converter.scratch = vec![vec![0f32; resampler.output_frames_max()]; 1];
        tracing::debug!(source_rate, target_rate, chunk_size, "transport audio resampled");
        converter.resampler = Some(resampler);
        Ok(converter)
    }

    /// Convert the next stretch of a stream. Output may be empty while less
    /// than one chunk is pending.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.samples_in += samples.len();
        self.push(samples)
    }

    /// Convert whatever is still pending at end of stream.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        if self.resampler.is_none() || self.pending.is_empty() {
            self.pending.clear();
            return Ok(Vec::new());
        }
        let padding = vec![0f32; self.chunk_size - self.pending.len()];
        let mut out = self.push(&padding)?;

        let expected = (self.samples_in as f64 * self.ratio).round() as usize;
        let overshoot = self.samples_out.saturating_sub(expected);
        out.truncate(out.len().saturating_sub(overshoot));
        self.samples_out -= overshoot.min(self.samples_out);
        Ok(out)
    }

    /// Convert a complete recording, tail included.
    pub fn convert_all(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let mut out = self.process(samples)?;
        out.extend(self.flush()?);
        Ok(out)
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    fn push(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            self.samples_out += samples.len();
            return Ok(samples.to_vec());
        };
        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        let mut offset = 0;
        while self.pending.len() - offset >= self.chunk_size {
            let block = &self.pending[offset..offset + self.chunk_size];
            let (_, produced) = resampler
                .process_into_buffer(&[block], &mut self.scratch, None)
                .map_err(|e| PalaverError::Resample(format!("resampling block: {e}")))?;
            out.extend_from_slice(&self.scratch[0][..produced]);
            offset += self.chunk_size;
        }
        self.pending.drain(..offset);
        self.samples_out += out.len();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_rates_pass_audio_through() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples).unwrap(), samples);
        assert!(rc.flush().unwrap().is_empty());
    }

    #[test]
    fn webrtc_rate_block_lands_near_a_third() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let out = rc.process(&vec![0.0f32; 960]).unwrap();
        assert!(
            out.len().abs_diff(320) <= 10,
            "output len={} expected about 320",
            out.len()
        );
    }

    #[test]
    fn partial_chunk_is_held_until_flush() {
        let mut rc = RateConverter::new(44_100, 16_000, 960).unwrap();
        assert!(rc.process(&vec![0.0f32; 500]).unwrap().is_empty());
        assert!(!rc.flush().unwrap().is_empty());
        assert!(rc.flush().unwrap().is_empty(), "second flush has nothing left");
    }

    #[test]
    fn recording_keeps_its_duration() {
        // 1.3 s of a 44.1 kHz file, not a multiple of the chunk size.
        let recording = vec![0.1f32; 57_330];
        let mut rc = RateConverter::new(44_100, 16_000, 1024).unwrap();
        let out = rc.convert_all(&recording).unwrap();
        assert!(
            out.len() <= 20_800,
            "flush padding leaked into the output: {} samples",
            out.len()
        );
        assert!(out.len() >= 20_800 - 1024, "output too short: {}", out.len());
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(matches!(
            RateConverter::new(0, 16_000, 960),
            Err(PalaverError::Resample(_))
        ));
    }
}
