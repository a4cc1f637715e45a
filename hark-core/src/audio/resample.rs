//! Sample-rate conversion and frame assembly.
//!
//! Capture devices and WAV files rarely deliver exactly 16 kHz in
//! decoder-sized blocks. [`FrameConverter`] takes f32 mono audio at any rate,
//! resamples it with a rubato `FastFixedIn` session, and hands out
//! fixed-size 16-bit PCM frames.
//!
//! When input rate == output rate no rubato session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use super::f32_to_pcm16;
use crate::error::{ListenerError, Result};

/// Input samples per rubato call.
const RESAMPLE_CHUNK: usize = 1024;

pub struct FrameConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    /// Input waiting for a full `RESAMPLE_CHUNK` block.
    input_buf: Vec<f32>,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    /// Output-rate samples not yet handed out as a frame.
    pending: Vec<f32>,
}

impl FrameConverter {
    /// # Errors
    /// `ListenerError::AudioStream` if rubato fails to initialise.
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        if input_rate == output_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                output_buf: Vec::new(),
                pending: Vec::new(),
            });
        }

        let ratio = output_rate as f64 / input_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0,
            PolynomialDegree::Cubic,
            RESAMPLE_CHUNK,
            1,
        )
        .map_err(|e| ListenerError::AudioStream(format!("resampler init: {e}")))?;

        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];
        tracing::info!(input_rate, output_rate, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            output_buf,
            pending: Vec::new(),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Append input-rate samples.
    pub fn push(&mut self, samples: &[f32]) {
        let Some(ref mut resampler) = self.resampler else {
            self.pending.extend_from_slice(samples);
            return;
        };

        self.input_buf.extend_from_slice(samples);
        while self.input_buf.len() >= RESAMPLE_CHUNK {
            let block = &self.input_buf[..RESAMPLE_CHUNK];
            match resampler.process_into_buffer(&[block], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    self.pending
                        .extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.input_buf.drain(..RESAMPLE_CHUNK);
        }
    }

    /// Take the next `frame_samples`-long frame as PCM16 bytes, if buffered.
    pub fn next_frame(&mut self, frame_samples: usize) -> Option<Vec<u8>> {
        if frame_samples == 0 || self.pending.len() < frame_samples {
            return None;
        }
        let bytes = f32_to_pcm16(&self.pending[..frame_samples]);
        self.pending.drain(..frame_samples);
        Some(bytes)
    }

    /// Output-rate samples buffered but not yet framed.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_frames_exactly() {
        let mut fc = FrameConverter::new(16_000, 16_000).unwrap();
        assert!(fc.is_passthrough());
        fc.push(&vec![0.25f32; 1500]);
        let frame = fc.next_frame(1024).expect("one full frame");
        assert_eq!(frame.len(), 2048);
        assert!(fc.next_frame(1024).is_none());
        assert_eq!(fc.buffered(), 476);
    }

    #[test]
    fn downsampling_48k_yields_a_third_of_the_samples() {
        let mut fc = FrameConverter::new(48_000, 16_000).unwrap();
        assert!(!fc.is_passthrough());
        fc.push(&vec![0.0f32; RESAMPLE_CHUNK * 6]);
        let expected = RESAMPLE_CHUNK * 2;
        let got = fc.buffered();
        assert!(
            (got as isize - expected as isize).unsigned_abs() <= 32,
            "buffered={got} expected≈{expected}"
        );
    }

    #[test]
    fn partial_block_is_held_back() {
        let mut fc = FrameConverter::new(48_000, 16_000).unwrap();
        fc.push(&vec![0.0f32; 500]);
        assert_eq!(fc.buffered(), 0);
        fc.push(&vec![0.0f32; 600]);
        assert!(fc.buffered() > 0);
    }
}
