//! Audio input capability.
//!
//! The listening loop only ever sees [`AudioSource`]: a blocking reader of
//! fixed-size mono 16-bit little-endian PCM frames. [`AudioBackend`] is the
//! device handle that opens sources and is released on shutdown.
//!
//! Shipped backends:
//! - [`capture::CpalBackend`] — system microphone (feature `audio-cpal`)
//! - [`wav::WavBackend`] — a WAV file replayed as a stream

#[cfg(feature = "audio-cpal")]
pub mod capture;
pub mod resample;
pub mod wav;

use crate::error::Result;

/// Sample rate the decoder expects (Hz).
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per frame handed to the decoder.
pub const FRAME_SAMPLES: usize = 1024;

/// Bytes per 16-bit sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Shape of the PCM stream requested from a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub frame_samples: usize,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, frame_samples: usize) -> Self {
        Self {
            sample_rate,
            frame_samples,
        }
    }

    /// Size in bytes of one mono 16-bit frame.
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples * BYTES_PER_SAMPLE
    }

    /// Wall-clock duration of one frame.
    pub fn frame_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.frame_samples as f64 / self.sample_rate as f64)
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self::new(SAMPLE_RATE, FRAME_SAMPLES)
    }
}

/// A blocking PCM frame reader.
pub trait AudioSource: Send + 'static {
    /// Begin (or resume) delivering frames.
    fn start(&mut self) -> Result<()>;

    /// Block until `frames` samples are available and return them as
    /// 16-bit LE bytes.
    ///
    /// Returns `Ok(None)` once the stream is exhausted, stopped or closed.
    fn read(&mut self, frames: usize) -> Result<Option<Vec<u8>>>;

    /// Pause delivery. The source may be started again.
    fn stop(&mut self) -> Result<()>;

    /// Release the stream for good. Idempotent.
    fn close(&mut self);
}

/// Audio device handle that opens [`AudioSource`]s.
pub trait AudioBackend: Send + 'static {
    fn open(&mut self, format: StreamFormat) -> Result<Box<dyn AudioSource>>;

    /// Release the device. Idempotent.
    fn terminate(&mut self);
}

/// Decode 16-bit LE PCM into f32 samples in [-1.0, 1.0).
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Encode f32 samples as 16-bit LE PCM, clamping out-of-range values.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}
