//! WAV file replayed through the [`AudioSource`] interface.
//!
//! The file is decoded, mixed down to mono and resampled once at open time.
//! With pacing enabled each read sleeps for one frame duration so the
//! listening loop sees microphone-like timing.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use super::{resample::FrameConverter, AudioBackend, AudioSource, StreamFormat};
use crate::error::{ListenerError, Result};

/// Backend that opens a fresh [`WavSource`] over the same file each time.
#[derive(Debug, Clone)]
pub struct WavBackend {
    path: PathBuf,
    paced: bool,
}

impl WavBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            paced: false,
        }
    }

    /// Sleep one frame duration per read.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }
}

impl AudioBackend for WavBackend {
    fn open(&mut self, format: StreamFormat) -> Result<Box<dyn AudioSource>> {
        let source = WavSource::open(&self.path, format)?;
        let source = if self.paced {
            source.with_pacing(format.frame_duration())
        } else {
            source
        };
        Ok(Box::new(source))
    }

    fn terminate(&mut self) {}
}

pub struct WavSource {
    frames: VecDeque<Vec<u8>>,
    pace: Option<Duration>,
    started: bool,
    closed: bool,
}

impl WavSource {
    /// Decode `path` into frames of `format`.
    ///
    /// A trailing partial frame is dropped.
    pub fn open(path: &Path, format: StreamFormat) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)
            .map_err(|e| ListenerError::AudioStream(format!("{}: {e}", path.display())))?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>(),
            hound::SampleFormat::Int => {
                let scale = (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
            }
        }
        .map_err(|e| ListenerError::AudioStream(e.to_string()))?;

        let mono: Vec<f32> = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        Self::from_samples(&mono, spec.sample_rate, format)
    }

    /// Build a source from mono f32 samples at `sample_rate`.
    pub fn from_samples(samples: &[f32], sample_rate: u32, format: StreamFormat) -> Result<Self> {
        let mut converter = FrameConverter::new(sample_rate, format.sample_rate)?;
        converter.push(samples);

        let mut frames = VecDeque::new();
        while let Some(frame) = converter.next_frame(format.frame_samples) {
            frames.push_back(frame);
        }
        info!(
            frames = frames.len(),
            dropped_tail = converter.buffered(),
            "wav source ready"
        );

        Ok(Self {
            frames,
            pace: None,
            started: false,
            closed: false,
        })
    }

    fn with_pacing(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Frames not yet read.
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl AudioSource for WavSource {
    fn start(&mut self) -> Result<()> {
        if self.closed {
            return Err(ListenerError::AudioStream("stream is closed".into()));
        }
        self.started = true;
        Ok(())
    }

    fn read(&mut self, frames: usize) -> Result<Option<Vec<u8>>> {
        if !self.started || self.closed {
            return Ok(None);
        }
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }
        match self.frames.pop_front() {
            Some(frame) if frame.len() == frames * super::BYTES_PER_SAMPLE => Ok(Some(frame)),
            Some(frame) => Err(ListenerError::FrameSize {
                expected: frames * super::BYTES_PER_SAMPLE,
                actual: frame.len(),
            }),
            None => {
                debug!("wav source exhausted");
                Ok(None)
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.started = false;
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn reads_full_frames_then_reports_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two_frames.wav");
        write_wav(&path, &vec![1000i16; 1024 * 2 + 100], 16_000);

        let mut source = WavSource::open(&path, StreamFormat::default()).unwrap();
        assert_eq!(source.remaining(), 2);
        assert!(source.read(1024).unwrap().is_none(), "not started yet");

        source.start().unwrap();
        let frame = source.read(1024).unwrap().expect("first frame");
        assert_eq!(frame.len(), 2048);
        assert_eq!(i16::from_le_bytes([frame[0], frame[1]]), 1000);
        assert!(source.read(1024).unwrap().is_some());
        assert!(source.read(1024).unwrap().is_none());
    }

    #[test]
    fn closed_source_cannot_restart() {
        let mut source =
            WavSource::from_samples(&[0.0; 2048], 16_000, StreamFormat::default()).unwrap();
        source.start().unwrap();
        source.close();
        assert!(source.read(1024).unwrap().is_none());
        assert!(source.start().is_err());
    }

    #[test]
    fn mismatched_read_size_is_a_frame_error() {
        let mut source =
            WavSource::from_samples(&[0.0; 1024], 16_000, StreamFormat::default()).unwrap();
        source.start().unwrap();
        assert!(matches!(
            source.read(512),
            Err(ListenerError::FrameSize { expected: 1024, actual: 2048 })
        ));
    }
}
