//! Microphone capture via cpal.
//!
//! # Threading
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS), but an [`AudioSource`] must be `Send` so it can move into a
//! background listening thread. [`CpalSource::start`] therefore spawns a
//! dedicated capture thread that opens the device, keeps the stream alive,
//! and drops it on that same thread when stopped. A sync oneshot channel
//! propagates open-device errors back to the `start()` caller.
//!
//! The input callback runs on an OS audio thread. It mixes down to mono and
//! writes into an SPSC ring buffer producer whose `push_slice` is lock-free
//! and allocation-free once the mix buffer has grown.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};
use tracing::{debug, error, info, warn};

use super::{resample::FrameConverter, AudioBackend, AudioSource, StreamFormat};
use crate::{
    buffering::{create_audio_ring, AudioConsumer, AudioProducer, Consumer, Producer},
    error::{ListenerError, Result},
};

/// Sleep when the ring is empty (avoids busy-wait burning a core).
const EMPTY_POLL_MS: u64 = 5;
/// How often the capture thread wakes to check its stop flag.
const CAPTURE_PARK_MS: u64 = 50;

/// Opens the system microphone, optionally by device name.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    preferred_device: Option<String>,
}

impl CpalBackend {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }
}

impl AudioBackend for CpalBackend {
    fn open(&mut self, format: StreamFormat) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(CpalSource::new(
            format,
            self.preferred_device.clone(),
        )))
    }

    fn terminate(&mut self) {
        debug!("cpal backend released");
    }
}

struct CaptureThread {
    capturing: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    consumer: AudioConsumer,
    converter: FrameConverter,
}

/// A microphone stream delivering fixed-size PCM16 frames.
pub struct CpalSource {
    format: StreamFormat,
    preferred_device: Option<String>,
    capture: Option<CaptureThread>,
    scratch: Vec<f32>,
    closed: bool,
}

impl CpalSource {
    pub fn new(format: StreamFormat, preferred_device: Option<String>) -> Self {
        Self {
            format,
            preferred_device,
            capture: None,
            scratch: vec![0f32; format.frame_samples.max(1) * 4],
            closed: false,
        }
    }

    fn join_capture(&mut self) {
        if let Some(capture) = self.capture.take() {
            stop_capture_thread(&capture.capturing, capture.handle);
        }
    }
}

/// Clear the capture flag, wake the parked capture thread and join it.
fn stop_capture_thread(capturing: &AtomicBool, handle: JoinHandle<()>) {
    capturing.store(false, Ordering::SeqCst);
    handle.thread().unpark();
    if handle.join().is_err() {
        error!("capture thread panicked");
    }
}

impl AudioSource for CpalSource {
    fn start(&mut self) -> Result<()> {
        if self.closed {
            return Err(ListenerError::AudioStream("stream is closed".into()));
        }
        if self.capture.is_some() {
            return Ok(());
        }

        let (producer, consumer) = create_audio_ring();
        let capturing = Arc::new(AtomicBool::new(true));
        let (open_tx, open_rx) = mpsc::channel::<Result<u32>>();

        let flag = Arc::clone(&capturing);
        let preferred = self.preferred_device.clone();
        let handle = thread::Builder::new()
            .name("hark-capture".into())
            .spawn(move || {
                // The stream must be created and dropped on this thread.
                let stream = match open_input(producer, Arc::clone(&flag), preferred.as_deref())
                {
                    Ok((stream, rate)) => {
                        let _ = open_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        flag.store(false, Ordering::SeqCst);
                        return;
                    }
                };
                while flag.load(Ordering::SeqCst) {
                    thread::park_timeout(Duration::from_millis(CAPTURE_PARK_MS));
                }
                drop(stream);
                debug!("capture stream dropped");
            })?;

        let device_rate = match open_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(ListenerError::AudioStream(
                    "capture thread died before opening the device".into(),
                ));
            }
        };

        let converter = match FrameConverter::new(device_rate, self.format.sample_rate) {
            Ok(converter) => converter,
            Err(e) => {
                stop_capture_thread(&capturing, handle);
                return Err(e);
            }
        };
        self.capture = Some(CaptureThread {
            capturing,
            handle,
            consumer,
            converter,
        });
        info!(device_rate, "microphone stream started");
        Ok(())
    }

    fn read(&mut self, frames: usize) -> Result<Option<Vec<u8>>> {
        let Some(capture) = self.capture.as_mut() else {
            return Ok(None);
        };

        loop {
            if let Some(frame) = capture.converter.next_frame(frames) {
                return Ok(Some(frame));
            }
            let n = capture.consumer.pop_slice(&mut self.scratch);
            if n == 0 {
                if !capture.capturing.load(Ordering::Relaxed) {
                    return Ok(None);
                }
                thread::sleep(Duration::from_millis(EMPTY_POLL_MS));
                continue;
            }
            capture.converter.push(&self.scratch[..n]);
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.join_capture();
        Ok(())
    }

    fn close(&mut self) {
        self.join_capture();
        self.closed = true;
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.join_capture();
    }
}

/// Open an input device by preferred name, otherwise fall back to the
/// default input device and then the first available device.
fn open_input(
    producer: AudioProducer,
    capturing: Arc<AtomicBool>,
    preferred_device_name: Option<&str>,
) -> Result<(Stream, u32)> {
    let host = cpal::default_host();
    let mut selected_device = None;

    if let Some(preferred_name) = preferred_device_name {
        match host.input_devices() {
            Ok(mut devices) => {
                selected_device = devices.find(|device| {
                    device
                        .name()
                        .map(|name| name == preferred_name)
                        .unwrap_or(false)
                });
                if selected_device.is_none() {
                    warn!(
                        "preferred input device '{}' not found, falling back",
                        preferred_name
                    );
                }
            }
            Err(e) => warn!("failed to list input devices while resolving preference: {e}"),
        }
    }

    let device = match selected_device {
        Some(device) => device,
        None => match host.default_input_device() {
            Some(device) => device,
            None => host
                .input_devices()
                .map_err(|e| ListenerError::AudioDevice(e.to_string()))?
                .next()
                .ok_or_else(|| ListenerError::AudioDevice("no input device found".into()))?,
        },
    };

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening input device"
    );

    let supported = device
        .default_input_config()
        .map_err(|e| ListenerError::AudioDevice(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = usize::from(supported.channels().max(1));

    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_input::<f32>(&device, &config, channels, producer, capturing),
        SampleFormat::I16 => build_input::<i16>(&device, &config, channels, producer, capturing),
        SampleFormat::U8 => build_input::<u8>(&device, &config, channels, producer, capturing),
        fmt => Err(ListenerError::AudioStream(format!(
            "unsupported sample format: {fmt:?}"
        ))),
    }?;

    stream
        .play()
        .map_err(|e| ListenerError::AudioStream(e.to_string()))?;

    Ok((stream, sample_rate))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: usize,
    mut producer: AudioProducer,
    capturing: Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut mix_buf: Vec<f32> = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                if !capturing.load(Ordering::Relaxed) {
                    return;
                }
                let frames = data.len() / channels;
                mix_buf.resize(frames, 0.0);
                for (f, out) in mix_buf.iter_mut().enumerate() {
                    let base = f * channels;
                    let sum: f32 = data[base..base + channels]
                        .iter()
                        .map(|s| f32::from_sample(*s))
                        .sum();
                    *out = sum / channels as f32;
                }
                let written = producer.push_slice(&mix_buf);
                if written < mix_buf.len() {
                    warn!("ring buffer full: dropped {} frames", mix_buf.len() - written);
                }
            },
            |err| error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| ListenerError::AudioStream(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn stopping_wakes_and_joins_a_parked_capture_thread() {
        let capturing = Arc::new(AtomicBool::new(true));
        let exited = Arc::new(AtomicBool::new(false));
        let (flag, done) = (Arc::clone(&capturing), Arc::clone(&exited));
        let handle = thread::spawn(move || {
            while flag.load(Ordering::SeqCst) {
                thread::park_timeout(Duration::from_secs(60));
            }
            done.store(true, Ordering::SeqCst);
        });

        let started = Instant::now();
        stop_capture_thread(&capturing, handle);
        assert!(exited.load(Ordering::SeqCst));
        assert!(started.elapsed() < Duration::from_secs(30));
    }
}
