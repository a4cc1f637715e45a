//! RMS energy detector with onset debounce and release hangover.
//!
//! ```text
//!            loud × onset                 quiet × (hangover + 1)
//! Silence ─────────────────► Speech ─────────────────────────► Silence
//! ```
//!
//! A single loud frame (a click, a key press) does not open speech unless
//! `onset_frames == 1`. Once in speech, quiet frames are still reported as
//! speech until the hangover runs out, so word endings are not cut.

use super::{VadDecision, VoiceActivityDetector};

#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
    onset_frames: u32,
    hangover_frames: u32,
    loud_run: u32,
    hangover_left: u32,
    in_speech: bool,
    last_level: f32,
}

impl EnergyVad {
    /// Detector that enters speech on the first loud frame.
    ///
    /// With 1024-sample frames at 16 kHz each hangover frame is 64 ms.
    pub fn new(threshold: f32, hangover_frames: u32) -> Self {
        Self {
            threshold,
            onset_frames: 1,
            hangover_frames,
            loud_run: 0,
            hangover_left: 0,
            in_speech: false,
            last_level: 0.0,
        }
    }

    /// Require `frames` consecutive loud frames before entering speech.
    pub fn with_onset(mut self, frames: u32) -> Self {
        self.onset_frames = frames.max(1);
        self
    }

    /// RMS of the most recently classified frame.
    pub fn level(&self) -> f32 {
        self.last_level
    }

    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(0.02, 4)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, samples: &[f32]) -> VadDecision {
        self.last_level = Self::rms(samples);
        let loud = self.last_level >= self.threshold;

        if loud {
            self.loud_run = self.loud_run.saturating_add(1);
            if self.in_speech || self.loud_run >= self.onset_frames {
                self.in_speech = true;
                self.hangover_left = self.hangover_frames;
            }
        } else {
            self.loud_run = 0;
            if self.in_speech {
                if self.hangover_left == 0 {
                    self.in_speech = false;
                } else {
                    self.hangover_left -= 1;
                }
            }
        }

        if self.in_speech {
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }

    fn reset(&mut self) {
        self.loud_run = 0;
        self.hangover_left = 0;
        self.in_speech = false;
        self.last_level = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const QUIET: [f32; 256] = [0.0; 256];
    const LOUD: [f32; 256] = [0.3; 256];

    fn decisions(vad: &mut EnergyVad, frames: &[&[f32]]) -> Vec<bool> {
        frames.iter().map(|f| vad.classify(f).is_speech()).collect()
    }

    #[test]
    fn quiet_input_stays_silent() {
        let mut vad = EnergyVad::default();
        assert_eq!(decisions(&mut vad, &[&QUIET, &QUIET, &[]]), [false; 3]);
        assert_eq!(vad.level(), 0.0);
    }

    #[test]
    fn hangover_holds_speech_then_releases() {
        let mut vad = EnergyVad::new(0.02, 2);
        assert_eq!(
            decisions(&mut vad, &[&LOUD, &QUIET, &QUIET, &QUIET, &QUIET]),
            [true, true, true, false, false]
        );
    }

    #[test]
    fn onset_ignores_isolated_clicks() {
        let mut vad = EnergyVad::new(0.02, 0).with_onset(3);
        assert_eq!(
            decisions(&mut vad, &[&LOUD, &QUIET, &LOUD, &LOUD, &LOUD, &QUIET]),
            [false, false, false, false, true, false]
        );
    }

    #[test]
    fn loud_frame_during_hangover_refills_it() {
        let mut vad = EnergyVad::new(0.02, 1);
        assert_eq!(
            decisions(&mut vad, &[&LOUD, &QUIET, &LOUD, &QUIET, &QUIET]),
            [true, true, true, true, false]
        );
    }

    #[test]
    fn reset_returns_to_silence() {
        let mut vad = EnergyVad::new(0.02, 10);
        vad.classify(&LOUD);
        vad.reset();
        assert!(!vad.classify(&QUIET).is_speech());
    }

    #[test]
    fn level_tracks_frame_rms() {
        let mut vad = EnergyVad::default();
        let square: Vec<f32> = (0..512).map(|i| if i % 2 == 0 { 0.25 } else { -0.25 }).collect();
        vad.classify(&square);
        assert_relative_eq!(vad.level(), 0.25, epsilon = 1e-6);
    }
}
