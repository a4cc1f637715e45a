//! Frame-level voice activity detection.
//!
//! Real decoders report their own voice-activity flag. The detectors here
//! back the development decoder in [`crate::decoder::stub`], which has no
//! acoustic model of its own.

pub mod energy;

pub use energy::EnergyVad;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    Speech,
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// A stateful per-frame speech classifier.
pub trait VoiceActivityDetector: Send + 'static {
    /// Classify one frame of mono f32 samples in [-1.0, 1.0].
    fn classify(&mut self, samples: &[f32]) -> VadDecision;

    /// Forget any onset or hangover state.
    fn reset(&mut self);
}
