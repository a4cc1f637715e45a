//! `StubDecoder` — development backend without an acoustic model.
//!
//! Voice activity comes from an [`EnergyVad`]. When an utterance that
//! contained speech is closed, the hypothesis is the next word of the
//! configured dictionary (cycling), or `"[stub: <N> frames]"` when the
//! dictionary cannot be read. The full listening pipeline can therefore be
//! exercised end to end with deterministic output.

use tracing::debug;

use super::{Decoder, DecoderConfig, DecoderFactory};
use crate::audio::pcm16_to_f32;
use crate::error::Result;
use crate::grammar::read_dictionary;
use crate::vad::{EnergyVad, VoiceActivityDetector};

/// Builds [`StubDecoder`]s with a shared VAD tuning.
#[derive(Debug, Clone)]
pub struct StubDecoderFactory {
    vad_threshold: f32,
    hangover_frames: u32,
}

impl StubDecoderFactory {
    pub fn new(vad_threshold: f32, hangover_frames: u32) -> Self {
        Self {
            vad_threshold,
            hangover_frames,
        }
    }
}

impl Default for StubDecoderFactory {
    fn default() -> Self {
        Self::new(0.02, 4)
    }
}

impl DecoderFactory for StubDecoderFactory {
    fn configure(&self, config: &DecoderConfig) -> Result<Box<dyn Decoder>> {
        let vocabulary = match read_dictionary(config.dictionary()) {
            Ok(pairs) => pairs.into_iter().map(|(word, _)| word).collect(),
            Err(e) => {
                debug!("stub decoder has no vocabulary ({e})");
                Vec::new()
            }
        };
        Ok(Box::new(StubDecoder::new(
            EnergyVad::new(self.vad_threshold, self.hangover_frames),
            vocabulary,
        )))
    }
}

pub struct StubDecoder {
    vad: EnergyVad,
    vocabulary: Vec<String>,
    speech_frames: usize,
    utterance_count: usize,
    hypothesis: Option<String>,
}

impl StubDecoder {
    pub fn new(vad: EnergyVad, vocabulary: Vec<String>) -> Self {
        Self {
            vad,
            vocabulary,
            speech_frames: 0,
            utterance_count: 0,
            hypothesis: None,
        }
    }
}

impl Decoder for StubDecoder {
    fn begin_utterance(&mut self) -> Result<()> {
        self.speech_frames = 0;
        Ok(())
    }

    fn process_raw(&mut self, frame: &[u8]) -> Result<bool> {
        let speech = self.vad.classify(&pcm16_to_f32(frame)).is_speech();
        if speech {
            self.speech_frames += 1;
        }
        Ok(speech)
    }

    fn end_utterance(&mut self) -> Result<()> {
        self.hypothesis = if self.speech_frames == 0 {
            None
        } else if self.vocabulary.is_empty() {
            Some(format!("[stub: {} frames]", self.speech_frames))
        } else {
            let word = &self.vocabulary[self.utterance_count % self.vocabulary.len()];
            Some(word.clone())
        };
        if self.hypothesis.is_some() {
            self.utterance_count += 1;
        }
        self.speech_frames = 0;
        Ok(())
    }

    fn hypothesis(&self) -> Option<String> {
        self.hypothesis.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::f32_to_pcm16;
    use crate::grammar::{compile, english_digits};

    fn frame(amplitude: f32) -> Vec<u8> {
        f32_to_pcm16(&[amplitude; 1024])
    }

    #[test]
    fn silence_only_utterance_has_no_hypothesis() {
        let mut decoder = StubDecoder::new(EnergyVad::new(0.02, 0), Vec::new());
        decoder.begin_utterance().unwrap();
        assert!(!decoder.process_raw(&frame(0.0)).unwrap());
        decoder.end_utterance().unwrap();
        assert_eq!(decoder.hypothesis(), None);
    }

    #[test]
    fn speech_without_vocabulary_reports_frame_count() {
        let mut decoder = StubDecoder::new(EnergyVad::new(0.02, 0), Vec::new());
        decoder.begin_utterance().unwrap();
        assert!(decoder.process_raw(&frame(0.4)).unwrap());
        assert!(decoder.process_raw(&frame(0.4)).unwrap());
        decoder.end_utterance().unwrap();
        assert_eq!(decoder.hypothesis().as_deref(), Some("[stub: 2 frames]"));
    }

    #[test]
    fn factory_cycles_through_dictionary_words() {
        let grammar = compile(&english_digits()).unwrap();
        let config = DecoderConfig::new("hmm", "lm", grammar.path(), "en-us").unwrap();
        let mut decoder = StubDecoderFactory::new(0.02, 0).configure(&config).unwrap();

        let mut heard = Vec::new();
        for _ in 0..2 {
            decoder.begin_utterance().unwrap();
            decoder.process_raw(&frame(0.4)).unwrap();
            decoder.end_utterance().unwrap();
            heard.push(decoder.hypothesis().unwrap());
        }
        assert_eq!(heard, vec!["ONE", "TWO"]);
    }
}
