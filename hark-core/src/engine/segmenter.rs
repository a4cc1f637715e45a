//! Voice-activity edge tracker.
//!
//! ## States
//!
//! ```text
//! Idle ──open()──► InSilence ──speech──► InSpeech
//!                     ▲                     │
//!                     └──silence: end, hyp, begin (maybe emit)
//!
//! any ──close()──► Closed
//! ```
//!
//! Only edges matter. Silence→speech is a no-op beyond the state change;
//! speech→silence closes the decoder utterance, reads its hypothesis, and
//! immediately reopens a new utterance context. A hypothesis that is absent
//! or blank after trimming is discarded.

use tracing::debug;

use crate::decoder::DecoderSession;
use crate::error::{ListenerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    InSilence,
    InSpeech,
    Closed,
}

impl LoopState {
    pub fn is_streaming(self) -> bool {
        matches!(self, LoopState::InSilence | LoopState::InSpeech)
    }
}

#[derive(Debug)]
pub struct Segmenter {
    state: LoopState,
    /// Speech→silence edges seen, including discarded ones.
    segments: usize,
}

impl Segmenter {
    pub fn new() -> Self {
        Self {
            state: LoopState::Idle,
            segments: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn segments(&self) -> usize {
        self.segments
    }

    /// Open the first utterance context and start streaming.
    pub fn open(&mut self, decoder: &mut DecoderSession) -> Result<()> {
        if self.state != LoopState::Idle {
            return Err(ListenerError::InvalidState("segmenter already opened"));
        }
        decoder.begin_utterance()?;
        self.state = LoopState::InSilence;
        Ok(())
    }

    /// Feed one frame. Returns the trimmed utterance closed by a
    /// speech→silence edge, if it decoded to anything.
    pub fn push_frame(
        &mut self,
        decoder: &mut DecoderSession,
        frame: &[u8],
    ) -> Result<Option<String>> {
        if !self.state.is_streaming() {
            return Err(ListenerError::InvalidState("segmenter is not streaming"));
        }

        let vad = decoder.feed(frame)?;
        match (self.state, vad.in_speech) {
            (LoopState::InSilence, true) => {
                debug!("speech started");
                self.state = LoopState::InSpeech;
                Ok(None)
            }
            (LoopState::InSpeech, false) => {
                self.state = LoopState::InSilence;
                self.segments += 1;

                decoder.end_utterance()?;
                let hypothesis = decoder.hypothesis()?;
                decoder.begin_utterance()?;

                let text = hypothesis
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty());
                match &text {
                    Some(t) => debug!(utterance = %t, "speech ended"),
                    None => debug!("speech ended without a hypothesis"),
                }
                Ok(text)
            }
            _ => Ok(None),
        }
    }

    /// Stop streaming, closing the decoder utterance if still open.
    pub fn close(&mut self, decoder: &mut DecoderSession) -> Result<()> {
        self.state = LoopState::Closed;
        decoder.close_utterance()
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Arc;

    use crate::decoder::{Decoder, DecoderConfig};

    const FRAME_SAMPLES: usize = 4;

    /// Frames carry their VAD flag in byte 0.
    struct FlagDecoder {
        hypotheses: VecDeque<Option<String>>,
        current: Option<String>,
    }

    impl Decoder for FlagDecoder {
        fn begin_utterance(&mut self) -> Result<()> {
            Ok(())
        }

        fn process_raw(&mut self, frame: &[u8]) -> Result<bool> {
            Ok(frame[0] != 0)
        }

        fn end_utterance(&mut self) -> Result<()> {
            self.current = self.hypotheses.pop_front().flatten();
            Ok(())
        }

        fn hypothesis(&self) -> Option<String> {
            self.current.clone()
        }
    }

    fn session(hypotheses: Vec<Option<&str>>) -> DecoderSession {
        let hyps: Vec<Option<String>> = hypotheses
            .into_iter()
            .map(|h| h.map(str::to_string))
            .collect();
        let factory = move |_: &DecoderConfig| -> Result<Box<dyn Decoder>> {
            Ok(Box::new(FlagDecoder {
                hypotheses: hyps.clone().into(),
                current: None,
            }))
        };
        let mut s = DecoderSession::new(Arc::new(factory), "en-us", FRAME_SAMPLES);
        s.reset(
            Some(Path::new("hmm")),
            Some(Path::new("lm")),
            Some(Path::new("dict")),
        )
        .unwrap();
        s
    }

    fn frame(speech: bool) -> Vec<u8> {
        let mut f = vec![0u8; FRAME_SAMPLES * 2];
        f[0] = speech as u8;
        f
    }

    fn run(seg: &mut Segmenter, s: &mut DecoderSession, flags: &[bool]) -> Vec<String> {
        flags
            .iter()
            .filter_map(|flag| seg.push_frame(s, &frame(*flag)).unwrap())
            .collect()
    }

    #[test]
    fn silence_only_never_emits() {
        let mut s = session(vec![]);
        let mut seg = Segmenter::new();
        seg.open(&mut s).unwrap();
        assert!(run(&mut seg, &mut s, &[false; 50]).is_empty());
        assert_eq!(seg.state(), LoopState::InSilence);
        assert_eq!(seg.segments(), 0);
    }

    #[test]
    fn speech_to_silence_edge_emits_trimmed_hypothesis() {
        let mut s = session(vec![Some("  hello world \n")]);
        let mut seg = Segmenter::new();
        seg.open(&mut s).unwrap();

        let out = run(&mut seg, &mut s, &[false, true, true, true, false, false]);
        assert_eq!(out, vec!["hello world"]);
        assert_eq!(seg.state(), LoopState::InSilence);
        assert!(s.is_utterance_open(), "a new utterance is reopened");
    }

    #[test]
    fn blank_and_missing_hypotheses_are_discarded() {
        let mut s = session(vec![Some("   "), None, Some("two")]);
        let mut seg = Segmenter::new();
        seg.open(&mut s).unwrap();

        let out = run(
            &mut seg,
            &mut s,
            &[true, false, true, false, true, false],
        );
        assert_eq!(out, vec!["two"]);
        assert_eq!(seg.segments(), 3);
    }

    #[test]
    fn push_before_open_or_after_close_is_invalid() {
        let mut s = session(vec![]);
        let mut seg = Segmenter::new();
        assert!(matches!(
            seg.push_frame(&mut s, &frame(true)),
            Err(ListenerError::InvalidState(_))
        ));

        seg.open(&mut s).unwrap();
        seg.close(&mut s).unwrap();
        assert_eq!(seg.state(), LoopState::Closed);
        assert!(!s.is_utterance_open());
        assert!(seg.push_frame(&mut s, &frame(true)).is_err());
    }

    #[test]
    fn wrong_frame_size_surfaces_as_error() {
        let mut s = session(vec![]);
        let mut seg = Segmenter::new();
        seg.open(&mut s).unwrap();
        assert!(matches!(
            seg.push_frame(&mut s, &[1u8; 3]),
            Err(ListenerError::FrameSize { expected: 8, actual: 3 })
        ));
    }
}
