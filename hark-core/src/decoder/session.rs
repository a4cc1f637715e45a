//! `DecoderSession` — owns the single live decoder and its utterance bracket.
//!
//! ```text
//! reset() ──► begin_utterance() ──► feed()* ──► end_utterance() ──► hypothesis()
//!                    ▲                                  │
//!                    └──────────────────────────────────┘
//! ```
//!
//! Bracket misuse (double begin, end without begin, hypothesis while open,
//! feed while closed) is an `InvalidState` error rather than undefined
//! decoder behaviour.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Decoder, DecoderConfig, DecoderFactory};
use crate::audio::BYTES_PER_SAMPLE;
use crate::error::{ListenerError, Result};

/// Voice-activity flag reported after each frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoiceActivityState {
    pub in_speech: bool,
}

pub struct DecoderSession {
    factory: Arc<dyn DecoderFactory>,
    language: String,
    /// Last triple passed to `reset`; omitted paths default to it.
    base: Option<DecoderConfig>,
    /// Config of the live decoder (may carry a grammar dictionary).
    active: Option<DecoderConfig>,
    decoder: Option<Box<dyn Decoder>>,
    utterance_open: bool,
    /// Whether an utterance has ended since the last reset.
    has_ended: bool,
    frame_samples: usize,
}

impl DecoderSession {
    /// No decoder is built until the first `reset`.
    pub fn new(
        factory: Arc<dyn DecoderFactory>,
        language: impl Into<String>,
        frame_samples: usize,
    ) -> Self {
        Self {
            factory,
            language: language.into(),
            base: None,
            active: None,
            decoder: None,
            utterance_open: false,
            has_ended: false,
            frame_samples,
        }
    }

    /// Rebuild the decoder, defaulting omitted paths to the last-known ones.
    ///
    /// # Errors
    /// `ListenerError::Config` if a path was never supplied or the factory
    /// rejects the config.
    pub fn reset(
        &mut self,
        hmm: Option<&Path>,
        lm: Option<&Path>,
        dict: Option<&Path>,
    ) -> Result<()> {
        let base = self.base.as_ref();
        let config = DecoderConfig::new(
            pick(hmm, base.map(DecoderConfig::acoustic_model), "acoustic model")?,
            pick(lm, base.map(DecoderConfig::language_model), "language model")?,
            pick(dict, base.map(DecoderConfig::dictionary), "dictionary")?,
            self.language.clone(),
        )?;
        self.build(&config)?;
        self.base = Some(config.clone());
        self.active = Some(config);
        Ok(())
    }

    /// Rebuild the decoder from the last-known triple with a different
    /// dictionary. The last-known triple itself is left untouched.
    pub fn reset_with_dictionary(&mut self, dictionary: &Path) -> Result<()> {
        let config = self
            .base
            .as_ref()
            .ok_or_else(|| ListenerError::Config("decoder was never configured".into()))?
            .with_dictionary(dictionary)?;
        self.build(&config)?;
        self.active = Some(config);
        Ok(())
    }

    fn build(&mut self, config: &DecoderConfig) -> Result<()> {
        self.release();
        info!(
            hmm = %config.acoustic_model().display(),
            lm = %config.language_model().display(),
            dict = %config.dictionary().display(),
            "resetting decoder"
        );
        let decoder = self.factory.configure(config).map_err(|e| match e {
            ListenerError::Config(_) => e,
            other => ListenerError::Config(other.to_string()),
        })?;
        self.decoder = Some(decoder);
        Ok(())
    }

    pub fn begin_utterance(&mut self) -> Result<()> {
        if self.utterance_open {
            return Err(ListenerError::InvalidState("utterance already open"));
        }
        self.live_decoder()?.begin_utterance()?;
        self.utterance_open = true;
        Ok(())
    }

    pub fn end_utterance(&mut self) -> Result<()> {
        if !self.utterance_open {
            return Err(ListenerError::InvalidState("no utterance open"));
        }
        self.utterance_open = false;
        self.has_ended = true;
        self.live_decoder()?.end_utterance()
    }

    /// Push one frame and return the updated voice-activity flag.
    ///
    /// # Errors
    /// `FrameSize` unless `frame` is exactly one capture frame.
    pub fn feed(&mut self, frame: &[u8]) -> Result<VoiceActivityState> {
        if !self.utterance_open {
            return Err(ListenerError::InvalidState("feed without an open utterance"));
        }
        let expected = self.frame_bytes();
        if frame.len() != expected {
            return Err(ListenerError::FrameSize {
                expected,
                actual: frame.len(),
            });
        }
        let in_speech = self.live_decoder()?.process_raw(frame)?;
        Ok(VoiceActivityState { in_speech })
    }

    /// Untrimmed text of the utterance just closed, or `None`.
    pub fn hypothesis(&self) -> Result<Option<String>> {
        if self.utterance_open {
            return Err(ListenerError::InvalidState(
                "hypothesis read while utterance open",
            ));
        }
        if !self.has_ended {
            return Err(ListenerError::InvalidState("no utterance has ended"));
        }
        let decoder = self
            .decoder
            .as_ref()
            .ok_or(ListenerError::InvalidState("no decoder loaded"))?;
        Ok(decoder.hypothesis())
    }

    /// Close the utterance if one is open.
    pub fn close_utterance(&mut self) -> Result<()> {
        if self.utterance_open {
            self.end_utterance()?;
        }
        Ok(())
    }

    /// Drop the decoder handle. Idempotent.
    pub fn release(&mut self) {
        if let Err(e) = self.close_utterance() {
            warn!("closing utterance on release failed: {e}");
        }
        if self.decoder.take().is_some() {
            debug!("decoder released");
        }
        self.utterance_open = false;
        self.has_ended = false;
        self.active = None;
    }

    pub fn is_live(&self) -> bool {
        self.decoder.is_some()
    }

    pub fn is_utterance_open(&self) -> bool {
        self.utterance_open
    }

    /// Config of the live decoder.
    pub fn config(&self) -> Option<&DecoderConfig> {
        self.active.as_ref()
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_samples * BYTES_PER_SAMPLE
    }

    fn live_decoder(&mut self) -> Result<&mut Box<dyn Decoder>> {
        self.decoder
            .as_mut()
            .ok_or(ListenerError::InvalidState("no decoder loaded"))
    }
}

fn pick(given: Option<&Path>, last: Option<&Path>, name: &str) -> Result<PathBuf> {
    given
        .or(last)
        .map(Path::to_path_buf)
        .ok_or_else(|| ListenerError::Config(format!("no {name} path configured")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct EchoDecoder {
        log: Arc<Mutex<Vec<String>>>,
        text: Option<String>,
    }

    impl Decoder for EchoDecoder {
        fn begin_utterance(&mut self) -> Result<()> {
            self.log.lock().push("begin".into());
            Ok(())
        }

        fn process_raw(&mut self, frame: &[u8]) -> Result<bool> {
            Ok(frame.iter().any(|b| *b != 0))
        }

        fn end_utterance(&mut self) -> Result<()> {
            self.log.lock().push("end".into());
            Ok(())
        }

        fn hypothesis(&self) -> Option<String> {
            self.text.clone()
        }
    }

    impl Drop for EchoDecoder {
        fn drop(&mut self) {
            self.log.lock().push("drop".into());
        }
    }

    fn session(log: &Arc<Mutex<Vec<String>>>) -> DecoderSession {
        let log = Arc::clone(log);
        let factory = move |config: &DecoderConfig| -> Result<Box<dyn Decoder>> {
            log.lock()
                .push(format!("configure {}", config.dictionary().display()));
            Ok(Box::new(EchoDecoder {
                log: Arc::clone(&log),
                text: Some(" hi ".into()),
            }))
        };
        DecoderSession::new(Arc::new(factory), "en-us", 4)
    }

    #[test]
    fn first_reset_requires_all_paths() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut s = session(&log);
        let err = s
            .reset(Some(Path::new("hmm")), Some(Path::new("lm")), None)
            .unwrap_err();
        assert!(matches!(err, ListenerError::Config(_)));
        assert!(!s.is_live());
    }

    #[test]
    fn reset_defaults_to_last_known_paths() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut s = session(&log);
        s.reset(
            Some(Path::new("hmm")),
            Some(Path::new("lm")),
            Some(Path::new("a.dic")),
        )
        .unwrap();
        s.reset(None, None, None).unwrap();
        assert_eq!(s.config().unwrap().dictionary(), Path::new("a.dic"));
        assert_eq!(
            &*log.lock(),
            &["configure a.dic", "drop", "configure a.dic"]
        );
    }

    #[test]
    fn dictionary_override_does_not_change_defaults() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut s = session(&log);
        s.reset(
            Some(Path::new("hmm")),
            Some(Path::new("lm")),
            Some(Path::new("a.dic")),
        )
        .unwrap();
        s.reset_with_dictionary(Path::new("numbers.dic")).unwrap();
        assert_eq!(s.config().unwrap().dictionary(), Path::new("numbers.dic"));
        s.reset(None, None, None).unwrap();
        assert_eq!(s.config().unwrap().dictionary(), Path::new("a.dic"));
    }

    #[test]
    fn bracket_misuse_is_invalid_state() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut s = session(&log);
        assert!(matches!(
            s.begin_utterance(),
            Err(ListenerError::InvalidState(_))
        ));

        s.reset(
            Some(Path::new("hmm")),
            Some(Path::new("lm")),
            Some(Path::new("a.dic")),
        )
        .unwrap();
        assert!(matches!(s.end_utterance(), Err(ListenerError::InvalidState(_))));
        assert!(matches!(s.hypothesis(), Err(ListenerError::InvalidState(_))));

        s.begin_utterance().unwrap();
        assert!(matches!(
            s.begin_utterance(),
            Err(ListenerError::InvalidState(_))
        ));
        assert!(matches!(s.hypothesis(), Err(ListenerError::InvalidState(_))));

        s.end_utterance().unwrap();
        assert_eq!(s.hypothesis().unwrap().as_deref(), Some(" hi "));
        assert!(matches!(
            s.feed(&[0u8; 8]),
            Err(ListenerError::InvalidState(_))
        ));
    }

    #[test]
    fn feed_validates_frame_size() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut s = session(&log);
        s.reset(
            Some(Path::new("hmm")),
            Some(Path::new("lm")),
            Some(Path::new("a.dic")),
        )
        .unwrap();
        s.begin_utterance().unwrap();
        assert!(matches!(
            s.feed(&[0u8; 7]),
            Err(ListenerError::FrameSize {
                expected: 8,
                actual: 7
            })
        ));
        assert!(!s.feed(&[0u8; 8]).unwrap().in_speech);
        assert!(s.feed(&[1u8; 8]).unwrap().in_speech);
    }

    #[test]
    fn release_closes_open_utterance_and_is_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut s = session(&log);
        s.reset(
            Some(Path::new("hmm")),
            Some(Path::new("lm")),
            Some(Path::new("a.dic")),
        )
        .unwrap();
        s.begin_utterance().unwrap();
        s.release();
        s.release();
        assert!(!s.is_live());
        assert!(!s.is_utterance_open());
        assert_eq!(&*log.lock(), &["configure a.dic", "begin", "end", "drop"]);
    }
}
