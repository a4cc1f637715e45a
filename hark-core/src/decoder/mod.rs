//! Acoustic decoder abstraction.
//!
//! The `Decoder` trait decouples the listening loop from any specific
//! recognizer backend. A decoder consumes raw 16-bit PCM frames, reports a
//! voice-activity flag after each one, and yields a hypothesis once an
//! utterance is closed.
//!
//! Decoders are built by a [`DecoderFactory`] from a [`DecoderConfig`]; a
//! [`session::DecoderSession`] owns the one live instance and enforces the
//! utterance bracket protocol.

pub mod session;
pub mod stub;

pub use session::{DecoderSession, VoiceActivityState};

use std::path::{Path, PathBuf};

use crate::error::{ListenerError, Result};

/// Contract for recognizer backends.
pub trait Decoder: Send + 'static {
    /// Open a new utterance context.
    fn begin_utterance(&mut self) -> Result<()>;

    /// Push one frame of mono 16-bit LE PCM and return whether the decoder
    /// currently considers the audio to be speech.
    fn process_raw(&mut self, frame: &[u8]) -> Result<bool>;

    /// Close the current utterance context and finalize its hypothesis.
    fn end_utterance(&mut self) -> Result<()>;

    /// Recognized text of the last closed utterance, if any.
    fn hypothesis(&self) -> Option<String>;
}

/// Builds decoders bound to a model/dictionary triple.
pub trait DecoderFactory: Send + Sync + 'static {
    /// # Errors
    /// `ListenerError::Config` for malformed or missing model paths.
    fn configure(&self, config: &DecoderConfig) -> Result<Box<dyn Decoder>>;
}

impl<F> DecoderFactory for F
where
    F: Fn(&DecoderConfig) -> Result<Box<dyn Decoder>> + Send + Sync + 'static,
{
    fn configure(&self, config: &DecoderConfig) -> Result<Box<dyn Decoder>> {
        self(config)
    }
}

/// Model paths a decoder is bound to.
///
/// Immutable: changing a field produces a new config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    acoustic_model: PathBuf,
    language_model: PathBuf,
    dictionary: PathBuf,
    language: String,
}

impl DecoderConfig {
    /// # Errors
    /// `ListenerError::Config` if any path is empty.
    pub fn new(
        acoustic_model: impl Into<PathBuf>,
        language_model: impl Into<PathBuf>,
        dictionary: impl Into<PathBuf>,
        language: impl Into<String>,
    ) -> Result<Self> {
        let config = Self {
            acoustic_model: acoustic_model.into(),
            language_model: language_model.into(),
            dictionary: dictionary.into(),
            language: language.into(),
        };
        for (name, path) in [
            ("acoustic model", &config.acoustic_model),
            ("language model", &config.language_model),
            ("dictionary", &config.dictionary),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ListenerError::Config(format!("empty {name} path")));
            }
        }
        Ok(config)
    }

    /// Same models, different pronunciation dictionary.
    pub fn with_dictionary(&self, dictionary: impl Into<PathBuf>) -> Result<Self> {
        Self::new(
            self.acoustic_model.clone(),
            self.language_model.clone(),
            dictionary,
            self.language.clone(),
        )
    }

    pub fn acoustic_model(&self) -> &Path {
        &self.acoustic_model
    }

    pub fn language_model(&self) -> &Path {
        &self.language_model
    }

    pub fn dictionary(&self) -> &Path {
        &self.dictionary
    }

    pub fn language(&self) -> &str {
        &self.language
    }
}
