//! # hark-core
//!
//! Offline speech listener SDK.
//!
//! ## Architecture
//!
//! ```text
//! AudioBackend → AudioSource (16-bit PCM frames) → DecoderSession::feed
//!                                                        │
//!                                             VAD edge (Segmenter)
//!                                                        │
//!                                      end_utterance → hypothesis → begin
//!                                                        │
//!                                Utterances iterator  /  EventBus (async)
//! ```
//!
//! The decoder and stream are owned by one session at a time; see
//! [`engine`] for the lifecycle.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod bus;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod grammar;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::{AudioBackend, AudioSource, StreamFormat};
pub use bus::{cue::ListeningCue, BroadcastBus, EventBus, Message, NullBus};
pub use config::ListenerConfig;
pub use decoder::{stub::StubDecoderFactory, Decoder, DecoderConfig, DecoderFactory};
pub use engine::{ListenMode, LocalListener, TaskKind, TaskOutcome, Utterances};
pub use error::{ListenerError, Result};
pub use grammar::{CompiledGrammar, GrammarSpec};

#[cfg(feature = "audio-cpal")]
pub use audio::capture::CpalBackend;
