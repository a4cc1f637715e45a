use thiserror::Error;

/// All errors produced by hark-core.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("decoder configuration error: {0}")]
    Config(String),

    #[error("invalid decoder state: {0}")]
    InvalidState(&'static str),

    #[error("audio frame has {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },

    #[error("no built-in digit grammar for language '{0}'")]
    UnsupportedLanguage(String),

    #[error("grammar phrase '{phrase}' has {words} words but {groups} phoneme groups")]
    Grammar {
        phrase: String,
        words: usize,
        groups: usize,
    },

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("decoder error: {0}")]
    Decoder(String),

    #[error("a listening task of this kind is already running")]
    AlreadyRunning,

    #[error("listener has been shut down")]
    ShutDown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ListenerError>;
