use thiserror::Error;

/// All errors produced by nexa-core.
#[derive(Debug, Error)]
pub enum NexaError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("microphone unavailable: {0}")]
    MicrophoneUnavailable(String),

    #[error("audio decode error: {0}")]
    Decode(String),

    #[error("live session error: {0}")]
    Session(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("voice client is already active")]
    AlreadyActive,

    #[error("start was cancelled by stop")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, NexaError>;
