use shared::FailureKind;
use thiserror::Error;

/// Capture or playback device problems. Fatal to a running session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("No input device found")]
    NoInputDevice,

    #[error("No output device found")]
    NoOutputDevice,

    #[error("Unsupported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Audio device disconnected")]
    Disconnected,
}

/// A single classifier call failed. Scored as silence by the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("Frame contains no samples")]
    EmptyFrame,

    #[error("Frame contains non-finite samples")]
    NonFinite,

    #[error("Classifier model error: {0}")]
    Model(String),
}

/// Failure of the downstream answer pipeline for one utterance.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline request failed: {0}")]
    Transport(String),

    #[error("Pipeline returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Pipeline response could not be decoded: {0}")]
    InvalidResponse(String),

    #[error("No speech detected or transcription empty")]
    EmptyTranscript,

    #[error("Audio encoding failed: {0}")]
    Encoding(String),

    #[error("Pipeline task failed: {0}")]
    Panicked(String),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Transport(_) => FailureKind::Transport,
            PipelineError::Upstream { .. } => FailureKind::Upstream,
            PipelineError::InvalidResponse(_) => FailureKind::InvalidResponse,
            PipelineError::EmptyTranscript => FailureKind::EmptyTranscript,
            PipelineError::Encoding(_) | PipelineError::Panicked(_) => FailureKind::Internal,
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PipelineError::InvalidResponse(err.to_string())
        } else {
            PipelineError::Transport(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Response audio could not be decoded: {0}")]
    Decode(String),
}

/// Errors returned by the session controller API.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
