use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a conversation session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Listening,
    ProcessingOne,
    Stopping,
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Listening | SessionState::ProcessingOne)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::ProcessingOne => "processing",
            SessionState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Classification of a failed dispatch.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The pipeline could not be reached or the request did not complete.
    Transport,
    /// The pipeline answered with an error.
    Upstream,
    /// The pipeline answered with something that could not be decoded.
    InvalidResponse,
    /// The pipeline heard nothing it could transcribe.
    EmptyTranscript,
    Internal,
}

/// Encoded response audio (a WAV file in memory).
///
/// Cloning shares the bytes. The clip never crosses the IPC boundary.
#[derive(Clone)]
pub struct AudioClip(Arc<[u8]>);

impl AudioClip {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for AudioClip {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PartialEq for AudioClip {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

impl fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AudioClip({} bytes)", self.len())
    }
}

/// One completed question/answer exchange.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub utterance_id: u64,
    pub transcript: String,
    pub response_text: String,
    #[serde(skip)]
    pub response_audio: AudioClip,
    pub sources: Vec<String>,
    pub subject: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DispatchFailure {
    pub utterance_id: u64,
    pub kind: FailureKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// What a polling presentation layer sees on each tick.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PollSnapshot {
    pub state: SessionState,
    pub last_transcript: Option<String>,
    pub last_response_text: Option<String>,
    pub last_failure: Option<DispatchFailure>,
    /// Device fault that ended the most recent session, if any.
    pub fault: Option<String>,
    pub turns: usize,
    pub dropped_utterances: u64,
}
