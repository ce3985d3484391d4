pub mod queue;
pub mod worker;

use shared::{ConversationTurn, DispatchFailure};

pub use queue::BoundedQueue;
pub use worker::DispatchWorker;

/// Outcome of one dispatch, passed once through the output queue.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultEnvelope {
    Success(ConversationTurn),
    Failure(DispatchFailure),
}

impl ResultEnvelope {
    pub fn utterance_id(&self) -> u64 {
        match self {
            ResultEnvelope::Success(turn) => turn.utterance_id,
            ResultEnvelope::Failure(failure) => failure.utterance_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResultEnvelope::Success(_))
    }
}
