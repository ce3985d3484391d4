pub mod http;
pub mod transcript;

use async_trait::async_trait;
use shared::AudioClip;

use crate::error::PipelineError;

pub use http::HttpPipeline;
pub use transcript::post_process_transcription;

/// One utterance handed to the answer pipeline.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub utterance_id: u64,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub subject_hint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineResponse {
    pub transcript: String,
    pub response_text: String,
    pub response_audio: AudioClip,
    pub sources: Vec<String>,
    pub subject: Option<String>,
}

/// Transcription, retrieval, generation and synthesis behind one call.
///
/// Calls may take many seconds. Implementations hold no state shared with
/// the caller.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn process(&self, request: PipelineRequest) -> Result<PipelineResponse, PipelineError>;
}
