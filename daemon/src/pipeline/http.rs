use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use serde::Deserialize;
use shared::AudioClip;
use std::time::Duration;
use tracing::{debug, info};

use super::{Pipeline, PipelineRequest, PipelineResponse};
use crate::audio::encode_wav;
use crate::config::PipelineConfig;
use crate::error::PipelineError;

#[derive(Debug, Deserialize)]
struct WireResponse {
    transcript: String,
    response_text: String,
    #[serde(default)]
    response_audio: Option<String>,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    subject: Option<String>,
}

/// Posts each utterance as a WAV file to a remote answer service.
///
/// The request timeout bounds a hung call; no other deadline applies.
pub struct HttpPipeline {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPipeline {
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PipelineError::Transport(format!("failed to create HTTP client: {}", e)))?;

        info!("Pipeline endpoint: {}", config.endpoint);

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl Pipeline for HttpPipeline {
    async fn process(&self, request: PipelineRequest) -> Result<PipelineResponse, PipelineError> {
        let wav = encode_wav(&request.samples, request.sample_rate)
            .map_err(|e| PipelineError::Encoding(e.to_string()))?;

        debug!(
            "Posting utterance {} ({} bytes) to {}",
            request.utterance_id,
            wav.len(),
            self.endpoint
        );

        let mut query = vec![("sample_rate", request.sample_rate.to_string())];
        if let Some(subject) = request.subject_hint {
            query.push(("subject", subject));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .body(wav)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        let wire: WireResponse = serde_json::from_slice(&bytes)
            .map_err(|e| PipelineError::InvalidResponse(e.to_string()))?;

        let response_audio = match wire.response_audio {
            Some(encoded) if !encoded.is_empty() => {
                let decoded = general_purpose::STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| PipelineError::InvalidResponse(format!("response_audio: {}", e)))?;
                AudioClip::new(decoded)
            }
            _ => AudioClip::default(),
        };

        Ok(PipelineResponse {
            transcript: wire.transcript,
            response_text: wire.response_text,
            response_audio,
            sources: wire.sources,
            subject: wire.subject,
        })
    }
}
