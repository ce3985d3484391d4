use chrono::Utc;
use shared::{AudioClip, ConversationTurn, DispatchFailure};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::queue::BoundedQueue;
use super::ResultEnvelope;
use crate::error::PipelineError;
use crate::pipeline::{post_process_transcription, Pipeline, PipelineRequest};
use crate::vad::Utterance;

/// Single-flight consumer of the utterance queue.
pub struct DispatchWorker {
    pipeline: Arc<dyn Pipeline>,
    subject_hint: Option<String>,
    utterances: Arc<BoundedQueue<Utterance>>,
    results: Arc<BoundedQueue<ResultEnvelope>>,
    playback: Option<mpsc::Sender<AudioClip>>,
    busy: watch::Sender<bool>,
}

impl DispatchWorker {
    pub fn new(
        pipeline: Arc<dyn Pipeline>,
        subject_hint: Option<String>,
        utterances: Arc<BoundedQueue<Utterance>>,
        results: Arc<BoundedQueue<ResultEnvelope>>,
        playback: Option<mpsc::Sender<AudioClip>>,
        busy: watch::Sender<bool>,
    ) -> Self {
        Self {
            pipeline,
            subject_hint,
            utterances,
            results,
            playback,
            busy,
        }
    }

    /// Runs one utterance through the pipeline. Never fails: pipeline errors
    /// become failure envelopes.
    pub async fn process(&self, utterance: Utterance) -> ResultEnvelope {
        let utterance_id = utterance.id();
        let request = PipelineRequest {
            utterance_id,
            samples: utterance.samples(),
            sample_rate: utterance.sample_rate(),
            subject_hint: self.subject_hint.clone(),
        };
        // The pipeline owns the samples now.
        drop(utterance);

        // Run on its own task so a panicking pipeline becomes a failure.
        let pipeline = Arc::clone(&self.pipeline);
        let call = tokio::spawn(async move { pipeline.process(request).await });
        let result = match call.await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::Panicked(e.to_string())),
        };

        let result = result.and_then(|response| {
            let transcript = post_process_transcription(&response.transcript);
            if transcript.is_empty() {
                return Err(PipelineError::EmptyTranscript);
            }
            Ok((transcript, response))
        });

        match result {
            Ok((transcript, response)) => {
                info!("Utterance {} answered: '{}'", utterance_id, transcript);
                ResultEnvelope::Success(ConversationTurn {
                    utterance_id,
                    transcript,
                    response_text: response.response_text,
                    response_audio: response.response_audio,
                    sources: response.sources,
                    subject: response.subject,
                    timestamp: Utc::now(),
                })
            }
            Err(e) => {
                warn!("Utterance {} failed: {}", utterance_id, e);
                ResultEnvelope::Failure(DispatchFailure {
                    utterance_id,
                    kind: e.kind(),
                    message: e.to_string(),
                    timestamp: Utc::now(),
                })
            }
        }
    }

    /// Dispatches queued utterances until cancelled or the utterance queue
    /// closes. A dispatch already in progress is always completed.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Dispatch worker started");
        let _exit = ExitGuard(&self);

        loop {
            let utterance = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.utterances.pop() => match next {
                    Some(utterance) => utterance,
                    None => break,
                },
            };

            debug!(
                "Dispatching utterance {} ({}ms, {} queued behind it)",
                utterance.id(),
                utterance.duration_ms(),
                self.utterances.len()
            );

            let _ = self.busy.send(true);
            let envelope = self.process(utterance).await;
            let _ = self.busy.send(false);

            self.deliver(envelope);
        }
    }

    fn deliver(&self, envelope: ResultEnvelope) {
        let clip = match &envelope {
            ResultEnvelope::Success(turn) if !turn.response_audio.is_empty() => {
                Some(turn.response_audio.clone())
            }
            _ => None,
        };

        match self.results.push(envelope) {
            Ok(None) => {}
            Ok(Some(evicted)) => {
                warn!(
                    "Output queue full, dropped result for utterance {}",
                    evicted.utterance_id()
                );
            }
            Err(rejected) => {
                warn!(
                    "Output queue closed, discarding result for utterance {}",
                    rejected.utterance_id()
                );
                return;
            }
        }

        if let (Some(playback), Some(clip)) = (&self.playback, clip) {
            if let Err(e) = playback.try_send(clip) {
                warn!("Playback queue unavailable, skipping response audio: {}", e);
            }
        }
    }
}

/// Closes the output queue and clears the busy flag however `run` exits,
/// so the supervisor never waits on a dead worker.
struct ExitGuard<'a>(&'a DispatchWorker);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        let _ = self.0.busy.send(false);
        self.0.results.close();
        info!("Dispatch worker stopped");
    }
}
