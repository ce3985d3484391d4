// Common test helpers for parleyd tests
//
// This module provides:
// - Scripted stand-ins for the audio source, classifier, pipeline and speaker
// - Polling helpers for asynchronous session state
// - User interaction and output formatting for hardware tests
#![allow(dead_code)]

use async_trait::async_trait;
use parleyd::audio::{AudioFrame, AudioSource, CaptureEvent, CaptureHandle, PlaybackSink};
use parleyd::config::Config;
use parleyd::error::{ClassifierError, DeviceError, PipelineError, PlaybackError};
use parleyd::pipeline::{Pipeline, PipelineRequest, PipelineResponse};
use parleyd::vad::VoiceClassifier;
use shared::AudioClip;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::TryRecvError;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Scripted frames are 100 ms at 1 kHz.
pub const SAMPLE_RATE: u32 = 1000;
pub const FRAME_MS: u32 = 100;
const FRAME_PACE: Duration = Duration::from_millis(2);

/// Session config matching the scripted frame format, VAD defaults otherwise.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.audio.sample_rate = SAMPLE_RATE;
    config.audio.frame_ms = FRAME_MS;
    config
}

/// Scores for one utterance at default VAD settings: 600 ms of speech then
/// 800 ms of silence.
pub fn one_utterance() -> Vec<f32> {
    let mut scores = vec![0.9; 6];
    scores.extend([0.1; 8]);
    scores
}

pub fn utterances(count: usize) -> Vec<f32> {
    (0..count).flat_map(|_| one_utterance()).collect()
}

/// What the scripted device does once its scores are exhausted.
#[derive(Debug, Clone)]
pub enum AfterScript {
    /// Keep the stream open until stopped.
    Hold,
    /// Report a device error, then wait to be stopped.
    Fail(DeviceError),
    /// Close the stream without an error.
    Disconnect,
}

#[derive(Debug, Clone)]
pub struct Script {
    pub scores: Vec<f32>,
    pub then: AfterScript,
}

impl Script {
    pub fn hold(scores: Vec<f32>) -> Self {
        Self {
            scores,
            then: AfterScript::Hold,
        }
    }

    pub fn then(scores: Vec<f32>, then: AfterScript) -> Self {
        Self { scores, then }
    }
}

/// Audio source that plays one script per open. Each frame's samples all
/// equal its score, for use with [`FirstSampleClassifier`].
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<VecDeque<Script>>,
    open_error: Mutex<Option<DeviceError>>,
    opens: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        }
    }

    pub fn failing(error: DeviceError) -> Self {
        Self {
            open_error: Mutex::new(Some(error)),
            ..Default::default()
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl AudioSource for ScriptedSource {
    fn open(
        &self,
        events: tokio::sync::mpsc::Sender<CaptureEvent>,
    ) -> Result<CaptureHandle, DeviceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.open_error.lock().unwrap().clone() {
            return Err(error);
        }

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::hold(Vec::new()));

        CaptureHandle::spawn("scripted-capture", move |stop_rx| {
            let stopped = |rx: &std::sync::mpsc::Receiver<()>| {
                matches!(rx.try_recv(), Ok(()) | Err(TryRecvError::Disconnected))
            };

            for (i, score) in script.scores.iter().enumerate() {
                if stopped(&stop_rx) {
                    return;
                }
                let seq = i as u64;
                let frame = AudioFrame::new(
                    seq,
                    seq * FRAME_MS as u64,
                    SAMPLE_RATE,
                    vec![*score; (SAMPLE_RATE * FRAME_MS / 1000) as usize],
                );
                if events.blocking_send(CaptureEvent::Frame(frame)).is_err() {
                    return;
                }
                std::thread::sleep(FRAME_PACE);
            }

            match script.then {
                AfterScript::Hold => {
                    let _ = stop_rx.recv();
                }
                AfterScript::Fail(error) => {
                    let _ = events.blocking_send(CaptureEvent::Failed(error));
                    let _ = stop_rx.recv();
                }
                AfterScript::Disconnect => {}
            }
        })
    }
}

/// Uses the first sample of a frame as its speech score.
pub struct FirstSampleClassifier;

impl VoiceClassifier for FirstSampleClassifier {
    fn score(&self, frame: &AudioFrame) -> Result<f32, ClassifierError> {
        frame
            .samples()
            .first()
            .copied()
            .ok_or(ClassifierError::EmptyFrame)
    }
}

pub struct Reply {
    pub delay: Duration,
    pub result: Result<PipelineResponse, PipelineError>,
    pub panics: bool,
}

impl Reply {
    pub fn answer(transcript: &str, delay: Duration) -> Self {
        Self {
            delay,
            result: Ok(PipelineResponse {
                transcript: transcript.to_string(),
                response_text: format!("answer to {}", transcript),
                ..Default::default()
            }),
            panics: false,
        }
    }

    pub fn with_audio(transcript: &str, audio: Vec<u8>) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(PipelineResponse {
                transcript: transcript.to_string(),
                response_text: format!("answer to {}", transcript),
                response_audio: AudioClip::new(audio),
                ..Default::default()
            }),
            panics: false,
        }
    }

    pub fn fail(error: PipelineError) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(error),
            panics: false,
        }
    }

    /// The pipeline call panics instead of answering.
    pub fn panic() -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(PipelineResponse::default()),
            panics: true,
        }
    }
}

/// Pipeline that answers from a queue of replies and records every call.
/// Once the queue is empty it answers "question N" immediately.
#[derive(Default)]
pub struct ScriptedPipeline {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<u64>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedPipeline {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    /// Utterance ids in call order.
    pub fn calls(&self) -> Vec<u64> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Pipeline for ScriptedPipeline {
    async fn process(&self, request: PipelineRequest) -> Result<PipelineResponse, PipelineError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(request.utterance_id);

        let reply = self.replies.lock().unwrap().pop_front();
        let result = match reply {
            Some(reply) => {
                tokio::time::sleep(reply.delay).await;
                if reply.panics {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    panic!("pipeline blew up on utterance {}", request.utterance_id);
                }
                reply.result
            }
            None => Ok(PipelineResponse {
                transcript: format!("question {}", request.utterance_id),
                response_text: "answer".to_string(),
                ..Default::default()
            }),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Speaker that remembers what it was asked to play.
#[derive(Default)]
pub struct RecordingPlayback {
    played: Mutex<Vec<AudioClip>>,
}

impl RecordingPlayback {
    pub fn played(&self) -> Vec<AudioClip> {
        self.played.lock().unwrap().clone()
    }
}

impl PlaybackSink for RecordingPlayback {
    fn play(&self, clip: &AudioClip, _: &CancellationToken) -> Result<(), PlaybackError> {
        self.played.lock().unwrap().push(clip.clone());
        Ok(())
    }
}

/// Polls `condition` every 10 ms until it holds or `timeout` passes.
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Ask user to confirm an action
pub fn confirm_action(prompt: &str) -> bool {
    print!(
        "\n[CONFIRM] {}\nPress 'y' to confirm, any other key to skip: ",
        prompt
    );
    io::stdout().flush().unwrap();

    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    input.trim().to_lowercase() == "y"
}

/// Print a section header
pub fn print_header(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("  {}", title);
    println!("{}", "=".repeat(60));
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("\n✓ {}", message);
}

/// Print an error message
pub fn print_error(message: &str) {
    println!("\n✗ {}", message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("\nℹ {}", message);
}
