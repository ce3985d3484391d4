use shared::{ConversationTurn, DispatchFailure, PollSnapshot, SessionState};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::{run_playback, AudioSource, CaptureEvent, CaptureHandle, PlaybackSink};
use crate::config::Config;
use crate::dispatch::{BoundedQueue, DispatchWorker, ResultEnvelope};
use crate::error::{DeviceError, SessionError};
use crate::pipeline::Pipeline;
use crate::vad::{score_frame, SegmentationConfig, SpeechDetector, Utterance, VoiceClassifier};

/// External capabilities a session drives.
pub struct SessionDeps {
    pub source: Arc<dyn AudioSource>,
    pub classifier: Arc<dyn VoiceClassifier>,
    pub pipeline: Arc<dyn Pipeline>,
    /// `None` disables playback.
    pub playback: Option<Arc<dyn PlaybackSink>>,
}

/// Owns the conversation lifecycle and everything the presentation layer
/// can observe. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

struct Shared {
    config: Config,
    deps: SessionDeps,
    /// Serializes start and stop.
    lifecycle: tokio::sync::Mutex<()>,
    inner: parking_lot::Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    state: SessionState,
    generation: u64,
    run: Option<Run>,
    history: Vec<ConversationTurn>,
    last_transcript: Option<String>,
    last_response_text: Option<String>,
    last_failure: Option<DispatchFailure>,
    fault: Option<String>,
    dropped_total: u64,
}

/// Resources of one start/stop cycle.
struct Run {
    generation: u64,
    shutdown: CancellationToken,
    capture: Option<CaptureHandle>,
    utterances: Arc<BoundedQueue<Utterance>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(run) = self.inner.get_mut().run.take() {
            run.shutdown.cancel();
        }
    }
}

impl Session {
    pub fn new(config: Config, deps: SessionDeps) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                deps,
                lifecycle: tokio::sync::Mutex::new(()),
                inner: parking_lot::Mutex::new(Inner::default()),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    /// Opens the input device and starts listening. Does nothing if the
    /// session is already running; waits for a stop in progress to finish.
    pub async fn start(&self) -> Result<(), SessionError> {
        let _lifecycle = self.shared.lifecycle.lock().await;
        self.start_locked().await
    }

    /// Stops listening. Returns once every session task has exited; an
    /// in-flight dispatch is allowed to finish first.
    pub async fn stop(&self) {
        let _lifecycle = self.shared.lifecycle.lock().await;
        self.stop_locked(None).await;
    }

    /// Starts when idle, stops otherwise. A run that is already ending on
    /// its own counts as idle: it is allowed to finish and a new one starts.
    pub async fn toggle(&self) -> Result<(), SessionError> {
        let _lifecycle = self.shared.lifecycle.lock().await;

        let ending = {
            let inner = self.shared.inner.lock();
            match &inner.run {
                None => None,
                Some(run) => Some(run.shutdown.is_cancelled()),
            }
        };

        match ending {
            Some(false) => {
                self.stop_locked(None).await;
                Ok(())
            }
            Some(true) => {
                self.stop_locked(None).await;
                self.start_locked().await
            }
            None => self.start_locked().await,
        }
    }

    /// Caller holds the lifecycle lock.
    async fn start_locked(&self) -> Result<(), SessionError> {
        if self.shared.inner.lock().run.is_some() {
            info!("Session already running");
            return Ok(());
        }

        let config = &self.shared.config;
        info!("Starting conversation session");
        self.shared.inner.lock().fault = None;

        let (frame_tx, frame_rx) = mpsc::channel(config.audio.frame_queue_depth);
        let source = Arc::clone(&self.shared.deps.source);
        let capture = match tokio::task::spawn_blocking(move || source.open(frame_tx)).await? {
            Ok(capture) => capture,
            Err(e) => {
                error!("Failed to open input device: {}", e);
                let mut inner = self.shared.inner.lock();
                inner.state = SessionState::Idle;
                inner.fault = Some(e.to_string());
                return Err(e.into());
            }
        };

        let generation = {
            let mut inner = self.shared.inner.lock();
            inner.generation += 1;
            inner.generation
        };

        let shutdown = CancellationToken::new();
        let utterances = Arc::new(BoundedQueue::new(config.conversation.max_queue_depth));
        let results = Arc::new(BoundedQueue::new(config.conversation.output_queue_depth));
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let (busy_tx, busy_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(4);

        let detector = SpeechDetector::new(SegmentationConfig::from(&config.vad));
        tasks.push(tokio::spawn(run_segmentation(
            frame_rx,
            Arc::clone(&self.shared.deps.classifier),
            detector,
            Arc::clone(&utterances),
            fault_tx.clone(),
            shutdown.clone(),
        )));

        let playback_tx = match (&self.shared.deps.playback, config.playback.enabled) {
            (Some(sink), true) => {
                let (clip_tx, clip_rx) = mpsc::channel(config.conversation.output_queue_depth);
                tasks.push(tokio::spawn(run_playback(
                    Arc::clone(sink),
                    clip_rx,
                    fault_tx.clone(),
                    shutdown.clone(),
                )));
                Some(clip_tx)
            }
            _ => None,
        };
        drop(fault_tx);

        let worker = DispatchWorker::new(
            Arc::clone(&self.shared.deps.pipeline),
            config.conversation.subject_hint.clone(),
            Arc::clone(&utterances),
            Arc::clone(&results),
            playback_tx,
            busy_tx,
        );
        tasks.push(tokio::spawn(worker.run(shutdown.clone())));

        tasks.push(tokio::spawn(supervise(
            Arc::downgrade(&self.shared),
            generation,
            results,
            busy_rx,
            fault_rx,
            shutdown.clone(),
            Duration::from_secs(config.conversation.max_conversation_duration_s),
        )));

        let mut inner = self.shared.inner.lock();
        inner.run = Some(Run {
            generation,
            shutdown,
            capture: Some(capture),
            utterances,
            tasks,
        });
        inner.state = SessionState::Listening;
        info!("State transition: Idle → Listening");

        Ok(())
    }

    /// Latest results and state. Never blocks on session activity.
    pub fn poll_latest(&self) -> PollSnapshot {
        let inner = self.shared.inner.lock();
        let running_dropped = inner
            .run
            .as_ref()
            .map(|run| run.utterances.dropped())
            .unwrap_or(0);

        PollSnapshot {
            state: inner.state,
            last_transcript: inner.last_transcript.clone(),
            last_response_text: inner.last_response_text.clone(),
            last_failure: inner.last_failure.clone(),
            fault: inner.fault.clone(),
            turns: inner.history.len(),
            dropped_utterances: inner.dropped_total + running_dropped,
        }
    }

    pub fn history(&self) -> Vec<ConversationTurn> {
        self.shared.inner.lock().history.clone()
    }

    pub fn clear_history(&self) {
        let mut inner = self.shared.inner.lock();
        info!("Clearing {} conversation turns", inner.history.len());
        inner.history.clear();
    }

    /// Ends the given generation only, so a late auto-stop cannot end a
    /// newer session.
    async fn stop_generation(&self, generation: u64) {
        let _lifecycle = self.shared.lifecycle.lock().await;
        self.stop_locked(Some(generation)).await;
    }

    /// Stops the current run, or only the `expected` generation. Caller
    /// holds the lifecycle lock.
    async fn stop_locked(&self, expected: Option<u64>) {
        let run = {
            let mut inner = self.shared.inner.lock();
            let current = inner.run.as_ref().map(|run| run.generation);
            match (current, expected) {
                (None, _) => return,
                (Some(current), Some(expected)) if current != expected => return,
                _ => {}
            }
            info!("State transition: {:?} → Stopping", inner.state);
            inner.state = SessionState::Stopping;
            inner.run.take()
        };
        let Some(mut run) = run else {
            return;
        };

        run.shutdown.cancel();

        if let Some(capture) = run.capture.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || capture.stop()).await {
                error!("Failed to stop capture: {}", e);
            }
        }

        for task in run.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Session task failed: {}", e);
            }
        }

        let mut inner = self.shared.inner.lock();
        inner.dropped_total += run.utterances.dropped();
        inner.state = SessionState::Idle;
        info!("State transition: Stopping → Idle");
    }
}

/// Reads frames, classifies them and hands finished utterances to the
/// dispatch queue. A partial utterance is discarded on shutdown.
async fn run_segmentation(
    mut frames: mpsc::Receiver<CaptureEvent>,
    classifier: Arc<dyn VoiceClassifier>,
    mut detector: SpeechDetector,
    utterances: Arc<BoundedQueue<Utterance>>,
    faults: mpsc::UnboundedSender<DeviceError>,
    shutdown: CancellationToken,
) {
    info!("Segmentation started");

    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = frames.recv() => event,
        };

        match event {
            Some(CaptureEvent::Frame(frame)) => {
                let score = score_frame(classifier.as_ref(), &frame);
                let Some(utterance) = detector.process(frame, score.probability) else {
                    continue;
                };

                let id = utterance.id();
                match utterances.push(utterance) {
                    Ok(None) => debug!("Queued utterance {} ({} waiting)", id, utterances.len()),
                    Ok(Some(evicted)) => warn!(
                        "Utterance queue full, dropped oldest utterance {}",
                        evicted.id()
                    ),
                    Err(_) => {
                        warn!("Utterance queue closed, discarding utterance {}", id);
                        break;
                    }
                }
            }
            Some(CaptureEvent::Failed(e)) => {
                error!("Capture failed: {}", e);
                let _ = faults.send(e);
                break;
            }
            None => {
                if !shutdown.is_cancelled() {
                    error!("Capture ended unexpectedly");
                    let _ = faults.send(DeviceError::Disconnected);
                }
                break;
            }
        }
    }

    if detector.is_speaking() {
        info!("Discarding partial utterance");
    }
    detector.reset();
    utterances.close();
    info!("Segmentation stopped");
}

/// Drains results into the session, tracks the worker's busy flag, and
/// ends the run on a device fault or when the conversation runs too long.
async fn supervise(
    shared: Weak<Shared>,
    generation: u64,
    results: Arc<BoundedQueue<ResultEnvelope>>,
    mut busy: watch::Receiver<bool>,
    mut faults: mpsc::UnboundedReceiver<DeviceError>,
    shutdown: CancellationToken,
    max_duration: Duration,
) {
    let deadline = tokio::time::sleep(max_duration);
    tokio::pin!(deadline);

    let mut busy_open = true;
    let mut faults_open = true;
    let mut stopping = false;

    loop {
        tokio::select! {
            biased;
            fault = faults.recv(), if faults_open && !stopping => match fault {
                Some(e) => {
                    stopping = true;
                    fail_run(&shared, generation, &shutdown, e);
                }
                None => faults_open = false,
            },
            envelope = results.pop() => match envelope {
                Some(envelope) => apply_envelope(&shared, envelope),
                None => {
                    // A failing device closes the pipeline behind its fault.
                    if !stopping {
                        if let Ok(e) = faults.try_recv() {
                            fail_run(&shared, generation, &shutdown, e);
                        }
                    }
                    break;
                }
            },
            changed = busy.changed(), if busy_open => match changed {
                Ok(()) => {
                    let is_busy = *busy.borrow_and_update();
                    set_activity(&shared, generation, is_busy);
                }
                Err(_) => busy_open = false,
            },
            _ = &mut deadline, if !stopping => {
                info!(
                    "Conversation reached its maximum duration of {}s",
                    max_duration.as_secs()
                );
                stopping = true;
                request_stop(&shared, generation, &shutdown);
            }
        }
    }

    debug!("Supervisor for session {} exited", generation);
}

/// Records a device fault and ends the run. The fault is set and the run
/// cancelled under one lock, so `toggle` never sees a faulted run as live.
fn fail_run(
    shared: &Weak<Shared>,
    generation: u64,
    shutdown: &CancellationToken,
    fault: DeviceError,
) {
    error!("Device fault, ending session: {}", fault);
    if let Some(shared) = shared.upgrade() {
        let mut inner = shared.inner.lock();
        inner.fault = Some(fault.to_string());
        shutdown.cancel();
    }
    request_stop(shared, generation, shutdown);
}

fn apply_envelope(shared: &Weak<Shared>, envelope: ResultEnvelope) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let mut inner = shared.inner.lock();

    match envelope {
        ResultEnvelope::Success(turn) => {
            inner.last_transcript = Some(turn.transcript.clone());
            inner.last_response_text = Some(turn.response_text.clone());
            inner.last_failure = None;
            inner.history.push(turn);
        }
        ResultEnvelope::Failure(failure) => {
            inner.last_failure = Some(failure);
        }
    }
}

fn set_activity(shared: &Weak<Shared>, generation: u64, busy: bool) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let mut inner = shared.inner.lock();

    let current = inner.run.as_ref().map(|run| run.generation);
    if current != Some(generation) || !inner.state.is_running() {
        return;
    }

    let next = if busy {
        SessionState::ProcessingOne
    } else {
        SessionState::Listening
    };
    if inner.state != next {
        debug!("State transition: {:?} → {:?}", inner.state, next);
        inner.state = next;
    }
}

/// Cancels the run right away and finishes the stop on a separate task, since
/// stopping waits for this supervisor to exit.
fn request_stop(shared: &Weak<Shared>, generation: u64, shutdown: &CancellationToken) {
    shutdown.cancel();

    if let Some(shared) = shared.upgrade() {
        let session = Session { shared };
        tokio::spawn(async move {
            session.stop_generation(generation).await;
        });
    }
}
