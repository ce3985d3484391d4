mod common;

use common::{
    one_utterance, test_config, utterances, wait_for, AfterScript, FirstSampleClassifier,
    RecordingPlayback, Reply, Script, ScriptedPipeline, ScriptedSource,
};
use parleyd::config::Config;
use parleyd::error::{DeviceError, PipelineError, SessionError};
use parleyd::session::{Session, SessionDeps};
use shared::{FailureKind, SessionState};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

struct Fixture {
    session: Session,
    source: Arc<ScriptedSource>,
    pipeline: Arc<ScriptedPipeline>,
    playback: Arc<RecordingPlayback>,
}

fn fixture(config: Config, source: ScriptedSource, pipeline: ScriptedPipeline) -> Fixture {
    let source = Arc::new(source);
    let pipeline = Arc::new(pipeline);
    let playback = Arc::new(RecordingPlayback::default());

    let deps = SessionDeps {
        source: source.clone(),
        classifier: Arc::new(FirstSampleClassifier),
        pipeline: pipeline.clone(),
        playback: Some(playback.clone()),
    };

    Fixture {
        session: Session::new(config, deps),
        source,
        pipeline,
        playback,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_twice_opens_device_once() {
    let f = fixture(
        test_config(),
        ScriptedSource::new(vec![Script::hold(vec![0.1; 5])]),
        ScriptedPipeline::default(),
    );

    f.session.start().await.unwrap();
    f.session.start().await.unwrap();

    assert_eq!(f.session.state(), SessionState::Listening);
    assert_eq!(f.source.opens(), 1);

    f.session.stop().await;
    assert_eq!(f.session.state(), SessionState::Idle);

    // Stopping an idle session is a no-op.
    f.session.stop().await;
    assert_eq!(f.session.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_silence_produces_no_dispatch() {
    let f = fixture(
        test_config(),
        ScriptedSource::new(vec![Script::hold(vec![0.1; 40])]),
        ScriptedPipeline::default(),
    );

    f.session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(f.pipeline.calls().is_empty());
    assert_eq!(f.session.poll_latest().turns, 0);

    f.session.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_utterance_becomes_turn_and_is_played() {
    let f = fixture(
        test_config(),
        ScriptedSource::new(vec![Script::hold(one_utterance())]),
        ScriptedPipeline::new(vec![Reply::with_audio(
            "what is a derivative",
            vec![7, 7, 7],
        )]),
    );

    f.session.start().await.unwrap();
    assert!(wait_for(WAIT, || f.session.poll_latest().turns == 1).await);

    let snapshot = f.session.poll_latest();
    assert_eq!(
        snapshot.last_transcript.as_deref(),
        Some("what is a derivative")
    );
    assert_eq!(
        snapshot.last_response_text.as_deref(),
        Some("answer to what is a derivative")
    );
    assert!(snapshot.last_failure.is_none());

    assert!(wait_for(WAIT, || f.playback.played().len() == 1).await);
    assert_eq!(f.playback.played()[0].bytes(), &[7, 7, 7]);

    let history = f.session.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].utterance_id, 1);
    assert_eq!(f.pipeline.calls(), vec![1]);

    f.session.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_first_dispatch_keeps_order() {
    let f = fixture(
        test_config(),
        ScriptedSource::new(vec![Script::hold(utterances(2))]),
        ScriptedPipeline::new(vec![
            Reply::answer("first", Duration::from_millis(400)),
            Reply::answer("second", Duration::ZERO),
        ]),
    );

    f.session.start().await.unwrap();

    assert!(wait_for(WAIT, || f.session.state() == SessionState::ProcessingOne).await);
    assert!(wait_for(WAIT, || f.session.poll_latest().turns == 2).await);
    assert!(wait_for(WAIT, || f.session.state() == SessionState::Listening).await);

    let transcripts: Vec<String> = f
        .session
        .history()
        .into_iter()
        .map(|turn| turn.transcript)
        .collect();
    assert_eq!(transcripts, vec!["first", "second"]);
    assert_eq!(f.pipeline.calls(), vec![1, 2]);
    assert_eq!(f.pipeline.max_in_flight(), 1);

    f.session.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_dispatch_does_not_block_next() {
    let f = fixture(
        test_config(),
        ScriptedSource::new(vec![Script::hold(utterances(2))]),
        ScriptedPipeline::new(vec![
            Reply::fail(PipelineError::Transport("connection refused".into())),
            Reply::answer("second try", Duration::ZERO),
        ]),
    );

    f.session.start().await.unwrap();
    assert!(wait_for(WAIT, || f.session.poll_latest().turns == 1).await);

    let history = f.session.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].utterance_id, 2);
    assert_eq!(history[0].transcript, "second try");
    assert_eq!(f.pipeline.calls(), vec![1, 2]);
    assert!(f.session.state().is_running());

    f.session.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_pipeline_does_not_wedge_session() {
    let f = fixture(
        test_config(),
        ScriptedSource::new(vec![Script::hold(utterances(2))]),
        ScriptedPipeline::new(vec![Reply::panic()]),
    );

    f.session.start().await.unwrap();
    assert!(wait_for(WAIT, || f.session.poll_latest().turns == 1).await);

    assert_eq!(f.pipeline.calls(), vec![1, 2]);
    assert_eq!(f.session.history()[0].utterance_id, 2);
    assert!(wait_for(WAIT, || f.session.state() == SessionState::Listening).await);

    let started = Instant::now();
    f.session.stop().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(f.session.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panic_failure_is_reported() {
    let f = fixture(
        test_config(),
        ScriptedSource::new(vec![Script::hold(one_utterance())]),
        ScriptedPipeline::new(vec![Reply::panic()]),
    );

    f.session.start().await.unwrap();
    assert!(wait_for(WAIT, || f.session.poll_latest().last_failure.is_some()).await);

    let failure = f.session.poll_latest().last_failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Internal);
    assert_eq!(failure.utterance_id, 1);

    f.session.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failure_is_visible_in_snapshot() {
    let f = fixture(
        test_config(),
        ScriptedSource::new(vec![Script::hold(one_utterance())]),
        ScriptedPipeline::new(vec![Reply::answer("[BLANK_AUDIO]", Duration::ZERO)]),
    );

    f.session.start().await.unwrap();
    assert!(wait_for(WAIT, || f.session.poll_latest().last_failure.is_some()).await);

    let snapshot = f.session.poll_latest();
    let failure = snapshot.last_failure.unwrap();
    assert_eq!(failure.kind, FailureKind::EmptyTranscript);
    assert_eq!(failure.utterance_id, 1);
    assert_eq!(snapshot.turns, 0);
    assert!(snapshot.state.is_running());
    assert!(f.playback.played().is_empty());

    f.session.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_finishes_in_flight_dispatch_and_restarts_clean() {
    let f = fixture(
        test_config(),
        ScriptedSource::new(vec![
            Script::hold(utterances(3)),
            Script::hold(vec![0.1; 20]),
        ]),
        ScriptedPipeline::new(vec![Reply::answer("slow", Duration::from_millis(800))]),
    );

    f.session.start().await.unwrap();
    assert!(wait_for(WAIT, || f.pipeline.calls().len() == 1).await);

    // Let the remaining utterances queue up behind the slow one.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let started = Instant::now();
    f.session.stop().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(f.session.state(), SessionState::Idle);

    // The in-flight dispatch completed; the queued ones were discarded.
    assert_eq!(f.session.poll_latest().turns, 1);
    assert_eq!(f.pipeline.calls(), vec![1]);

    f.session.start().await.unwrap();
    assert_eq!(f.source.opens(), 2);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(f.pipeline.calls(), vec![1]);
    assert_eq!(f.session.history().len(), 1);

    f.session.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queue_overflow_drops_oldest() {
    let mut config = test_config();
    config.conversation.max_queue_depth = 1;

    let f = fixture(
        config,
        ScriptedSource::new(vec![Script::hold(utterances(4))]),
        ScriptedPipeline::new(vec![Reply::answer("first", Duration::from_millis(1500))]),
    );

    f.session.start().await.unwrap();
    assert!(wait_for(WAIT, || f.pipeline.calls().len() == 2).await);
    assert!(wait_for(WAIT, || f.session.poll_latest().turns == 2).await);

    assert_eq!(f.pipeline.calls(), vec![1, 4]);
    assert_eq!(f.session.poll_latest().dropped_utterances, 2);

    f.session.stop().await;
    assert_eq!(f.session.poll_latest().dropped_utterances, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_device_error_stops_session() {
    let f = fixture(
        test_config(),
        ScriptedSource::new(vec![
            Script::then(vec![0.1; 5], AfterScript::Fail(DeviceError::Disconnected)),
            Script::hold(vec![]),
        ]),
        ScriptedPipeline::default(),
    );

    f.session.start().await.unwrap();
    assert!(wait_for(WAIT, || f.session.state() == SessionState::Idle).await);

    let snapshot = f.session.poll_latest();
    assert_eq!(snapshot.fault.as_deref(), Some("Audio device disconnected"));

    // A fresh start clears the fault.
    f.session.start().await.unwrap();
    assert_eq!(f.session.state(), SessionState::Listening);
    assert!(f.session.poll_latest().fault.is_none());

    f.session.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_toggle_after_device_fault_starts_fresh_session() {
    let f = fixture(
        test_config(),
        ScriptedSource::new(vec![
            Script::then(vec![0.1; 3], AfterScript::Fail(DeviceError::Disconnected)),
            Script::hold(vec![]),
        ]),
        ScriptedPipeline::default(),
    );

    f.session.start().await.unwrap();
    assert!(wait_for(WAIT, || f.session.poll_latest().fault.is_some()).await);

    // The faulted run may still be shutting down; toggle must still start.
    f.session.toggle().await.unwrap();
    assert_eq!(f.session.state(), SessionState::Listening);
    assert_eq!(f.source.opens(), 2);
    assert!(f.session.poll_latest().fault.is_none());

    f.session.stop().await;
    assert_eq!(f.session.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_closed_stream_stops_session() {
    let f = fixture(
        test_config(),
        ScriptedSource::new(vec![Script::then(vec![0.1; 3], AfterScript::Disconnect)]),
        ScriptedPipeline::default(),
    );

    f.session.start().await.unwrap();
    assert!(wait_for(WAIT, || f.session.state() == SessionState::Idle).await);
    assert!(f.session.poll_latest().fault.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_failure_leaves_session_idle() {
    let f = fixture(
        test_config(),
        ScriptedSource::failing(DeviceError::NoInputDevice),
        ScriptedPipeline::default(),
    );

    let result = f.session.start().await;
    assert!(matches!(
        result,
        Err(SessionError::Device(DeviceError::NoInputDevice))
    ));
    assert_eq!(f.session.state(), SessionState::Idle);
    assert_eq!(
        f.session.poll_latest().fault.as_deref(),
        Some("No input device found")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_max_conversation_duration_stops_session() {
    let mut config = test_config();
    config.conversation.max_conversation_duration_s = 1;

    let f = fixture(
        config,
        ScriptedSource::new(vec![Script::hold(vec![0.1; 5])]),
        ScriptedPipeline::default(),
    );

    f.session.start().await.unwrap();
    assert_eq!(f.session.state(), SessionState::Listening);
    assert!(wait_for(WAIT, || f.session.state() == SessionState::Idle).await);
    assert!(f.session.poll_latest().fault.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_toggle_and_clear_history() {
    let f = fixture(
        test_config(),
        ScriptedSource::new(vec![Script::hold(one_utterance())]),
        ScriptedPipeline::default(),
    );

    f.session.toggle().await.unwrap();
    assert!(f.session.state().is_running());
    assert!(wait_for(WAIT, || f.session.poll_latest().turns == 1).await);

    f.session.toggle().await.unwrap();
    assert_eq!(f.session.state(), SessionState::Idle);

    // History outlives the run until cleared.
    assert_eq!(f.session.history().len(), 1);
    f.session.clear_history();
    assert!(f.session.history().is_empty());
    assert_eq!(f.session.poll_latest().turns, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_playback_disabled_by_config() {
    let mut config = test_config();
    config.playback.enabled = false;

    let f = fixture(
        config,
        ScriptedSource::new(vec![Script::hold(one_utterance())]),
        ScriptedPipeline::new(vec![Reply::with_audio("hello", vec![1, 2])]),
    );

    f.session.start().await.unwrap();
    assert!(wait_for(WAIT, || f.session.poll_latest().turns == 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(f.playback.played().is_empty());

    f.session.stop().await;
}
