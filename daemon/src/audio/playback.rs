use rodio::{OutputStreamBuilder, Sink};
use shared::AudioClip;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DeviceError, PlaybackError};

/// Plays one synthesized reply.
pub trait PlaybackSink: Send + Sync {
    /// Blocks until the clip has finished playing or `cancel` fires.
    fn play(&self, clip: &AudioClip, cancel: &CancellationToken) -> Result<(), PlaybackError>;
}

const PLAYBACK_POLL: Duration = Duration::from_millis(20);

/// Default output device through rodio. The output stream is opened per
/// clip and released as soon as the clip ends.
#[derive(Debug, Default)]
pub struct RodioPlayback;

impl RodioPlayback {
    pub fn new() -> Self {
        Self
    }
}

impl PlaybackSink for RodioPlayback {
    fn play(&self, clip: &AudioClip, cancel: &CancellationToken) -> Result<(), PlaybackError> {
        if clip.is_empty() {
            warn!("No response audio to play");
            return Ok(());
        }

        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| DeviceError::Stream(format!("failed to open output stream: {}", e)))?;
        let sink = Sink::connect_new(stream.mixer());

        let decoder = rodio::Decoder::new(Cursor::new(clip.bytes().to_vec()))
            .map_err(|e| PlaybackError::Decode(e.to_string()))?;

        sink.append(decoder);
        while !sink.empty() {
            if cancel.is_cancelled() {
                debug!("Playback interrupted");
                sink.stop();
                break;
            }
            std::thread::sleep(PLAYBACK_POLL);
        }
        Ok(())
    }
}

/// Plays queued clips one at a time until the queue closes or the session
/// is cancelled. Device failures are reported on `faults` and end the loop.
pub async fn run_playback(
    sink: Arc<dyn PlaybackSink>,
    mut clips: mpsc::Receiver<AudioClip>,
    faults: mpsc::UnboundedSender<DeviceError>,
    shutdown: CancellationToken,
) {
    info!("Playback loop started");

    loop {
        let clip = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            clip = clips.recv() => match clip {
                Some(clip) => clip,
                None => break,
            },
        };

        debug!("Playing response audio ({} bytes)", clip.len());
        let sink = Arc::clone(&sink);
        let cancel = shutdown.clone();
        let result = tokio::task::spawn_blocking(move || sink.play(&clip, &cancel)).await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(PlaybackError::Decode(reason))) => {
                warn!("Skipping response audio that could not be decoded: {}", reason);
            }
            Ok(Err(PlaybackError::Device(e))) => {
                error!("Playback device failed: {}", e);
                let _ = faults.send(e);
                break;
            }
            Err(e) => {
                error!("Playback task failed: {}", e);
                break;
            }
        }
    }

    info!("Playback loop stopped");
}
