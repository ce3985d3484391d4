use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::frame::{CaptureEvent, Framer};
use crate::config::AudioConfig;
use crate::error::DeviceError;

/// Something that can deliver captured frames into the frame queue.
pub trait AudioSource: Send + Sync {
    /// Start capturing. Frames flow into `events` until the handle is stopped.
    fn open(&self, events: mpsc::Sender<CaptureEvent>) -> Result<CaptureHandle, DeviceError>;
}

/// Owns the capture thread. Stopping is cooperative: the thread sees the
/// signal at its next checkpoint and releases the device.
pub struct CaptureHandle {
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn spawn<F>(name: &str, body: F) -> Result<Self, DeviceError>
    where
        F: FnOnce(std_mpsc::Receiver<()>) + Send + 'static,
    {
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(stop_rx))
            .map_err(|e| DeviceError::Stream(format!("failed to spawn capture thread: {}", e)))?;

        Ok(Self {
            stop_tx,
            thread: Some(thread),
        })
    }

    /// Signal the capture thread and wait for it to release the device.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// Microphone capture through cpal.
///
/// The cpal stream is created and dropped on a dedicated thread so it never
/// has to cross threads.
pub struct CpalSource {
    config: AudioConfig,
}

impl CpalSource {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }
}

impl AudioSource for CpalSource {
    fn open(&self, events: mpsc::Sender<CaptureEvent>) -> Result<CaptureHandle, DeviceError> {
        let config = self.config.clone();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), DeviceError>>();

        let handle = CaptureHandle::spawn("parley-capture", move |stop_rx| {
            let stream = match build_stream(&config, events) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(DeviceError::Stream(e.to_string())));
                return;
            }

            info!("Audio capture started");
            let _ = ready_tx.send(Ok(()));

            // Blocks until stop() or the handle is dropped.
            let _ = stop_rx.recv();
            drop(stream);
            info!("Audio capture stopped");
        })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DeviceError::Stream(
                "capture thread exited before the stream started".to_string(),
            )),
        }
    }
}

fn select_device(config: &AudioConfig) -> Result<Device, DeviceError> {
    let host = cpal::default_host();

    if config.device.is_empty() || config.device == "default" {
        return host
            .default_input_device()
            .ok_or(DeviceError::NoInputDevice);
    }

    let devices = host
        .input_devices()
        .map_err(|e| DeviceError::Stream(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == config.device).unwrap_or(false) {
            return Ok(device);
        }
    }

    warn!(
        "Input device '{}' not found, falling back to the default device",
        config.device
    );
    host.default_input_device()
        .ok_or(DeviceError::NoInputDevice)
}

fn build_stream(
    config: &AudioConfig,
    events: mpsc::Sender<CaptureEvent>,
) -> Result<Stream, DeviceError> {
    let device = select_device(config)?;
    info!(
        "Using input device: {}",
        device.name().unwrap_or_else(|_| "<unknown>".to_string())
    );
    info!(
        "Configuring audio stream: {}Hz, {} channel(s), {}ms frames",
        config.sample_rate, config.channels, config.frame_ms
    );

    let supported_configs = device
        .supported_input_configs()
        .map_err(|e| DeviceError::UnsupportedConfig(e.to_string()))?;

    let mut selected = None;
    for supported in supported_configs {
        debug!("Supported config: {:?}", supported);
        if supported.channels() == config.channels
            && supported.min_sample_rate().0 <= config.sample_rate
            && supported.max_sample_rate().0 >= config.sample_rate
        {
            selected = Some(supported.with_sample_rate(cpal::SampleRate(config.sample_rate)));
            break;
        }
    }

    let selected = selected.ok_or_else(|| {
        DeviceError::UnsupportedConfig(format!(
            "no input configuration with {} channel(s) at {}Hz",
            config.channels, config.sample_rate
        ))
    })?;

    let sample_format = selected.sample_format();
    let stream_config: StreamConfig = selected.into();
    let framer = Framer::new(
        config.sample_rate,
        config.channels,
        config.frame_ms,
        config.gain,
    );

    match sample_format {
        SampleFormat::F32 => build_input::<f32>(&device, &stream_config, framer, events),
        SampleFormat::I16 => build_input::<i16>(&device, &stream_config, framer, events),
        SampleFormat::U16 => build_input::<u16>(&device, &stream_config, framer, events),
        format => Err(DeviceError::UnsupportedConfig(format!(
            "unsupported sample format: {:?}",
            format
        ))),
    }
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    mut framer: Framer,
    events: mpsc::Sender<CaptureEvent>,
) -> Result<Stream, DeviceError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let error_events = events.clone();

    let error_callback = move |err: cpal::StreamError| {
        error!("Audio stream error: {}", err);
        report_stream_error(&error_events, err);
    };

    let data_callback = move |data: &[T], _: &cpal::InputCallbackInfo| {
        let converted: Vec<f32> = data.iter().map(|&s| s.to_sample::<f32>()).collect();
        for frame in framer.push(&converted) {
            match events.try_send(CaptureEvent::Frame(frame)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(CaptureEvent::Frame(frame))) => {
                    warn!("Frame queue full, dropped frame {}", frame.seq());
                }
                Err(_) => {}
            }
        }
    };

    device
        .build_input_stream(config, data_callback, error_callback, None)
        .map_err(|e| DeviceError::Stream(e.to_string()))
}

/// Hands a stream error to the session. Unlike frames, a fault is never
/// dropped on a full queue: this waits for room. Runs on a cpal thread,
/// outside the async runtime.
fn report_stream_error(events: &mpsc::Sender<CaptureEvent>, err: cpal::StreamError) {
    let device_error = match err {
        cpal::StreamError::DeviceNotAvailable => DeviceError::Disconnected,
        other => DeviceError::Stream(other.to_string()),
    };
    if events.blocking_send(CaptureEvent::Failed(device_error)).is_err() {
        debug!("Session gone, stream error not delivered");
    }
}
