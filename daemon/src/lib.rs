pub mod audio;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod rate_limit;
pub mod server;
pub mod session;
pub mod vad;

pub use audio::{AudioFrame, AudioSource, CaptureHandle, CpalSource, PlaybackSink, RodioPlayback};
pub use config::{load_config, Config};
pub use error::{ClassifierError, DeviceError, PipelineError, PlaybackError, SessionError};
pub use pipeline::{HttpPipeline, Pipeline, PipelineRequest, PipelineResponse};
pub use rate_limit::CommandRateLimiter;
pub use server::DaemonServer;
pub use session::{Session, SessionDeps};
pub use vad::{EnergyClassifier, SpeechDetector, VoiceClassifier};
