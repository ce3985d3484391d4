pub mod capture;
pub mod frame;
pub mod playback;
pub mod wav;

pub use capture::{AudioSource, CaptureHandle, CpalSource};
pub use frame::{AudioFrame, CaptureEvent, Framer};
pub use playback::{run_playback, PlaybackSink, RodioPlayback};
pub use wav::encode_wav;
