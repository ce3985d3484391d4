pub mod detector;
pub mod speech_detector;
pub mod utterance;

pub use detector::{score_frame, EnergyClassifier, SpeechScore, VoiceClassifier};
pub use speech_detector::{SegmentationConfig, SpeechDetector, SpeechState};
pub use utterance::{FinalizeReason, Utterance, UtteranceBuffer};
