use tracing::{debug, info, warn};

use crate::audio::AudioFrame;
use crate::error::ClassifierError;

/// Scores one frame with the probability that it contains speech.
///
/// Implementations must be pure per call: the same frame always yields the
/// same score, and no state carries over between frames.
pub trait VoiceClassifier: Send + Sync {
    fn score(&self, frame: &AudioFrame) -> Result<f32, ClassifierError>;
}

/// Speech probability for a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechScore {
    pub probability: f32,
    pub frame_seq: u64,
}

/// Runs the classifier on `frame`, scoring failures as silence.
pub fn score_frame(classifier: &dyn VoiceClassifier, frame: &AudioFrame) -> SpeechScore {
    let probability = match classifier.score(frame) {
        Ok(p) if p.is_finite() => p.clamp(0.0, 1.0),
        Ok(p) => {
            warn!("Classifier returned {} for frame {}, treating as silence", p, frame.seq());
            0.0
        }
        Err(e) => {
            warn!("Classifier failed on frame {}: {}", frame.seq(), e);
            0.0
        }
    };

    SpeechScore {
        probability,
        frame_seq: frame.seq(),
    }
}

/// Energy-based classifier. Maps the RMS level of a frame onto [0, 1] so
/// that a level equal to `reference` scores exactly 0.5.
pub struct EnergyClassifier {
    reference: f32,
}

impl EnergyClassifier {
    pub fn new(reference: f32) -> Self {
        info!("Energy classifier initialized with reference level: {}", reference);

        Self { reference }
    }

    pub fn calculate_audio_level(&self, samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }

        let sum: f32 = samples.iter().map(|s| s * s).sum();
        (sum / samples.len() as f32).sqrt()
    }
}

impl VoiceClassifier for EnergyClassifier {
    fn score(&self, frame: &AudioFrame) -> Result<f32, ClassifierError> {
        let samples = frame.samples();
        if samples.is_empty() {
            return Err(ClassifierError::EmptyFrame);
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(ClassifierError::NonFinite);
        }

        let level = self.calculate_audio_level(samples);
        let probability = level / (level + self.reference);

        debug!(
            "Frame {}: level {:.4}, speech probability {:.3}",
            frame.seq(),
            level,
            probability
        );

        Ok(probability)
    }
}
