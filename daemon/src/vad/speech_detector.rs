use std::collections::VecDeque;
use tracing::{debug, info};

use super::utterance::{FinalizeReason, Utterance, UtteranceBuffer};
use crate::audio::AudioFrame;
use crate::config::VadConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechState {
    Silence,
    Speaking,
    TrailingSilence,
}

/// Thresholds driving segmentation.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationConfig {
    pub threshold: f32,
    pub min_speech_ms: u64,
    pub min_silence_ms: u64,
    pub speech_pad_ms: u64,
    pub max_utterance_ms: u64,
}

impl From<&VadConfig> for SegmentationConfig {
    fn from(vad: &VadConfig) -> Self {
        Self {
            threshold: vad.threshold,
            min_speech_ms: vad.min_speech_duration_ms as u64,
            min_silence_ms: vad.min_silence_duration_ms as u64,
            speech_pad_ms: vad.speech_pad_ms as u64,
            max_utterance_ms: vad.max_utterance_duration_ms as u64,
        }
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self::from(&VadConfig::default())
    }
}

/// Turns a stream of scored frames into utterances.
///
/// Speech has to persist for `min_speech_ms` before an utterance opens, and
/// silence for `min_silence_ms` before it closes, so a single frame crossing
/// the threshold never changes state.
pub struct SpeechDetector {
    config: SegmentationConfig,
    state: SpeechState,
    lead_in: VecDeque<AudioFrame>,
    lead_in_ms: u64,
    onset: Vec<AudioFrame>,
    onset_ms: u64,
    current: Option<UtteranceBuffer>,
    next_id: u64,
}

impl SpeechDetector {
    pub fn new(config: SegmentationConfig) -> Self {
        info!(
            "SpeechDetector initialized: threshold={:.2}, min_speech={}ms, min_silence={}ms, pad={}ms",
            config.threshold, config.min_speech_ms, config.min_silence_ms, config.speech_pad_ms
        );

        Self {
            config,
            state: SpeechState::Silence,
            lead_in: VecDeque::new(),
            lead_in_ms: 0,
            onset: Vec::new(),
            onset_ms: 0,
            current: None,
            next_id: 1,
        }
    }

    pub fn state(&self) -> SpeechState {
        self.state
    }

    pub fn is_speaking(&self) -> bool {
        self.state != SpeechState::Silence
    }

    /// Feed one frame and its speech score. Returns an utterance when this
    /// frame completes one.
    pub fn process(&mut self, frame: AudioFrame, score: f32) -> Option<Utterance> {
        let is_speech = score > self.config.threshold;

        match self.state {
            SpeechState::Silence => {
                if is_speech {
                    self.onset_ms += frame.duration_ms();
                    self.onset.push(frame);

                    if self.onset_ms >= self.config.min_speech_ms {
                        self.open_utterance();
                        info!("State transition: Silence → Speaking");
                        return self.check_max_duration();
                    }
                } else {
                    self.abandon_onset();
                    self.push_lead_in(frame);
                }
                None
            }
            SpeechState::Speaking | SpeechState::TrailingSilence => {
                let buffer = self.current.as_mut()?;

                if is_speech {
                    buffer.push_speech(frame);
                    if self.state == SpeechState::TrailingSilence {
                        info!("State transition: TrailingSilence → Speaking (pause)");
                        self.state = SpeechState::Speaking;
                    }
                } else {
                    buffer.push_silence(frame);
                    if self.state == SpeechState::Speaking {
                        debug!(
                            "State transition: Speaking → TrailingSilence, waiting {}ms",
                            self.config.min_silence_ms
                        );
                        self.state = SpeechState::TrailingSilence;
                    }
                    if buffer.silence_ms() >= self.config.min_silence_ms {
                        info!("State transition: TrailingSilence → Silence");
                        return self.close_utterance(FinalizeReason::Silence);
                    }
                }

                self.check_max_duration()
            }
        }
    }

    /// Drop any partial utterance and buffered lead-in.
    pub fn reset(&mut self) {
        if let Some(buffer) = self.current.take() {
            debug!(
                "Discarding in-flight utterance {} ({}ms)",
                buffer.id(),
                buffer.duration_ms()
            );
        }
        self.state = SpeechState::Silence;
        self.lead_in.clear();
        self.lead_in_ms = 0;
        self.onset.clear();
        self.onset_ms = 0;
    }

    fn open_utterance(&mut self) {
        let lead_in: Vec<AudioFrame> = self.lead_in.drain(..).collect();
        self.lead_in_ms = 0;

        let mut buffer = UtteranceBuffer::new(self.next_id, lead_in);
        self.next_id += 1;

        for frame in self.onset.drain(..) {
            buffer.push_speech(frame);
        }
        self.onset_ms = 0;

        self.current = Some(buffer);
        self.state = SpeechState::Speaking;
    }

    fn check_max_duration(&mut self) -> Option<Utterance> {
        let reached = self
            .current
            .as_ref()
            .map(|b| b.duration_ms() >= self.config.max_utterance_ms)
            .unwrap_or(false);

        if reached {
            info!(
                "Utterance reached maximum duration of {}ms",
                self.config.max_utterance_ms
            );
            return self.close_utterance(FinalizeReason::MaxDuration);
        }
        None
    }

    fn close_utterance(&mut self, reason: FinalizeReason) -> Option<Utterance> {
        let buffer = self.current.take()?;
        self.state = SpeechState::Silence;

        let utterance = buffer.finalize(reason);
        if utterance.duration_ms() < self.config.min_speech_ms {
            debug!(
                "Discarding utterance {}: {}ms is shorter than the minimum",
                utterance.id(),
                utterance.duration_ms()
            );
            return None;
        }

        info!(
            "Speech complete: utterance {} ({}ms, {}ms speech, {} frames)",
            utterance.id(),
            utterance.duration_ms(),
            utterance.speech_ms(),
            utterance.frames().len()
        );
        Some(utterance)
    }

    /// A speech run too short to open an utterance becomes lead-in material.
    fn abandon_onset(&mut self) {
        if self.onset.is_empty() {
            return;
        }
        self.onset_ms = 0;
        let frames: Vec<AudioFrame> = self.onset.drain(..).collect();
        for frame in frames {
            self.push_lead_in(frame);
        }
    }

    fn push_lead_in(&mut self, frame: AudioFrame) {
        self.lead_in_ms += frame.duration_ms();
        self.lead_in.push_back(frame);

        while self.lead_in_ms > self.config.speech_pad_ms {
            match self.lead_in.pop_front() {
                Some(oldest) => self.lead_in_ms -= oldest.duration_ms(),
                None => break,
            }
        }
    }
}
