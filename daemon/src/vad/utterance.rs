use crate::audio::AudioFrame;

/// Why an utterance was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    /// Trailing silence reached the configured minimum.
    Silence,
    /// The utterance hit the maximum duration.
    MaxDuration,
}

/// Frames of an utterance that is still being recorded.
///
/// Owned by the segmentation state machine. Consuming it with
/// [`UtteranceBuffer::finalize`] is the only way to obtain an [`Utterance`].
#[derive(Debug)]
pub struct UtteranceBuffer {
    id: u64,
    frames: Vec<AudioFrame>,
    lead_in_frames: usize,
    trailing_frames: usize,
    speech_ms: u64,
    silence_ms: u64,
    duration_ms: u64,
}

impl UtteranceBuffer {
    pub fn new(id: u64, lead_in: Vec<AudioFrame>) -> Self {
        let duration_ms = lead_in.iter().map(AudioFrame::duration_ms).sum();

        Self {
            id,
            lead_in_frames: lead_in.len(),
            frames: lead_in,
            trailing_frames: 0,
            speech_ms: 0,
            silence_ms: 0,
            duration_ms,
        }
    }

    pub fn push_speech(&mut self, frame: AudioFrame) {
        let ms = frame.duration_ms();
        self.speech_ms += ms;
        self.duration_ms += ms;
        self.silence_ms = 0;
        self.trailing_frames = 0;
        self.frames.push(frame);
    }

    pub fn push_silence(&mut self, frame: AudioFrame) {
        let ms = frame.duration_ms();
        self.silence_ms += ms;
        self.duration_ms += ms;
        self.trailing_frames += 1;
        self.frames.push(frame);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Contiguous silence at the end of the buffer.
    pub fn silence_ms(&self) -> u64 {
        self.silence_ms
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn finalize(self, reason: FinalizeReason) -> Utterance {
        Utterance {
            id: self.id,
            frames: self.frames,
            lead_in_frames: self.lead_in_frames,
            trailing_frames: self.trailing_frames,
            speech_ms: self.speech_ms,
            duration_ms: self.duration_ms,
            reason,
        }
    }
}

/// A completed utterance, ready for dispatch. Read-only.
#[derive(Debug)]
pub struct Utterance {
    id: u64,
    frames: Vec<AudioFrame>,
    lead_in_frames: usize,
    trailing_frames: usize,
    speech_ms: u64,
    duration_ms: u64,
    reason: FinalizeReason,
}

impl Utterance {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Capture offset of the first frame, lead-in included.
    pub fn start_ms(&self) -> u64 {
        self.frames.first().map(AudioFrame::start_ms).unwrap_or(0)
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Above-threshold time, accumulated across pauses.
    pub fn speech_ms(&self) -> u64 {
        self.speech_ms
    }

    pub fn lead_in_frames(&self) -> usize {
        self.lead_in_frames
    }

    pub fn trailing_frames(&self) -> usize {
        self.trailing_frames
    }

    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    pub fn sample_rate(&self) -> u32 {
        self.frames.first().map(AudioFrame::sample_rate).unwrap_or(0)
    }

    pub fn reason(&self) -> FinalizeReason {
        self.reason
    }

    /// All samples in capture order.
    pub fn samples(&self) -> Vec<f32> {
        let total = self.frames.iter().map(|f| f.samples().len()).sum();
        let mut samples = Vec::with_capacity(total);
        for frame in &self.frames {
            samples.extend_from_slice(frame.samples());
        }
        samples
    }
}
