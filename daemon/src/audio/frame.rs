use crate::error::DeviceError;

/// Fixed-duration block of mono PCM captured from the input device.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    seq: u64,
    start_ms: u64,
    sample_rate: u32,
    samples: Vec<f32>,
}

impl AudioFrame {
    pub fn new(seq: u64, start_ms: u64, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            seq,
            start_ms,
            sample_rate,
            samples,
        }
    }

    /// Monotonic capture sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Offset from the start of capture.
    pub fn start_ms(&self) -> u64 {
        self.start_ms
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// What the capture context hands to segmentation.
#[derive(Debug)]
pub enum CaptureEvent {
    Frame(AudioFrame),
    Failed(DeviceError),
}

/// Re-blocks device callbacks of arbitrary size into fixed-duration mono frames.
pub struct Framer {
    sample_rate: u32,
    channels: usize,
    gain: f32,
    frame_samples: usize,
    frame_ms: u64,
    pending: Vec<f32>,
    next_seq: u64,
}

impl Framer {
    pub fn new(sample_rate: u32, channels: u16, frame_ms: u32, gain: f32) -> Self {
        let frame_samples = ((sample_rate as u64 * frame_ms as u64) / 1000).max(1) as usize;

        Self {
            sample_rate,
            channels: channels.max(1) as usize,
            gain,
            frame_samples,
            frame_ms: frame_ms as u64,
            pending: Vec::with_capacity(frame_samples),
            next_seq: 0,
        }
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Feed interleaved samples; returns every frame completed by this chunk.
    pub fn push(&mut self, interleaved: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();

        for chunk in interleaved.chunks(self.channels) {
            let mono = chunk.iter().sum::<f32>() / chunk.len() as f32;
            self.pending.push((mono * self.gain).clamp(-1.0, 1.0));

            if self.pending.len() == self.frame_samples {
                let samples =
                    std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_samples));
                let seq = self.next_seq;
                self.next_seq += 1;
                frames.push(AudioFrame::new(
                    seq,
                    seq * self.frame_ms,
                    self.sample_rate,
                    samples,
                ));
            }
        }

        frames
    }
}
