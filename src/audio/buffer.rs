use super::pcm;

/// Cuts a continuous 16kHz mono stream into fixed-size PCM frames.
pub struct FrameAccumulator {
    buffer: Vec<f32>,
    frame_size: usize,
}

impl FrameAccumulator {
    #[must_use]
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            buffer: Vec::with_capacity(frame_size),
            frame_size,
        }
    }

    /// Feed samples and return any complete frames, oldest first.
    pub fn feed(&mut self, samples: &[f32]) -> Vec<Vec<i16>> {
        self.buffer.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.buffer.len() >= self.frame_size {
            frames.push(pcm::f32_to_i16_block(&self.buffer[..self.frame_size]));
            self.buffer.drain(..self.frame_size);
        }

        frames
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
