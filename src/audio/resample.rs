use audioadapter_buffers::direct::SequentialSliceOfVecs;
use rubato::audioadapter::Adapter;
use rubato::{Fft, FixedSync, Resampler as RubatoResampler};

use crate::error::{LivevoxError, Result};

/// Mixes interleaved multi-channel audio down to mono and resamples it to a
/// fixed target rate.
pub struct Resampler {
    inner: Option<Fft<f32>>,
    channels: u16,
    input_buf: Vec<f32>,
}

impl Resampler {
    pub fn new(source_rate: u32, channels: u16, target_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(LivevoxError::Resample(
                "input reports zero channels".to_string(),
            ));
        }

        let inner = if source_rate == target_rate {
            None
        } else {
            Some(
                Fft::new(
                    source_rate as usize,
                    target_rate as usize,
                    1024,
                    2, // sub_chunks
                    1, // output is always mono
                    FixedSync::Input,
                )
                .map_err(|e| LivevoxError::Resample(format!("failed to create resampler: {e}")))?,
            )
        };

        Ok(Self {
            inner,
            channels,
            input_buf: Vec::new(),
        })
    }

    /// Process interleaved samples. Output may lag input by up to one
    /// resampler chunk while the FFT fills.
    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        let mono = if self.channels == 1 {
            interleaved.to_vec()
        } else {
            let ch = self.channels as usize;
            interleaved
                .chunks_exact(ch)
                .map(|frame| frame.iter().sum::<f32>() / ch as f32)
                .collect()
        };

        let Some(ref mut resampler) = self.inner else {
            return Ok(mono);
        };

        self.input_buf.extend_from_slice(&mono);

        let mut output = Vec::new();
        let frames_needed = resampler.input_frames_next();

        while self.input_buf.len() >= frames_needed {
            let chunk: Vec<f32> = self.input_buf.drain(..frames_needed).collect();
            let input_data = vec![chunk];
            let input = SequentialSliceOfVecs::new(&input_data, 1, frames_needed)
                .map_err(|e| LivevoxError::Resample(format!("buffer error: {e}")))?;
            let result = resampler
                .process(&input, 0, None)
                .map_err(|e| LivevoxError::Resample(format!("resample error: {e}")))?;
            for frame in 0..result.frames() {
                output.push(result.read_sample(0, frame).unwrap_or(0.0));
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_at_target_rate() {
        let mut r = Resampler::new(16000, 1, 16000).unwrap_or_else(|e| panic!("{e}"));
        let input: Vec<f32> = (0..1600).map(|i| (i as f32 / 1600.0).sin()).collect();
        let output = r.process(&input).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(output, input);
    }

    #[test]
    fn stereo_to_mono() {
        let mut r = Resampler::new(16000, 2, 16000).unwrap_or_else(|e| panic!("{e}"));
        let input = vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        let output = r.process(&input).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(output, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn downsample_shrinks_output() {
        let mut r = Resampler::new(48000, 1, 16000).unwrap_or_else(|e| panic!("{e}"));
        let input = vec![0.0f32; 48000];
        let output = r.process(&input).unwrap_or_else(|e| panic!("{e}"));
        // One second in; roughly a third of the samples out, less FFT latency.
        assert!(output.len() <= 16000);
        assert!(output.len() > 12000);
    }

    #[test]
    fn zero_channels_rejected() {
        assert!(Resampler::new(16000, 0, 16000).is_err());
    }
}
