use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::error::{LivevoxError, Result};

use super::InputStream;
use super::capture::input_channels;

/// Block length handed to the pipeline per tick.
const BLOCK_MILLIS: u64 = 100;

/// Plays a WAV file into a session as if it were spoken into the microphone,
/// paced in real time, then keeps the stream alive with silence so the
/// remote end can detect the end of the utterance and answer.
pub struct WavInput {
    samples: Option<Vec<f32>>,
    sample_rate: u32,
    channels: u16,
    sender: Option<Sender<Vec<f32>>>,
    receiver: Receiver<Vec<f32>>,
    failures: Receiver<String>,
    _failure_tx: Sender<String>,
    stop: Arc<AtomicBool>,
}

impl WavInput {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = hound::WavReader::open(path).map_err(|e| {
            LivevoxError::Device(format!("failed to open WAV file {}: {e}", path.display()))
        })?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| s.map_err(|e| LivevoxError::Audio(format!("WAV read error: {e}"))))
                .collect::<Result<Vec<f32>>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| {
                        s.map(|v| v as f32 / scale)
                            .map_err(|e| LivevoxError::Audio(format!("WAV read error: {e}")))
                    })
                    .collect::<Result<Vec<f32>>>()?
            }
        };

        tracing::info!(
            "loaded {}: {} Hz, {} channel(s), {:.1}s",
            path.display(),
            spec.sample_rate,
            spec.channels,
            samples.len() as f32 / (spec.sample_rate as f32 * f32::from(spec.channels.max(1)))
        );

        let ((tx, rx), (fail_tx, fail_rx)) = input_channels();

        Ok(Self {
            samples: Some(samples),
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            sender: Some(tx),
            receiver: rx,
            failures: fail_rx,
            _failure_tx: fail_tx,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl InputStream for WavInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn receiver(&self) -> Receiver<Vec<f32>> {
        self.receiver.clone()
    }

    fn failures(&self) -> Receiver<String> {
        self.failures.clone()
    }

    fn start(&mut self) -> Result<()> {
        let (Some(samples), Some(tx)) = (self.samples.take(), self.sender.take()) else {
            return Err(LivevoxError::Audio("WAV input already started".to_string()));
        };

        let block = (self.sample_rate as usize * self.channels as usize * BLOCK_MILLIS as usize)
            / 1000;
        let block = block.max(1);
        let stop = Arc::clone(&self.stop);

        std::thread::Builder::new()
            .name("livevox-wav".to_string())
            .spawn(move || {
                let silence = vec![0.0f32; block];
                let mut blocks = samples.chunks(block);
                while !stop.load(Ordering::Relaxed) {
                    let data = blocks.next().map_or_else(|| silence.clone(), <[f32]>::to_vec);
                    if tx.send(data).is_err() {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(BLOCK_MILLIS));
                }
            })
            .map_err(|e| LivevoxError::Audio(format!("failed to spawn WAV thread: {e}")))?;

        Ok(())
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.sender.take();
    }
}

impl Drop for WavInput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap_or_else(|e| panic!("{e}"));
        for &s in samples {
            writer.write_sample(s).unwrap_or_else(|e| panic!("{e}"));
        }
        writer.finalize().unwrap_or_else(|e| panic!("{e}"));
    }

    #[test]
    fn reads_file_then_pads_with_silence() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("question.wav");
        write_wav(&path, &[16384; 1600]);

        let mut input = WavInput::open(&path).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(input.sample_rate(), 16000);
        assert_eq!(input.channels(), 1);

        let rx = input.receiver();
        input.start().unwrap_or_else(|e| panic!("{e}"));

        let first = rx
            .recv_timeout(Duration::from_secs(2))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(first.len(), 1600);
        assert!(first.iter().all(|&s| (s - 0.5).abs() < 1e-6));

        let second = rx
            .recv_timeout(Duration::from_secs(2))
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(second.iter().all(|&s| s == 0.0));

        input.close();
    }

    #[test]
    fn missing_file_is_a_device_error() {
        let result = WavInput::open(Path::new("/nonexistent/question.wav"));
        assert!(matches!(result, Err(LivevoxError::Device(_))));
    }

    #[test]
    fn second_start_fails() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("q.wav");
        write_wav(&path, &[0; 16]);

        let mut input = WavInput::open(&path).unwrap_or_else(|e| panic!("{e}"));
        input.start().unwrap_or_else(|e| panic!("{e}"));
        assert!(input.start().is_err());
        input.close();
    }
}
