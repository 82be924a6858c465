use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use crossbeam_channel::{Receiver, Sender, bounded};

use crate::error::{LivevoxError, Result};

use super::buffer::FrameAccumulator;
use super::resample::Resampler;
use super::{INPUT_SAMPLE_RATE, InputStream};

/// Microphone input via cpal. Building the stream acquires the device; no
/// samples flow until `start`.
pub struct CpalInput {
    stream: Option<Stream>,
    receiver: Receiver<Vec<f32>>,
    failures: Receiver<String>,
    sample_rate: u32,
    channels: u16,
}

impl CpalInput {
    pub fn open(device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(name) = device_name {
            host.input_devices()
                .map_err(|e| LivevoxError::Device(format!("failed to enumerate input devices: {e}")))?
                .find(|d| device_label(d).as_deref() == Some(name))
                .ok_or_else(|| LivevoxError::Device(format!("input device not found: {name}")))?
        } else {
            host.default_input_device().ok_or_else(|| {
                LivevoxError::Device("no default input device available".to_string())
            })?
        };

        let supported = device
            .default_input_config()
            .map_err(|e| LivevoxError::Device(format!("failed to get default input config: {e}")))?;

        let sample_rate = supported.sample_rate();
        let channels = supported.channels();

        let stream_config = StreamConfig {
            channels,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        // Bounded; the callback uses try_send and never blocks
        let (tx, rx) = bounded::<Vec<f32>>(64);
        let (fail_tx, fail_rx) = bounded::<String>(1);

        let err_fn = move |err: cpal::StreamError| {
            tracing::error!("audio input stream error: {err}");
            let _ = fail_tx.try_send(err.to_string());
        };

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let _ = tx.try_send(data.to_vec());
                },
                err_fn,
                None,
            )
            .map_err(|e| LivevoxError::Device(format!("failed to open microphone: {e}")))?;

        tracing::debug!("microphone acquired: {sample_rate} Hz, {channels} channel(s)");

        Ok(Self {
            stream: Some(stream),
            receiver: rx,
            failures: fail_rx,
            sample_rate,
            channels,
        })
    }
}

impl InputStream for CpalInput {
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
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| LivevoxError::Audio("microphone already released".to_string()))?;
        stream
            .play()
            .map_err(|e| LivevoxError::Audio(format!("failed to start audio stream: {e}")))
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            drop(stream);
            tracing::debug!("microphone released");
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.close();
    }
}

fn device_label(device: &cpal::Device) -> Option<String> {
    device
        .description()
        .ok()
        .map(|desc| desc.name().to_string())
}

pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| LivevoxError::Audio(format!("failed to enumerate input devices: {e}")))?;
    Ok(devices.filter_map(|d| device_label(&d)).collect())
}

#[must_use]
pub fn default_input_device_name() -> Option<String> {
    cpal::default_host()
        .default_input_device()
        .and_then(|d| device_label(&d))
}

/// Runs in a dedicated thread: raw input → 16kHz mono → fixed frames → consumer.
///
/// The thread ends when the input is closed (its receiver disconnects) or
/// after reporting the first device failure.
pub struct CapturePipeline {
    thread: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    pub fn spawn<F, E>(
        input: &dyn InputStream,
        frame_size: usize,
        mut on_frame: F,
        on_failure: E,
    ) -> Result<Self>
    where
        F: FnMut(Vec<i16>) + Send + 'static,
        E: FnOnce(String) + Send + 'static,
    {
        let source_rate = input.sample_rate();
        let channels = input.channels();
        let raw_rx = input.receiver();
        let fail_rx = input.failures();
        let mut resampler = Resampler::new(source_rate, channels, INPUT_SAMPLE_RATE)?;

        tracing::debug!(
            "capture pipeline: source_rate={source_rate}, channels={channels}, frame={frame_size}"
        );

        let thread = std::thread::Builder::new()
            .name("livevox-capture".to_string())
            .spawn(move || {
                let mut accumulator = FrameAccumulator::new(frame_size);
                let mut on_failure = Some(on_failure);
                let mut frames_sent = 0u64;
                let never = crossbeam_channel::never::<String>();
                let mut watch_failures = true;

                loop {
                    let failures = if watch_failures { &fail_rx } else { &never };
                    crossbeam_channel::select! {
                        recv(raw_rx) -> msg => {
                            let Ok(raw) = msg else { break };
                            let mono = match resampler.process(&raw) {
                                Ok(s) => s,
                                Err(e) => {
                                    tracing::warn!("resample error: {e}");
                                    continue;
                                }
                            };
                            for frame in accumulator.feed(&mono) {
                                on_frame(frame);
                                frames_sent += 1;
                            }
                        }
                        recv(failures) -> msg => {
                            if let Ok(reason) = msg {
                                if let Some(report) = on_failure.take() {
                                    report(reason);
                                }
                                break;
                            }
                            watch_failures = false;
                        }
                    }
                }

                tracing::debug!("capture pipeline exiting after {frames_sent} frames");
            })
            .map_err(|e| LivevoxError::Audio(format!("failed to spawn capture thread: {e}")))?;

        Ok(Self {
            thread: Some(thread),
        })
    }

    /// Let the thread wind down on its own once the input is closed.
    pub fn detach(mut self) {
        self.thread.take();
    }

    /// Wait for the thread to exit. Only returns once the input is closed.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Channel pair for inputs that produce samples from a helper thread.
pub(crate) fn input_channels() -> (
    (Sender<Vec<f32>>, Receiver<Vec<f32>>),
    (Sender<String>, Receiver<String>),
) {
    (bounded(64), bounded(1))
}
