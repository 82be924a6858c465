use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    SampleFormat, Stream, StreamConfig, SupportedStreamConfig, SupportedStreamConfigRange,
};
use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::error::{LivevoxError, Result};

use super::playback::BufferId;
use super::{FinishedCallback, OutputContext};

enum MixerCommand {
    Play {
        id: BufferId,
        start_frame: u64,
        samples: Vec<f32>,
    },
    Stop(BufferId),
}

struct Voice {
    id: BufferId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Renders scheduled buffers on a timeline counted in frames at the context
/// rate. Owned by the realtime callback; fed through a command channel.
struct Mixer {
    commands: Receiver<MixerCommand>,
    voices: Vec<Voice>,
    position: f64,
    step: f64,
    clock: Arc<AtomicU64>,
    on_finished: FinishedCallback,
}

impl Mixer {
    fn render(&mut self, data: &mut [f32], channels: usize) {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                MixerCommand::Play {
                    id,
                    start_frame,
                    samples,
                } => self.voices.push(Voice {
                    id,
                    // A start already in the past plays from its first sample now.
                    start_frame: start_frame.max(self.position as u64),
                    samples,
                }),
                MixerCommand::Stop(id) => self.voices.retain(|v| v.id != id),
            }
        }

        for frame in data.chunks_mut(channels.max(1)) {
            let index = self.position as u64;
            let mut mixed = 0.0f32;
            for voice in &self.voices {
                if index >= voice.start_frame && index < voice.end_frame() {
                    mixed += voice.samples[(index - voice.start_frame) as usize];
                }
            }
            frame.fill(mixed.clamp(-1.0, 1.0));
            self.position += self.step;
        }

        let now = self.position as u64;
        let on_finished = &self.on_finished;
        self.voices.retain(|voice| {
            if voice.end_frame() <= now {
                on_finished(voice.id);
                false
            } else {
                true
            }
        });

        self.clock.store(self.position.to_bits(), Ordering::Release);
    }
}

/// Speaker output via cpal with its own clock.
///
/// The stream is opened at the requested rate when the device supports it.
/// Otherwise the device default rate is used and the mixer walks the
/// timeline at `rate / device_rate` frames per device frame.
pub struct CpalOutput {
    stream: Option<Stream>,
    commands: Sender<MixerCommand>,
    clock: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalOutput {
    pub fn open(
        device_name: Option<&str>,
        sample_rate: u32,
        on_finished: FinishedCallback,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(name) = device_name {
            host.output_devices()
                .map_err(|e| {
                    LivevoxError::Device(format!("failed to enumerate output devices: {e}"))
                })?
                .find(|d| device_label(d).as_deref() == Some(name))
                .ok_or_else(|| LivevoxError::Device(format!("output device not found: {name}")))?
        } else {
            host.default_output_device().ok_or_else(|| {
                LivevoxError::Device("no default output device available".to_string())
            })?
        };

        let stream_config = pick_config(&device, sample_rate)?;
        let channels = stream_config.channels as usize;
        let device_rate = stream_config.sample_rate;

        let (tx, rx) = unbounded::<MixerCommand>();
        let clock = Arc::new(AtomicU64::new(0f64.to_bits()));

        let mut mixer = Mixer {
            commands: rx,
            voices: Vec::new(),
            position: 0.0,
            step: f64::from(sample_rate) / f64::from(device_rate),
            clock: Arc::clone(&clock),
            on_finished,
        };

        let err_fn = |err: cpal::StreamError| {
            tracing::error!("audio output stream error: {err}");
        };

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    mixer.render(data, channels);
                },
                err_fn,
                None,
            )
            .map_err(|e| LivevoxError::Device(format!("failed to open output device: {e}")))?;

        stream
            .play()
            .map_err(|e| LivevoxError::Device(format!("failed to start output stream: {e}")))?;

        tracing::debug!(
            "output context opened: {sample_rate} Hz timeline on a {device_rate} Hz, {channels} channel device"
        );

        Ok(Self {
            stream: Some(stream),
            commands: tx,
            clock,
            sample_rate,
        })
    }
}

fn pick_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
    let ranges: Vec<SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| LivevoxError::Device(format!("failed to query output configs: {e}")))?
        .collect();
    let default = device.default_output_config().ok();

    choose_config(ranges, default, sample_rate)
        .map(|config| config.config())
        .ok_or_else(|| LivevoxError::Device("output device has no f32 configuration".to_string()))
}

/// The stream is always built for f32 samples. Prefer a range containing the
/// requested rate, then the device default, then any f32 range at its
/// highest rate.
fn choose_config(
    ranges: Vec<SupportedStreamConfigRange>,
    default: Option<SupportedStreamConfig>,
    sample_rate: u32,
) -> Option<SupportedStreamConfig> {
    let mut f32_ranges: Vec<SupportedStreamConfigRange> = ranges
        .into_iter()
        .filter(|range| range.sample_format() == SampleFormat::F32)
        .collect();

    if let Some(index) = f32_ranges.iter().position(|range| {
        range.min_sample_rate() <= sample_rate && sample_rate <= range.max_sample_rate()
    }) {
        return Some(f32_ranges.swap_remove(index).with_sample_rate(sample_rate));
    }

    if let Some(config) = default.filter(|c| c.sample_format() == SampleFormat::F32) {
        return Some(config);
    }

    f32_ranges
        .into_iter()
        .max_by_key(SupportedStreamConfigRange::max_sample_rate)
        .map(SupportedStreamConfigRange::with_max_sample_rate)
}

impl OutputContext for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        f64::from_bits(self.clock.load(Ordering::Acquire)) / f64::from(self.sample_rate)
    }

    fn play(&mut self, id: BufferId, samples: Vec<f32>, start_at: f64) -> Result<()> {
        if self.stream.is_none() {
            return Err(LivevoxError::Audio("output context is closed".to_string()));
        }
        let start_frame = (start_at * f64::from(self.sample_rate)).round() as u64;
        self.commands
            .send(MixerCommand::Play {
                id,
                start_frame,
                samples,
            })
            .map_err(|_| LivevoxError::Audio("output mixer has stopped".to_string()))
    }

    fn stop(&mut self, id: BufferId) {
        let _ = self.commands.send(MixerCommand::Stop(id));
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            drop(stream);
            tracing::debug!("output context closed");
        }
    }
}

impl Drop for CpalOutput {
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

pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| LivevoxError::Audio(format!("failed to enumerate output devices: {e}")))?;
    Ok(devices.filter_map(|d| device_label(&d)).collect())
}

#[must_use]
pub fn default_output_device_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| device_label(&d))
}
