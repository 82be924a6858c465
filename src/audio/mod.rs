pub mod buffer;
pub mod capture;
pub mod device;
pub mod file;
pub mod output;
pub mod pcm;
pub mod playback;
pub mod resample;

use crossbeam_channel::Receiver;

use crate::error::Result;

use self::playback::BufferId;

/// Sample rate of outbound frames (mono).
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of inbound chunks (mono).
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Invoked from the output engine when a scheduled buffer finishes playing.
pub type FinishedCallback = Box<dyn Fn(BufferId) + Send>;

/// Source of platform audio resources for a session.
///
/// Opening an input is the microphone authorization step: a backend that
/// cannot get the device returns `LivevoxError::Device`.
pub trait AudioBackend: Send + Sync {
    fn open_input(&self) -> Result<Box<dyn InputStream>>;

    fn open_output(
        &self,
        sample_rate: u32,
        on_finished: FinishedCallback,
    ) -> Result<Box<dyn OutputContext>>;
}

/// An acquired (but not necessarily running) audio input.
pub trait InputStream {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Raw interleaved f32 blocks, in capture order.
    fn receiver(&self) -> Receiver<Vec<f32>>;

    /// Device failures reported by the capture engine.
    fn failures(&self) -> Receiver<String>;

    fn start(&mut self) -> Result<()>;

    /// Release the device. Both receivers disconnect once this returns.
    fn close(&mut self);
}

/// An output device context with its own monotonically advancing clock.
pub trait OutputContext {
    fn sample_rate(&self) -> u32;

    /// Current output clock in seconds.
    fn current_time(&self) -> f64;

    /// Play `samples` (mono, at `sample_rate`) starting at `start_at` seconds.
    fn play(&mut self, id: BufferId, samples: Vec<f32>, start_at: f64) -> Result<()>;

    /// Cut a buffer short. No finished notification is sent for it.
    fn stop(&mut self, id: BufferId);

    fn close(&mut self);
}
