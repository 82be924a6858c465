//! In-memory stand-ins for devices and the remote endpoint.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::mpsc;

use crate::audio::capture::input_channels;
use crate::audio::playback::BufferId;
use crate::audio::{AudioBackend, FinishedCallback, InputStream, OutputContext};
use crate::error::{LivevoxError, Result};
use crate::live::event::{EventSender, SessionEvent};
use crate::live::protocol::ConnectRequest;
use crate::live::transport::{Connector, FrameSink, TransportSession};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Output clock that only moves when a test says so.
#[derive(Debug, Clone, Default)]
pub struct FakeClock {
    bits: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn set(&self, secs: f64) {
        self.bits.store(secs.to_bits(), Ordering::SeqCst);
    }

    pub fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Default)]
struct OutputLog {
    starts: Vec<f64>,
    stopped: Vec<BufferId>,
}

#[derive(Debug, Default)]
struct Resources {
    open_inputs: AtomicUsize,
    open_outputs: AtomicUsize,
    input_closes: AtomicUsize,
    output_closes: AtomicUsize,
}

pub struct FakeOutput {
    clock: FakeClock,
    log: Arc<Mutex<OutputLog>>,
    resources: Option<Arc<Resources>>,
    closed: bool,
}

impl FakeOutput {
    pub fn new(clock: FakeClock) -> Self {
        Self {
            clock,
            log: Arc::default(),
            resources: None,
            closed: false,
        }
    }

    pub fn played_starts(&self) -> Vec<f64> {
        lock(&self.log).starts.clone()
    }

    pub fn stopped(&self) -> Vec<BufferId> {
        lock(&self.log).stopped.clone()
    }
}

impl OutputContext for FakeOutput {
    fn sample_rate(&self) -> u32 {
        crate::audio::OUTPUT_SAMPLE_RATE
    }

    fn current_time(&self) -> f64 {
        self.clock.now()
    }

    fn play(&mut self, _id: BufferId, _samples: Vec<f32>, start_at: f64) -> Result<()> {
        if self.closed {
            return Err(LivevoxError::Audio("output closed".to_string()));
        }
        lock(&self.log).starts.push(start_at);
        Ok(())
    }

    fn stop(&mut self, id: BufferId) {
        lock(&self.log).stopped.push(id);
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(resources) = &self.resources {
            resources.open_outputs.fetch_sub(1, Ordering::SeqCst);
            resources.output_closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Debug)]
struct InputHandle {
    tx: Mutex<Option<Sender<Vec<f32>>>>,
    fail_tx: Mutex<Option<Sender<String>>>,
    started: AtomicBool,
}

impl InputHandle {
    fn push(&self, block: Vec<f32>) {
        if let Some(tx) = lock(&self.tx).as_ref() {
            let _ = tx.send(block);
        }
    }

    fn fail(&self, reason: &str) {
        if let Some(tx) = lock(&self.fail_tx).as_ref() {
            let _ = tx.try_send(reason.to_string());
        }
    }

    fn disconnect(&self) {
        lock(&self.tx).take();
        lock(&self.fail_tx).take();
    }
}

/// Input whose samples and failures are injected by the test.
pub struct FakeInput {
    handle: Arc<InputHandle>,
    receiver: Receiver<Vec<f32>>,
    failures: Receiver<String>,
    sample_rate: u32,
    channels: u16,
    resources: Option<Arc<Resources>>,
    closed: bool,
}

impl FakeInput {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let ((tx, rx), (fail_tx, fail_rx)) = input_channels();
        Self {
            handle: Arc::new(InputHandle {
                tx: Mutex::new(Some(tx)),
                fail_tx: Mutex::new(Some(fail_tx)),
                started: AtomicBool::new(false),
            }),
            receiver: rx,
            failures: fail_rx,
            sample_rate,
            channels,
            resources: None,
            closed: false,
        }
    }

    pub fn push(&self, block: Vec<f32>) {
        self.handle.push(block);
    }

    pub fn fail(&self, reason: &str) {
        self.handle.fail(reason);
    }

    /// Drop the sending side, as a device does when it is released.
    pub fn disconnect(&self) {
        self.handle.disconnect();
    }
}

impl InputStream for FakeInput {
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
        if self.closed {
            return Err(LivevoxError::Audio("input closed".to_string()));
        }
        self.handle.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.handle.disconnect();
        if let Some(resources) = &self.resources {
            resources.open_inputs.fetch_sub(1, Ordering::SeqCst);
            resources.input_closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Backend handing out fake devices and keeping count of what is held.
#[derive(Default)]
pub struct FakeAudio {
    clock: FakeClock,
    log: Arc<Mutex<OutputLog>>,
    resources: Arc<Resources>,
    input: Mutex<Option<Arc<InputHandle>>>,
    deny_microphone: AtomicBool,
}

impl FakeAudio {
    pub fn deny_microphone(&self) {
        self.deny_microphone.store(true, Ordering::SeqCst);
    }

    pub fn clock(&self) -> FakeClock {
        self.clock.clone()
    }

    /// Inputs currently held.
    pub fn open_inputs(&self) -> usize {
        self.resources.open_inputs.load(Ordering::SeqCst)
    }

    /// Outputs currently held.
    pub fn open_outputs(&self) -> usize {
        self.resources.open_outputs.load(Ordering::SeqCst)
    }

    pub fn input_close_calls(&self) -> usize {
        self.resources.input_closes.load(Ordering::SeqCst)
    }

    pub fn output_close_calls(&self) -> usize {
        self.resources.output_closes.load(Ordering::SeqCst)
    }

    pub fn played_starts(&self) -> Vec<f64> {
        lock(&self.log).starts.clone()
    }

    pub fn stopped(&self) -> Vec<BufferId> {
        lock(&self.log).stopped.clone()
    }

    pub fn input_started(&self) -> bool {
        lock(&self.input)
            .as_ref()
            .is_some_and(|h| h.started.load(Ordering::SeqCst))
    }

    pub fn push_input(&self, block: Vec<f32>) {
        if let Some(handle) = lock(&self.input).as_ref() {
            handle.push(block);
        }
    }

    pub fn fail_input(&self, reason: &str) {
        if let Some(handle) = lock(&self.input).as_ref() {
            handle.fail(reason);
        }
    }
}

impl AudioBackend for FakeAudio {
    fn open_input(&self) -> Result<Box<dyn InputStream>> {
        if self.deny_microphone.load(Ordering::SeqCst) {
            return Err(LivevoxError::Device("microphone permission denied".to_string()));
        }
        let mut input = FakeInput::new(crate::audio::INPUT_SAMPLE_RATE, 1);
        input.resources = Some(Arc::clone(&self.resources));
        self.resources.open_inputs.fetch_add(1, Ordering::SeqCst);
        *lock(&self.input) = Some(Arc::clone(&input.handle));
        Ok(Box::new(input))
    }

    fn open_output(
        &self,
        _sample_rate: u32,
        _on_finished: FinishedCallback,
    ) -> Result<Box<dyn OutputContext>> {
        self.resources.open_outputs.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeOutput {
            clock: self.clock.clone(),
            log: Arc::clone(&self.log),
            resources: Some(Arc::clone(&self.resources)),
            closed: false,
        }))
    }
}

struct FakeTransport {
    sink: FrameSink,
    close_calls: Arc<AtomicUsize>,
    closed: bool,
}

impl TransportSession for FakeTransport {
    fn frame_sink(&self) -> FrameSink {
        self.sink.clone()
    }

    fn close(&mut self) {
        self.sink.close();
        if !self.closed {
            self.closed = true;
            self.close_calls.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Connector that never touches the network. The test plays the remote end
/// by emitting events through the last session's sender.
#[derive(Default)]
pub struct FakeConnector {
    requests: Mutex<Vec<ConnectRequest>>,
    refuse: AtomicBool,
    sender: Mutex<Option<EventSender>>,
    sink: Mutex<Option<FrameSink>>,
    frames: Mutex<Option<mpsc::Receiver<Vec<i16>>>>,
    close_calls: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn refuse(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn last_request(&self) -> Option<ConnectRequest> {
        lock(&self.requests).last().cloned()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn sender(&self) -> Option<EventSender> {
        lock(&self.sender).clone()
    }

    pub fn sink(&self) -> Option<FrameSink> {
        lock(&self.sink).clone()
    }

    /// Send an event as the most recent session's remote end.
    pub fn emit(&self, event: SessionEvent) {
        if let Some(sender) = lock(&self.sender).as_ref() {
            sender.send(event);
        }
    }

    pub fn try_frame(&self) -> Option<Vec<i16>> {
        lock(&self.frames).as_mut()?.try_recv().ok()
    }

    pub fn wait_frame(&self, timeout: Duration) -> Option<Vec<i16>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.try_frame() {
                return Some(frame);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Connector for FakeConnector {
    fn connect(
        &self,
        request: &ConnectRequest,
        events: EventSender,
    ) -> Result<Box<dyn TransportSession>> {
        lock(&self.requests).push(request.clone());
        if self.refuse.load(Ordering::SeqCst) {
            return Err(LivevoxError::Transport("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::channel(8);
        let sink = FrameSink::new(tx);
        *lock(&self.sender) = Some(events);
        *lock(&self.sink) = Some(sink.clone());
        *lock(&self.frames) = Some(rx);

        Ok(Box::new(FakeTransport {
            sink,
            close_calls: Arc::clone(&self.close_calls),
            closed: false,
        }))
    }
}
