use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::audio::capture::CapturePipeline;
use crate::audio::playback::PlaybackScheduler;
use crate::audio::{AudioBackend, InputStream, OUTPUT_SAMPLE_RATE, OutputContext, pcm};
use crate::config::{AudioConfig, LiveConfig};
use crate::error::Result;

use super::event::{Envelope, EventSender, SessionEvent, SessionId};
use super::protocol::{ConnectRequest, Modality, ServerMessage};
use super::state::{Phase, SessionState};
use super::transport::{Connector, FrameSink, TransportSession};

/// Signals exposed to whoever drives the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    /// Handshake completed and audio is flowing.
    pub connected: bool,
    /// At least one inbound chunk is scheduled and not yet finished.
    pub speaking: bool,
    /// Last failure, kept until the next `start` or `clear_error`.
    pub error: Option<String>,
}

/// Everything one live session holds. Dropped exactly once, by `release`.
struct LiveSession {
    id: SessionId,
    events: EventSender,
    input: Box<dyn InputStream>,
    output: Box<dyn OutputContext>,
    transport: Box<dyn TransportSession>,
    sink: FrameSink,
    scheduler: PlaybackScheduler,
    capture: Option<CapturePipeline>,
}

impl LiveSession {
    fn release(mut self) {
        // Gate first: after this no frame can reach the transport.
        self.sink.close();
        if let Some(capture) = self.capture.take() {
            capture.detach();
        }
        self.input.close();

        self.scheduler.stop_all(self.output.as_mut());
        self.output.close();

        self.transport.close();
        tracing::debug!("session {}: resources released", self.id);
    }
}

/// Owns the lifecycle of the live voice session.
///
/// The manager is driven from a single control thread: collaborators report
/// back only through session-stamped events, which the caller feeds to
/// [`SessionManager::handle`] (see [`SessionManager::next_event`] and
/// [`SessionManager::process_pending`]). Events stamped with any session
/// other than the live one are discarded.
pub struct SessionManager {
    live: LiveConfig,
    frame_size: usize,
    audio: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    phase: Phase<LiveSession>,
    last_session: SessionId,
    error: Option<String>,
    status: watch::Sender<Status>,
    events_tx: mpsc::UnboundedSender<Envelope>,
    events_rx: mpsc::UnboundedReceiver<Envelope>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        live: LiveConfig,
        audio_config: &AudioConfig,
        audio: Arc<dyn AudioBackend>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(Status::default());
        Self {
            live,
            frame_size: audio_config.frame_size,
            audio,
            connector,
            phase: Phase::Idle,
            last_session: 0,
            error: None,
            status,
            events_tx,
            events_rx,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.phase.state()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    /// Id of the current live session, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.phase.live().map(|live| live.id)
    }

    /// Open a new session, tearing down any live one first.
    ///
    /// Audio devices are acquired before connecting; if any step fails the
    /// manager ends up `Closed` with the error signal set and nothing held.
    pub fn start(&mut self) -> Result<()> {
        if self.state().is_live() {
            tracing::info!("restarting live session");
            self.teardown();
        }

        debug_assert!(self.state().can_transition(SessionState::Connecting));
        self.error = None;
        self.last_session += 1;
        let id = self.last_session;
        let events = EventSender::new(id, self.events_tx.clone());

        match self.acquire(id, events) {
            Ok(live) => {
                tracing::info!("session {id}: connecting");
                self.phase = Phase::Connecting(live);
                self.publish();
                Ok(())
            }
            Err(e) => {
                tracing::warn!("session {id}: failed to start: {e}");
                self.phase = Phase::Closed;
                self.error = Some(e.to_string());
                self.publish();
                Err(e)
            }
        }
    }

    fn acquire(&self, id: SessionId, events: EventSender) -> Result<LiveSession> {
        let finished = events.clone();
        let mut output = self.audio.open_output(
            OUTPUT_SAMPLE_RATE,
            Box::new(move |buffer| finished.send(SessionEvent::PlaybackFinished(buffer))),
        )?;

        let mut input = match self.audio.open_input() {
            Ok(input) => input,
            Err(e) => {
                output.close();
                return Err(e);
            }
        };

        let request = ConnectRequest {
            model: self.live.model.clone(),
            response_modality: Modality::Audio,
            system_instruction: self.live.system_instruction.clone(),
            voice: self.live.voice.clone(),
        };

        let transport = match self.connector.connect(&request, events.clone()) {
            Ok(transport) => transport,
            Err(e) => {
                input.close();
                output.close();
                return Err(e);
            }
        };
        let sink = transport.frame_sink();

        Ok(LiveSession {
            id,
            events,
            input,
            output,
            transport,
            sink,
            scheduler: PlaybackScheduler::new(OUTPUT_SAMPLE_RATE),
            capture: None,
        })
    }

    /// User-initiated stop. Local audio stops before this returns.
    pub fn stop(&mut self) {
        self.teardown();
        self.publish();
    }

    /// Dismiss the error signal.
    pub fn clear_error(&mut self) {
        self.error = None;
        self.publish();
    }

    /// Wait for the next event from the live session's collaborators.
    pub async fn next_event(&mut self) -> Option<Envelope> {
        self.events_rx.recv().await
    }

    /// Handle every event that has already arrived. Returns how many there were.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(envelope) = self.events_rx.try_recv() {
            self.handle(envelope);
            handled += 1;
        }
        handled
    }

    pub fn handle(&mut self, envelope: Envelope) {
        if self.session_id() != Some(envelope.session) {
            tracing::trace!(
                "dropping {:?} for stale session {}",
                envelope.event,
                envelope.session
            );
            return;
        }

        match envelope.event {
            SessionEvent::Opened => self.on_open(),
            SessionEvent::Message(message) => self.on_message(&message),
            SessionEvent::Closed { reason } => self.on_remote_close(reason),
            SessionEvent::Failed(message) => self.fail(message),
            SessionEvent::CaptureFailed(message) => {
                self.fail(format!("microphone unavailable: {message}"));
            }
            SessionEvent::PlaybackFinished(buffer) => {
                if let Some(live) = self.phase.live_mut() {
                    live.scheduler.finish(buffer);
                }
            }
        }

        self.publish();
    }

    fn on_open(&mut self) {
        let frame_size = self.frame_size;
        let Some(live) = self.phase.promote() else {
            tracing::debug!("ignoring open outside of connecting");
            return;
        };
        tracing::info!("session {}: connected", live.id);

        let sink = live.sink.clone();
        let failures = live.events.clone();
        let started = live.input.start().and_then(|()| {
            CapturePipeline::spawn(
                live.input.as_ref(),
                frame_size,
                move |frame| {
                    sink.send(frame);
                },
                move |reason| failures.send(SessionEvent::CaptureFailed(reason)),
            )
        });

        match started {
            Ok(capture) => live.capture = Some(capture),
            Err(e) => self.fail(format!("microphone unavailable: {e}")),
        }
    }

    fn on_message(&mut self, message: &ServerMessage) {
        let Some(payload) = message.audio_payload() else {
            return;
        };
        let Some(live) = self.phase.live_mut() else {
            return;
        };

        let samples = match pcm::decode_base64(payload) {
            Ok(samples) if !samples.is_empty() => samples,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!("session {}: {e}", live.id);
                return;
            }
        };

        if let Err(e) = live.scheduler.schedule(live.output.as_mut(), samples) {
            tracing::warn!("session {}: failed to schedule playback: {e}", live.id);
        }
    }

    fn on_remote_close(&mut self, reason: Option<String>) {
        let detail = reason.map(|r| format!(": {r}")).unwrap_or_default();
        if self.state() == SessionState::Connecting {
            tracing::warn!("session closed before it opened{detail}");
            self.error = Some(format!("connection closed before the session opened{detail}"));
        } else {
            tracing::info!("session closed by remote{detail}");
        }
        self.teardown();
    }

    fn fail(&mut self, message: String) {
        tracing::error!("live session error: {message}");
        self.error = Some(message);
        self.teardown();
    }

    /// Release every resource of the live session. Idempotent; leaves the
    /// error signal untouched.
    fn teardown(&mut self) {
        if let Some(live) = self.phase.close() {
            let id = live.id;
            live.release();
            tracing::info!("session {id}: closed");
        }
    }

    fn publish(&self) {
        let live = self.phase.live();
        let next = Status {
            connected: self.state() == SessionState::Connected,
            speaking: live.is_some_and(|l| l.scheduler.is_speaking()),
            error: self.error.clone(),
        };
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}
