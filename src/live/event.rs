use tokio::sync::mpsc;

use crate::audio::playback::BufferId;

use super::protocol::ServerMessage;

/// Monotonic id of a session within one manager.
pub type SessionId = u64;

/// Something that happened to a live session, reported from the transport,
/// the capture thread or the output engine.
#[derive(Debug)]
pub enum SessionEvent {
    /// Handshake finished; audio may flow.
    Opened,
    Message(Box<ServerMessage>),
    /// Remote end closed the connection.
    Closed { reason: Option<String> },
    /// Transport handshake or runtime failure.
    Failed(String),
    CaptureFailed(String),
    PlaybackFinished(BufferId),
}

#[derive(Debug)]
pub struct Envelope {
    pub session: SessionId,
    pub event: SessionEvent,
}

/// Sending half handed to one session's collaborators. Every event it sends
/// is stamped with that session's id.
#[derive(Debug, Clone)]
pub struct EventSender {
    session: SessionId,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSender {
    #[must_use]
    pub const fn new(session: SessionId, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { session, tx }
    }

    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// Deliver an event. Silently dropped once the manager is gone.
    pub fn send(&self, event: SessionEvent) {
        let _ = self.tx.send(Envelope {
            session: self.session,
            event,
        });
    }
}
