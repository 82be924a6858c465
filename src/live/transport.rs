use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::Result;

use super::event::EventSender;
use super::protocol::ConnectRequest;

/// Opens streaming sessions with the remote inference endpoint.
///
/// `connect` must return without waiting for the handshake. Progress is
/// reported through `events`: `Opened` once audio may flow, `Message` for
/// each server message, then exactly one of `Closed` or `Failed`.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        request: &ConnectRequest,
        events: EventSender,
    ) -> Result<Box<dyn TransportSession>>;
}

/// Handle to one open streaming session.
pub trait TransportSession {
    fn frame_sink(&self) -> FrameSink;

    /// Stop sending and shut the connection down. Safe to call repeatedly.
    fn close(&mut self);
}

/// Outcome of offering one frame to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// Transport is busy; the frame was discarded.
    Dropped,
    /// The session is over; nothing was sent.
    Closed,
}

/// Cloneable, non-blocking entry point for outbound PCM frames.
///
/// Closing the sink drops the underlying sender, so after `close` no clone
/// can reach the transport any more.
#[derive(Debug, Clone)]
pub struct FrameSink {
    slot: Arc<Mutex<Option<mpsc::Sender<Vec<i16>>>>>,
}

impl FrameSink {
    #[must_use]
    pub fn new(tx: mpsc::Sender<Vec<i16>>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        }
    }

    pub fn send(&self, frame: Vec<i16>) -> SendOutcome {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = slot.as_ref() else {
            return SendOutcome::Closed;
        };
        match tx.try_send(frame) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                tracing::trace!("transport busy, dropping audio frame");
                SendOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    pub fn close(&self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_then_dropped_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = FrameSink::new(tx);

        assert_eq!(sink.send(vec![1]), SendOutcome::Queued);
        assert_eq!(sink.send(vec![2]), SendOutcome::Dropped);
        assert_eq!(rx.try_recv().ok(), Some(vec![1]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn close_makes_every_clone_inert() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = FrameSink::new(tx);
        let clone = sink.clone();

        sink.close();
        assert!(clone.is_closed());
        assert_eq!(clone.send(vec![1]), SendOutcome::Closed);
        // The only sender is gone, so the receiver sees the end of the stream.
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn receiver_gone_reports_closed() {
        let (tx, rx) = mpsc::channel(4);
        let sink = FrameSink::new(tx);
        drop(rx);
        assert_eq!(sink.send(vec![1]), SendOutcome::Closed);
    }
}
