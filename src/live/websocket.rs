//! Streaming transport over a WebSocket (tokio-tungstenite).

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::config::LiveConfig;
use crate::error::{LivevoxError, Result};

use super::event::{EventSender, SessionEvent};
use super::protocol::{ConnectRequest, RealtimeInputMessage, ServerMessage, SetupMessage};
use super::transport::{Connector, FrameSink, TransportSession};

/// Outbound frames waiting for the socket. Anything beyond this is dropped
/// at the sink rather than queued.
const FRAME_QUEUE: usize = 8;

pub struct WebSocketConnector {
    endpoint: String,
    api_key: String,
    runtime: Handle,
}

impl WebSocketConnector {
    #[must_use]
    pub fn new(config: &LiveConfig, api_key: String, runtime: Handle) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key,
            runtime,
        }
    }
}

fn session_url(endpoint: &str, api_key: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| LivevoxError::Config(format!("invalid live endpoint '{endpoint}': {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(LivevoxError::Config(format!(
            "live endpoint must be a ws:// or wss:// URL, got '{endpoint}'"
        )));
    }
    url.query_pairs_mut().append_pair("key", api_key);
    Ok(url)
}

impl Connector for WebSocketConnector {
    fn connect(
        &self,
        request: &ConnectRequest,
        events: EventSender,
    ) -> Result<Box<dyn TransportSession>> {
        let url = session_url(&self.endpoint, &self.api_key)?;
        let setup = SetupMessage::new(request).to_json()?;

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tracing::info!("session {}: connecting to {}", events.session(), self.endpoint);

        self.runtime.spawn(async move {
            let session = events.session();
            match run_socket(url, setup, frame_rx, shutdown_rx, &events).await {
                Ok(Ending::Remote(reason)) => events.send(SessionEvent::Closed { reason }),
                Ok(Ending::Local) => tracing::debug!("session {session}: socket closed locally"),
                Err(e) => events.send(SessionEvent::Failed(e.to_string())),
            }
        });

        Ok(Box::new(WebSocketSession {
            sink: FrameSink::new(frame_tx),
            shutdown: Some(shutdown_tx),
        }))
    }
}

struct WebSocketSession {
    sink: FrameSink,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TransportSession for WebSocketSession {
    fn frame_sink(&self) -> FrameSink {
        self.sink.clone()
    }

    fn close(&mut self) {
        self.sink.close();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for WebSocketSession {
    fn drop(&mut self) {
        self.close();
    }
}

enum Ending {
    /// We asked for it; the manager already knows.
    Local,
    Remote(Option<String>),
}

async fn run_socket(
    url: Url,
    setup: String,
    mut frames: mpsc::Receiver<Vec<i16>>,
    mut shutdown: oneshot::Receiver<()>,
    events: &EventSender,
) -> Result<Ending> {
    let (ws, _response) = tokio::select! {
        _ = &mut shutdown => return Ok(Ending::Local),
        res = connect_async(url.as_str()) => {
            res.map_err(|e| LivevoxError::Transport(format!("failed to connect: {e}")))?
        }
    };

    let (mut write, mut read) = ws.split();
    write
        .send(Message::Text(setup))
        .await
        .map_err(|e| LivevoxError::Transport(format!("failed to send setup: {e}")))?;

    let mut opened = false;
    let mut frames_sent = 0u64;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = write.send(Message::Close(None)).await;
                tracing::debug!("sent {frames_sent} audio frames");
                return Ok(Ending::Local);
            }
            frame = frames.recv(), if opened => {
                let Some(frame) = frame else {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(Ending::Local);
                };
                let json = RealtimeInputMessage::audio(&frame).to_json()?;
                write
                    .send(Message::Text(json))
                    .await
                    .map_err(|e| LivevoxError::Transport(format!("send failed: {e}")))?;
                frames_sent += 1;
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => on_server_text(&text, &mut opened, events)?,
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => on_server_text(text, &mut opened, events)?,
                    Err(_) => tracing::debug!("ignoring non-UTF-8 binary message ({} bytes)", bytes.len()),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty());
                    return Ok(Ending::Remote(reason));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(LivevoxError::Transport(format!("connection lost: {e}")));
                }
                None => return Ok(Ending::Remote(None)),
            }
        }
    }
}

fn on_server_text(text: &str, opened: &mut bool, events: &EventSender) -> Result<()> {
    let message = match ServerMessage::parse(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!("{e}");
            return Ok(());
        }
    };

    if let Some(err) = message.error_message() {
        return Err(LivevoxError::Transport(err));
    }

    if message.is_setup_complete() {
        if !*opened {
            *opened = true;
            events.send(SessionEvent::Opened);
        }
        return Ok(());
    }

    if message.is_turn_complete() {
        tracing::debug!("session {}: model turn complete", events.session());
    }

    events.send(SessionEvent::Message(Box::new(message)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::live::event::Envelope;
    use crate::live::protocol::Modality;
    use crate::live::transport::SendOutcome;

    fn request() -> ConnectRequest {
        ConnectRequest {
            model: "test-model".to_string(),
            response_modality: Modality::Audio,
            system_instruction: "Be brief.".to_string(),
            voice: None,
        }
    }

    async fn next_event(rx: &mut UnboundedReceiver<Envelope>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for event"))
            .unwrap_or_else(|| panic!("event channel closed"))
            .event
    }

    #[test]
    fn url_carries_key() {
        let url = session_url("wss://example.test/live", "secret").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(url.as_str(), "wss://example.test/live?key=secret");
    }

    #[test]
    fn url_rejects_http() {
        assert!(session_url("https://example.test/live", "k").is_err());
        assert!(session_url("not a url", "k").is_err());
    }

    #[tokio::test]
    async fn handshake_frames_audio_and_remote_close() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let addr = listener.local_addr().unwrap_or_else(|e| panic!("{e}"));

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap_or_else(|e| panic!("{e}"));
            let mut ws = tokio_tungstenite::accept_async(tcp)
                .await
                .unwrap_or_else(|e| panic!("{e}"));

            let setup = match ws.next().await {
                Some(Ok(Message::Text(t))) => t,
                other => panic!("expected setup, got {other:?}"),
            };
            assert!(setup.contains("models/test-model"));

            ws.send(Message::Text(r#"{"setupComplete":{}}"#.to_string()))
                .await
                .unwrap_or_else(|e| panic!("{e}"));

            let frame = match ws.next().await {
                Some(Ok(Message::Text(t))) => t,
                other => panic!("expected audio frame, got {other:?}"),
            };
            assert!(frame.contains("audio/pcm;rate=16000"));

            ws.send(Message::Text(
                r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"data":"AAA="}}]}}}"#
                    .to_string(),
            ))
            .await
            .unwrap_or_else(|e| panic!("{e}"));

            ws.close(None).await.unwrap_or_else(|e| panic!("{e}"));
        });

        let config = LiveConfig {
            endpoint: format!("ws://{addr}/live"),
            ..LiveConfig::default()
        };
        let connector = WebSocketConnector::new(&config, "k".to_string(), Handle::current());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let session = connector
            .connect(&request(), EventSender::new(1, tx))
            .unwrap_or_else(|e| panic!("{e}"));

        assert!(matches!(next_event(&mut rx).await, SessionEvent::Opened));
        assert_eq!(session.frame_sink().send(vec![0; 16]), SendOutcome::Queued);

        match next_event(&mut rx).await {
            SessionEvent::Message(msg) => assert_eq!(msg.audio_payload(), Some("AAA=")),
            other => panic!("expected message, got {other:?}"),
        }
        assert!(matches!(
            next_event(&mut rx).await,
            SessionEvent::Closed { .. }
        ));

        server.await.unwrap_or_else(|e| panic!("{e}"));
    }

    #[tokio::test]
    async fn server_error_fails_the_session() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let addr = listener.local_addr().unwrap_or_else(|e| panic!("{e}"));

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap_or_else(|e| panic!("{e}"));
            let mut ws = tokio_tungstenite::accept_async(tcp)
                .await
                .unwrap_or_else(|e| panic!("{e}"));
            let _ = ws.next().await;
            let _ = ws
                .send(Message::Text(
                    r#"{"error":{"code":400,"message":"bad model"}}"#.to_string(),
                ))
                .await;
            let _ = ws.next().await;
        });

        let config = LiveConfig {
            endpoint: format!("ws://{addr}/"),
            ..LiveConfig::default()
        };
        let connector = WebSocketConnector::new(&config, "k".to_string(), Handle::current());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _session = connector
            .connect(&request(), EventSender::new(2, tx))
            .unwrap_or_else(|e| panic!("{e}"));

        match next_event(&mut rx).await {
            SessionEvent::Failed(msg) => assert!(msg.contains("bad model")),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
