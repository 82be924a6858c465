//! The live voice session: lifecycle, wire protocol and transport.

pub mod event;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;
pub mod websocket;

pub use event::{Envelope, EventSender, SessionEvent, SessionId};
pub use session::{SessionManager, Status};
pub use state::SessionState;
pub use transport::{Connector, FrameSink, SendOutcome, TransportSession};
pub use websocket::WebSocketConnector;
