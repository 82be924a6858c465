//! Session lifecycle as an explicit state object.
//!
//! Resources belong to the `Connecting` and `Connected` variants, so once a
//! session leaves them there is nothing left to send through.

use std::fmt;

/// Observable lifecycle state of the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Closed,
}

impl SessionState {
    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Closed, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (Self::Idle | Self::Connecting | Self::Connected, Self::Closed)
        )
    }

    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Phase of the session, owning whatever resources that phase needs.
pub(crate) enum Phase<T> {
    Idle,
    Connecting(T),
    Connected(T),
    Closed,
}

impl<T> Phase<T> {
    pub(crate) const fn state(&self) -> SessionState {
        match self {
            Self::Idle => SessionState::Idle,
            Self::Connecting(_) => SessionState::Connecting,
            Self::Connected(_) => SessionState::Connected,
            Self::Closed => SessionState::Closed,
        }
    }

    pub(crate) const fn live(&self) -> Option<&T> {
        match self {
            Self::Connecting(live) | Self::Connected(live) => Some(live),
            Self::Idle | Self::Closed => None,
        }
    }

    pub(crate) const fn live_mut(&mut self) -> Option<&mut T> {
        match self {
            Self::Connecting(live) | Self::Connected(live) => Some(live),
            Self::Idle | Self::Closed => None,
        }
    }

    /// `Connecting -> Connected`. Any other phase is left alone and `None`
    /// is returned.
    pub(crate) fn promote(&mut self) -> Option<&mut T> {
        if !matches!(self, Self::Connecting(_)) {
            return None;
        }
        if let Self::Connecting(live) = std::mem::replace(self, Self::Closed) {
            *self = Self::Connected(live);
        }
        self.live_mut()
    }

    /// Move out of a live phase into `Closed`, yielding its resources once.
    /// Idle and closed phases are unchanged.
    pub(crate) fn close(&mut self) -> Option<T> {
        if !self.state().is_live() {
            return None;
        }
        match std::mem::replace(self, Self::Closed) {
            Self::Connecting(live) | Self::Connected(live) => Some(live),
            Self::Idle | Self::Closed => None,
        }
    }
}
