//! Connection state tracking.
//!
//! A channel's connection state is purely observational: it backs a
//! "Live" / "Offline" indicator in the UI and must never gate
//! correctness-affecting logic. A missed notification while disconnected is
//! not retried, and there is no reconnect or backoff here.

use std::fmt;

use tokio::sync::watch;

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Two-valued connection flag for a push channel.
///
/// Mutated only by channel lifecycle callbacks: subscribe-acknowledged sets
/// `Connected`; a subscribe failure, error, or close sets `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// The source acknowledged the subscription; live updates are flowing.
    Connected,
    /// Not subscribed, or the channel faulted. Changes during this period
    /// are lost.
    #[default]
    Disconnected,
}

impl ConnectionState {
    /// Returns `true` if live updates are flowing.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "Live"),
            Self::Disconnected => write!(f, "Offline"),
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionTracker
// ---------------------------------------------------------------------------

/// Owner of a channel's [`ConnectionState`], broadcasting transitions to
/// any number of observers via a watch channel.
///
/// Starts `Disconnected`; a channel only becomes `Connected` once the
/// source acknowledges its subscription.
#[derive(Debug)]
pub struct ConnectionTracker {
    tx: watch::Sender<ConnectionState>,
}

impl ConnectionTracker {
    /// Creates a tracker in the `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::default());
        Self { tx }
    }

    /// Records a state transition. No-op if the state is unchanged.
    pub fn set(&self, state: ConnectionState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Returns the current state.
    #[must_use]
    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Returns a receiver that observes state transitions.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
