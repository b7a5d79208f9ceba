//! Session types: a player's connection as the server sees it.
//!
//! A session answers three questions about a player: whether they are
//! connected right now, how they can resume after a drop, and when they
//! dropped (so the grace period can run out).

use std::time::Duration;

use parlor_protocol::PlayerId;
use tokio::time::Instant;

/// Configuration for session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a disconnected player has to reconnect before the
    /// session expires. Zero expires sessions on the next sweep.
    pub reconnect_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_grace: Duration::from_secs(30),
        }
    }
}

/// The lifecycle of a player's session.
///
/// ```text
///   Connected ──(disconnect)──→ Disconnected ──(grace elapsed)──→ Expired
///       ↑                            │
///       └────────(reconnect)─────────┘
/// ```
///
/// Only `Connected` counts as online for the room sweep. A player inside
/// the grace period is offline as far as seating is concerned.
#[derive(Debug, Clone)]
pub enum SessionState {
    Connected,
    /// Dropped at `since`; may reconnect until `since + grace`.
    Disconnected { since: Instant },
    Expired,
}

impl SessionState {
    /// Returns `true` for [`SessionState::Connected`].
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// A single player's session.
#[derive(Debug, Clone)]
pub struct Session {
    pub player_id: PlayerId,
    pub state: SessionState,
    /// Secret the client presents to resume after a drop. 32 hex
    /// characters (128 random bits).
    pub reconnect_token: String,
}
