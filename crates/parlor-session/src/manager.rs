//! The session manager: every session this shard knows about.
//!
//! `SessionManager` is a plain single-owner structure. Gateways share it
//! through [`SharedSessions`](crate::SharedSessions), which puts it
//! behind an async mutex.

use std::collections::HashMap;

use parlor_protocol::PlayerId;
use rand::Rng;
use tracing::{debug, info};

use crate::{Session, SessionConfig, SessionError, SessionState};

/// Tracks connected, recently disconnected and expired sessions.
///
/// ```text
/// connect() ──→ disconnect() ──→ reconnect()
///                    │
///                    ▼ (grace elapsed)
///              expire_stale() ──→ cleanup_expired()
/// ```
pub struct SessionManager {
    sessions: HashMap<PlayerId, Session>,
    /// Reconnect token → owner. Kept in sync with `sessions`.
    tokens: HashMap<String, PlayerId>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            tokens: HashMap::new(),
            config,
        }
    }

    /// Opens a session for a player and issues a reconnect token.
    ///
    /// A disconnected or expired session for the same player is replaced
    /// and its old token invalidated.
    ///
    /// # Errors
    /// [`SessionError::AlreadyConnected`] if the player is connected.
    pub fn connect(&mut self, player_id: PlayerId) -> Result<&Session, SessionError> {
        if let Some(existing) = self.sessions.get(&player_id) {
            if existing.state.is_connected() {
                return Err(SessionError::AlreadyConnected(player_id));
            }
            self.tokens.remove(&existing.reconnect_token);
        }

        let token = generate_token();
        self.tokens.insert(token.clone(), player_id);
        info!(%player_id, "session opened");

        let session = Session {
            player_id,
            state: SessionState::Connected,
            reconnect_token: token,
        };
        let session: &Session = self.sessions.entry(player_id).insert_entry(session).into_mut();
        Ok(session)
    }

    /// Marks a player as disconnected and starts the grace period.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if the player has no session.
    pub fn disconnect(&mut self, player_id: PlayerId) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(&player_id)
            .ok_or(SessionError::NotFound(player_id))?;

        session.state = SessionState::Disconnected {
            since: tokio::time::Instant::now(),
        };
        info!(%player_id, "player disconnected, grace period started");
        Ok(())
    }

    /// Resumes a disconnected session using its reconnect token.
    ///
    /// # Errors
    /// - [`SessionError::InvalidToken`] if the token is unknown
    /// - [`SessionError::SessionExpired`] if the grace period has elapsed
    /// - [`SessionError::AlreadyConnected`] if the session never dropped
    pub fn reconnect(&mut self, token: &str) -> Result<&Session, SessionError> {
        let player_id = self
            .tokens
            .get(token)
            .copied()
            .ok_or(SessionError::InvalidToken)?;
        let grace = self.config.reconnect_grace;
        let session = self
            .sessions
            .get_mut(&player_id)
            .ok_or(SessionError::InvalidToken)?;

        match session.state {
            SessionState::Disconnected { since } if since.elapsed() >= grace => {
                session.state = SessionState::Expired;
                Err(SessionError::SessionExpired(player_id))
            }
            SessionState::Disconnected { .. } => {
                session.state = SessionState::Connected;
                info!(%player_id, "player reconnected");
                let session: &Session = session;
                Ok(session)
            }
            SessionState::Connected => Err(SessionError::AlreadyConnected(player_id)),
            SessionState::Expired => Err(SessionError::SessionExpired(player_id)),
        }
    }

    /// Expires every disconnected session whose grace period elapsed.
    /// Returns the players that expired.
    pub fn expire_stale(&mut self) -> Vec<PlayerId> {
        let grace = self.config.reconnect_grace;
        let mut expired = Vec::new();

        for session in self.sessions.values_mut() {
            if let SessionState::Disconnected { since } = session.state {
                if since.elapsed() >= grace {
                    session.state = SessionState::Expired;
                    expired.push(session.player_id);
                    debug!(player_id = %session.player_id, "session expired");
                }
            }
        }

        expired.sort_unstable();
        expired
    }

    /// Drops expired sessions and their tokens.
    pub fn cleanup_expired(&mut self) {
        let tokens = &mut self.tokens;
        self.sessions.retain(|_, session| {
            if matches!(session.state, SessionState::Expired) {
                tokens.remove(&session.reconnect_token);
                false
            } else {
                true
            }
        });
    }

    /// Whether the player has a connected session.
    pub fn is_online(&self, player_id: PlayerId) -> bool {
        self.sessions
            .get(&player_id)
            .is_some_and(|s| s.state.is_connected())
    }

    pub fn get(&self, player_id: &PlayerId) -> Option<&Session> {
        self.sessions.get(player_id)
    }

    /// Number of sessions in any state.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// 16 random bytes as lowercase hex.
fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
