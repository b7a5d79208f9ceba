//! The connectivity oracle consumed by the room layer.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use parlor_protocol::PlayerId;
use tokio::sync::Mutex;

use crate::{SessionConfig, SessionManager};

/// Answers "is this player connected right now?".
///
/// The room layer asks once per seat during the Ready sweep. Returns a
/// boxed future so rooms can hold the oracle as `Arc<dyn Presence>`.
pub trait Presence: Send + Sync + 'static {
    fn is_online(&self, player_id: PlayerId) -> BoxFuture<'static, bool>;
}

/// A [`SessionManager`] shared between gateways and rooms.
///
/// Cloning is cheap and every clone sees the same sessions.
#[derive(Clone)]
pub struct SharedSessions {
    inner: Arc<Mutex<SessionManager>>,
}

impl SharedSessions {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionManager::new(config))),
        }
    }

    /// Locks the manager for direct use.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, SessionManager> {
        self.inner.lock().await
    }
}

impl Default for SharedSessions {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Presence for SharedSessions {
    fn is_online(&self, player_id: PlayerId) -> BoxFuture<'static, bool> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { inner.lock().await.is_online(player_id) })
    }
}
