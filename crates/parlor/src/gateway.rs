//! Generic join/exit entry points.
//!
//! A request handler knows which game component and method should see a
//! join or an exit but not which room the player belongs in. The gateway
//! locates (or creates) the room, seats or unseats the player, and then
//! forwards the call to the game component through a [`ComponentRouter`].
//!
//! Connection state goes through the gateway too: a dropped player who
//! comes back with their reconnect token is put back in their seat and
//! handed the room as they may see it.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use parlor_protocol::{PlayerId, RoomId};
use parlor_room::{GameRules, JoinRequest, RoomError, RoomInfo, RoomManager, ServiceError};
use parlor_session::SharedSessions;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::ParlorError;

/// A call into a game's rule-engine component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub component: String,
    pub method: String,
    pub player_id: PlayerId,
    pub room_id: RoomId,
    pub payload: Value,
}

/// The routing fabric that reaches game components.
pub trait ComponentRouter: Send + Sync + 'static {
    fn dispatch(&self, call: Dispatch) -> BoxFuture<'static, Result<Value, ServiceError>>;
}

/// Result of a successful [`Gateway::join`].
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    /// The reconnection view of the room joined.
    pub room: RoomInfo,
    /// What the component answered.
    pub reply: Value,
}

/// Join/exit entry points for one shard's rooms.
pub struct Gateway<G: GameRules> {
    rooms: Arc<RoomManager<G>>,
    sessions: SharedSessions,
    router: Arc<dyn ComponentRouter>,
}

impl<G: GameRules> Clone for Gateway<G> {
    fn clone(&self) -> Self {
        Self {
            rooms: Arc::clone(&self.rooms),
            sessions: self.sessions.clone(),
            router: Arc::clone(&self.router),
        }
    }
}

impl<G: GameRules> Gateway<G> {
    pub fn new(
        rooms: Arc<RoomManager<G>>,
        sessions: SharedSessions,
        router: Arc<dyn ComponentRouter>,
    ) -> Self {
        Self {
            rooms,
            sessions,
            router,
        }
    }

    /// Opens a session for `player_id`. Returns the reconnect token.
    pub async fn connect(&self, player_id: PlayerId) -> Result<String, ParlorError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.connect(player_id)?;
        Ok(session.reconnect_token.clone())
    }

    /// Starts the player's reconnect grace period. Their seat is kept
    /// until the next Ready sweep finds them offline.
    pub async fn disconnect(&self, player_id: PlayerId) -> Result<(), ParlorError> {
        self.sessions.lock().await.disconnect(player_id)?;
        Ok(())
    }

    /// Resumes a dropped session and puts the player back in their seat.
    ///
    /// Returns the reconnection view of the player's room, or `None` when
    /// they no longer hold a seat on this shard.
    pub async fn reconnect(&self, token: &str) -> Result<Option<RoomInfo>, ParlorError> {
        let player_id = self.sessions.lock().await.reconnect(token)?.player_id;
        let handle = match self.rooms.room_of(player_id).await {
            Ok(handle) => handle,
            Err(RoomError::NotInAnyRoom(_) | RoomError::NotFound(_)) => {
                debug!(%player_id, "reconnected without a seat");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let view = handle
            .try_join(player_id, JoinRequest::room(handle.room_id()))
            .await?;
        info!(%player_id, room_id = %view.id, "player back in room");
        Ok(Some(view))
    }

    /// Seats `player_id` and dispatches `component.method` for the room.
    ///
    /// When no existing room takes the player a room is created for the
    /// request and the join is retried against it.
    pub async fn join(
        &self,
        player_id: PlayerId,
        request: &JoinRequest,
        component: &str,
        method: &str,
        payload: Value,
    ) -> Result<JoinOutcome, ParlorError> {
        let room = match self.rooms.join_room(player_id, request).await? {
            Some(room) => room,
            None => {
                let room_id = self.rooms.create_room(request).await?;
                debug!(%player_id, %room_id, "no open room, created one");
                let retry = JoinRequest {
                    room_id: Some(room_id),
                    code: None,
                    ..request.clone()
                };
                self.rooms
                    .join_room(player_id, &retry)
                    .await?
                    .ok_or_else(|| {
                        RoomError::Internal(format!("join into fresh room {room_id} declined"))
                    })?
            }
        };

        let reply = self
            .router
            .dispatch(Dispatch {
                component: component.to_string(),
                method: method.to_string(),
                player_id,
                room_id: room.id,
                payload,
            })
            .await?;
        info!(%player_id, room_id = %room.id, component, method, "gateway join dispatched");
        Ok(JoinOutcome { room, reply })
    }

    /// Unseats `player_id` and dispatches `component.method` for the room
    /// they left.
    pub async fn exit(
        &self,
        player_id: PlayerId,
        component: &str,
        method: &str,
        payload: Value,
    ) -> Result<Value, ParlorError> {
        let room_id = self.rooms.room_of(player_id).await?.room_id();
        self.rooms.exit_room(player_id).await?;

        let reply = self
            .router
            .dispatch(Dispatch {
                component: component.to_string(),
                method: method.to_string(),
                player_id,
                room_id,
                payload,
            })
            .await?;
        info!(%player_id, %room_id, component, method, "gateway exit dispatched");
        Ok(reply)
    }
}
