//! Contracts for the collaborators the room engine depends on.
//!
//! Every collaborator is an object-safe trait returning boxed futures so
//! the engine can hold them as `Arc<dyn ...>` and a deployment can plug
//! in whatever backend it runs. [`Services`] bundles them and is handed
//! to the room manager at construction.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parlor_protocol::{GameType, PlayerId, RoomEvent, RoomId, SceneId, ShardId};
use parlor_session::Presence;
use serde::{Deserialize, Serialize};

use crate::{GameConfig, ServiceResult};

/// Key/value persistence for room snapshots and room-code records.
pub trait RoomStore: Send + Sync + 'static {
    fn get(&self, table: &str, key: &str) -> BoxFuture<'static, ServiceResult<Option<Vec<u8>>>>;
    fn set(&self, table: &str, key: &str, value: Vec<u8>) -> BoxFuture<'static, ServiceResult<()>>;
    fn delete(&self, table: &str, keys: &[String]) -> BoxFuture<'static, ServiceResult<()>>;
    fn list_keys(&self, table: &str) -> BoxFuture<'static, ServiceResult<Vec<String>>>;
}

/// Where a player is seated, cluster-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomAssignment {
    pub game_type: GameType,
    pub shard: ShardId,
    pub room_id: RoomId,
}

/// A player's cluster-wide record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub name: String,
    pub avatar: String,
    pub balance: i64,
    /// The room the player currently occupies.
    pub room: Option<RoomAssignment>,
    /// The room the player most recently left.
    pub last_room: Option<RoomId>,
}

impl PlayerRecord {
    pub fn new(id: PlayerId, name: impl Into<String>, balance: i64) -> Self {
        Self {
            id,
            name: name.into(),
            avatar: String::new(),
            balance,
            room: None,
            last_room: None,
        }
    }
}

/// The player-record service. Implementations do their own per-player
/// locking.
pub trait PlayerDirectory: Send + Sync + 'static {
    fn load(&self, player_id: PlayerId) -> BoxFuture<'static, ServiceResult<PlayerRecord>>;
    fn save(&self, record: PlayerRecord, durable: bool) -> BoxFuture<'static, ServiceResult<()>>;
}

/// Push fan-out. Fire-and-forget: nothing waits for delivery.
pub trait Notifier: Send + Sync + 'static {
    fn push_to_player(&self, player_id: PlayerId, event: RoomEvent);
    fn broadcast(&self, event: RoomEvent, occupants: Vec<PlayerId>);

    /// Shard-wide announcements such as a new room.
    fn announce(&self, event: RoomEvent) {
        let _ = event;
    }
}

/// The live game-configuration source.
pub trait GameConfigSource: Send + Sync + 'static {
    fn get_config(
        &self,
        game_type: GameType,
        scene: SceneId,
    ) -> BoxFuture<'static, ServiceResult<BTreeMap<String, i64>>>;
}

/// Every collaborator a room needs.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn RoomStore>,
    pub players: Arc<dyn PlayerDirectory>,
    pub notifier: Arc<dyn Notifier>,
    pub configs: Arc<dyn GameConfigSource>,
    pub presence: Arc<dyn Presence>,
}

impl Services {
    /// Fetches and parses the configuration for (game type, scene).
    pub async fn game_config(
        &self,
        game_type: GameType,
        scene: SceneId,
    ) -> ServiceResult<GameConfig> {
        let values = self.configs.get_config(game_type, scene).await?;
        Ok(GameConfig::from_values(&values))
    }
}
