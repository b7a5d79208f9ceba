//! Room-code registry: six-digit codes for club and private rooms.

use std::sync::Arc;

use parlor_protocol::{Codec, GameType, JsonCodec, PlayerId, RoomCode, RoomId, ShardId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{RoomKind, RoomStore, ServiceError, ServiceResult};

/// Store table holding room-code records.
pub const CODE_TABLE: &str = "room_codes";

/// Draws before giving up on finding an unused code.
pub const CODE_ATTEMPTS: u32 = 10;

/// What a room code points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomCodeEntry {
    pub room_id: RoomId,
    pub game_type: GameType,
    pub shard: ShardId,
    pub kind: RoomKind,
    pub owner: Option<PlayerId>,
    pub created_ms: i64,
}

/// Allocates, resolves and frees room codes in the persistence store.
#[derive(Clone)]
pub struct RoomCodes {
    store: Arc<dyn RoomStore>,
}

impl RoomCodes {
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self { store }
    }

    /// Draws an unused code and records `entry` under it.
    ///
    /// # Errors
    /// [`ServiceError::CodeSpaceExhausted`] when every draw collided, or
    /// the store's own failure.
    pub async fn create(&self, entry: &RoomCodeEntry) -> ServiceResult<RoomCode> {
        let bytes = JsonCodec.encode(entry)?;
        for attempt in 1..=CODE_ATTEMPTS {
            let code = draw_code();
            let key = code.to_string();
            if self.store.get(CODE_TABLE, &key).await?.is_some() {
                debug!(%code, attempt, "room code collision");
                continue;
            }
            self.store.set(CODE_TABLE, &key, bytes.clone()).await?;
            info!(%code, room_id = %entry.room_id, "room code assigned");
            return Ok(code);
        }
        Err(ServiceError::CodeSpaceExhausted {
            attempts: CODE_ATTEMPTS,
        })
    }

    pub async fn lookup(&self, code: RoomCode) -> ServiceResult<Option<RoomCodeEntry>> {
        match self.store.get(CODE_TABLE, &code.to_string()).await? {
            Some(bytes) => Ok(Some(JsonCodec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, code: RoomCode) -> ServiceResult<()> {
        self.store.delete(CODE_TABLE, &[code.to_string()]).await
    }
}

fn draw_code() -> RoomCode {
    RoomCode(rand::rng().random_range(RoomCode::MIN..=RoomCode::MAX))
}
