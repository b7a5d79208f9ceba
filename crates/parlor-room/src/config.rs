//! Game configuration and room-manager settings.

use std::collections::BTreeMap;
use std::time::Duration;

use parlor_protocol::{GameType, ShardId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// GameConfig
// ---------------------------------------------------------------------------

/// Keys understood by [`GameConfig::from_values`].
pub mod keys {
    pub const MAX_PLAYERS: &str = "max_players";
    pub const READY_SECS: &str = "ready_secs";
    pub const SETTLE_SECS: &str = "settle_secs";
    pub const MIN_MONEY: &str = "min_money";
    pub const ROOM_FEE: &str = "room_fee";
    pub const MAX_ROUNDS: &str = "max_rounds";
    pub const MIN_UP_SEAT: &str = "min_up_seat";
    pub const MAX_UP_SEAT: &str = "max_up_seat";
    pub const PUNISH_SECS: &str = "punish_secs";
    pub const PUNISH_QUOTA: &str = "punish_quota";
    pub const PUNISH_RATIO: &str = "punish_ratio";
}

/// The denormalised game configuration a room carries in its snapshot.
///
/// Built from the `{name → value}` table the configuration collaborator
/// returns for a (game type, scene). Refreshed on every Ready entry so a
/// config change reaches running rooms at the next round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    /// Seat capacity. For escrow rooms this counts table and observers.
    pub max_players: usize,
    pub ready_secs: i64,
    pub settle_secs: i64,
    /// Entry balance floor.
    pub min_money: i64,
    /// What the paying party owes per room (see [`PayMode`](crate::PayMode)).
    pub room_fee: i64,
    /// Round count after which an empty club/private room is dissolved.
    /// Zero means unlimited.
    pub max_rounds: u32,
    pub min_up_seat: i64,
    pub max_up_seat: i64,
    /// Seconds online while holding winnings before the clawback applies.
    pub punish_secs: i64,
    /// Lifetime result a seat must exceed before the clawback applies.
    pub punish_quota: i64,
    /// Clawback percentage of the lifetime result.
    pub punish_ratio: i64,
    /// Keys this crate doesn't interpret, kept for game rules.
    #[serde(default)]
    pub extra: BTreeMap<String, i64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            max_players: 4,
            ready_secs: 5,
            settle_secs: 5,
            min_money: 0,
            room_fee: 0,
            max_rounds: 0,
            min_up_seat: 0,
            max_up_seat: 0,
            punish_secs: 600,
            punish_quota: 0,
            punish_ratio: 0,
            extra: BTreeMap::new(),
        }
    }
}

impl GameConfig {
    /// Parses a configuration table. Missing keys keep their defaults;
    /// negative counts and durations are clamped to zero.
    pub fn from_values(values: &BTreeMap<String, i64>) -> Self {
        let mut config = Self::default();
        for (key, &value) in values {
            match key.as_str() {
                keys::MAX_PLAYERS => config.max_players = value.max(0) as usize,
                keys::READY_SECS => config.ready_secs = value.max(0),
                keys::SETTLE_SECS => config.settle_secs = value.max(0),
                keys::MIN_MONEY => config.min_money = value,
                keys::ROOM_FEE => config.room_fee = value.max(0),
                keys::MAX_ROUNDS => config.max_rounds = value.clamp(0, u32::MAX as i64) as u32,
                keys::MIN_UP_SEAT => config.min_up_seat = value.max(0),
                keys::MAX_UP_SEAT => config.max_up_seat = value.max(0),
                keys::PUNISH_SECS => config.punish_secs = value.max(0),
                keys::PUNISH_QUOTA => config.punish_quota = value,
                keys::PUNISH_RATIO => config.punish_ratio = value.clamp(0, 100),
                _ => {
                    config.extra.insert(key.clone(), value);
                }
            }
        }
        config
    }

    /// A game-specific value not covered by the typed fields.
    pub fn get(&self, key: &str) -> Option<i64> {
        self.extra.get(key).copied()
    }
}

// ---------------------------------------------------------------------------
// ManagerSettings
// ---------------------------------------------------------------------------

/// Settings for one [`RoomManager`](crate::RoomManager).
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub game_type: GameType,
    pub shard: ShardId,
    /// Persistence table holding this shard's room snapshots.
    pub table: String,
    /// Default room limit used by callers that don't pass their own.
    pub max_rooms: usize,
    /// Period of the dead-room sweep.
    pub sweep_interval: Duration,
    /// Wake delay forced when a Drive makes no progress.
    pub fallback_wake: Duration,
    /// Command channel capacity per room actor.
    pub channel_size: usize,
    /// Drives slower than this are logged.
    pub drive_budget: Duration,
    /// Upper bound of the random delay added to each room's first wake
    /// after a restart.
    pub restart_jitter: Duration,
}

impl ManagerSettings {
    /// Settings with defaults for the given game type and shard. The
    /// snapshot table is `rooms:{game}:{shard}`.
    pub fn new(game_type: GameType, shard: ShardId) -> Self {
        Self {
            game_type,
            shard,
            table: format!("rooms:{}:{}", game_type.0, shard.0),
            max_rooms: 1000,
            sweep_interval: Duration::from_secs(60),
            fallback_wake: Duration::from_secs(5),
            channel_size: 64,
            drive_budget: Duration::from_millis(50),
            restart_jitter: Duration::from_millis(500),
        }
    }
}
