//! Core protocol types shared by every Parlor layer.
//!
//! These are the values that leave the room engine: identities that
//! appear in persisted snapshots and player records, and the events the
//! engine hands to the notification collaborator.
//!
//! Nothing here knows about locks, timers or storage. The room layer
//! builds on top of these types.

use serde::{Deserialize, Serialize};

use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a player.
///
/// Newtype over `u64` so a `PlayerId` can never be passed where a
/// `RoomId` is expected. `#[serde(transparent)]` keeps the snapshot
/// representation a plain number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// A unique identifier for a room (one active table).
///
/// Room ids are unique across the shards of one game type: the owning
/// shard's id is folded into the high bits when the id is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// Which game a room plays (one `RoomManager` per game type and shard).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameType(pub u32);

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G-{}", self.0)
    }
}

/// A game variant ("scene"), e.g. a stake level. Ordinary matchmaking
/// only pairs players into rooms of the same scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneId(pub u32);

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// The server process ("shard") that owns a set of rooms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(pub u32);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard-{}", self.0)
    }
}

/// A human-shareable six digit room code.
///
/// Always in `100000..=999999`, so the decimal form never needs padding
/// and a leading zero can't be lost by a client that parses it as a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(pub u32);

impl RoomCode {
    /// Smallest valid code.
    pub const MIN: u32 = 100_000;
    /// Largest valid code.
    pub const MAX: u32 = 999_999;

    /// Returns `true` if the code has exactly six digits.
    pub fn is_valid(&self) -> bool {
        (Self::MIN..=Self::MAX).contains(&self.0)
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Room phase
// ---------------------------------------------------------------------------

/// The phase a room is in (`CurRoomState` / `NextRoomState`).
///
/// Every game cycles through
///
/// ```text
/// Init → Ready → Game(0..n) → Settle → Ready → ...
/// ```
///
/// `Ready` and `Settle` are shared by all games; the phases in between
/// are game specific and only identified by a small index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RoomPhase {
    /// Freshly created, before the first Drive.
    #[default]
    Init,
    /// Between rounds. Players may join, leave and get ready.
    Ready,
    /// A game-specific phase (dealing, betting, playing, ...).
    Game(u8),
    /// Payouts are computed and shown.
    Settle,
}

impl RoomPhase {
    /// Returns `true` when joining and leaving are unrestricted.
    pub fn is_between_rounds(&self) -> bool {
        matches!(self, Self::Init | Self::Ready)
    }
}

impl fmt::Display for RoomPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "Init"),
            Self::Ready => write!(f, "Ready"),
            Self::Game(step) => write!(f, "Game({step})"),
            Self::Settle => write!(f, "Settle"),
        }
    }
}

// ---------------------------------------------------------------------------
// Recipient: who should receive an event?
// ---------------------------------------------------------------------------

/// Specifies who should receive a room event.
///
/// Game logic queues `(Recipient, RoomEvent)` pairs; the room resolves
/// the recipient against its current occupants when it flushes them to
/// the notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Every occupant of the room.
    All,
    /// One specific player.
    Player(PlayerId),
    /// Every occupant except the given player.
    AllExcept(PlayerId),
}

// ---------------------------------------------------------------------------
// Kick reasons
// ---------------------------------------------------------------------------

/// Why the server removed a player from a seat.
///
/// Every kick broadcast carries one of these so clients can render a
/// message. `code()` is the stable numeric form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KickReason {
    /// Found offline during the Ready-phase sweep.
    Offline,
    /// Sat out too many rounds.
    Idle,
    /// Balance dropped below the table's floor.
    NotEnoughMoney,
    /// The room was dissolved by the dead-room sweep.
    Dissolved,
    /// Removed by the room owner.
    ByOwner,
    /// Removed for server maintenance.
    Maintenance,
}

impl KickReason {
    /// Stable numeric code for clients.
    pub fn code(&self) -> u32 {
        match self {
            Self::Offline => 1,
            Self::Idle => 2,
            Self::NotEnoughMoney => 3,
            Self::Dissolved => 4,
            Self::ByOwner => 5,
            Self::Maintenance => 6,
        }
    }
}

impl fmt::Display for KickReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Offline => "offline",
            Self::Idle => "idle",
            Self::NotEnoughMoney => "not enough money",
            Self::Dissolved => "room dissolved",
            Self::ByOwner => "removed by owner",
            Self::Maintenance => "maintenance",
        };
        f.write_str(text)
    }
}

// ---------------------------------------------------------------------------
// Room events
// ---------------------------------------------------------------------------

/// What happened to a seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SeatChange {
    /// A player took the seat.
    Joined,
    /// The player left voluntarily.
    Left,
    /// The server vacated the seat.
    Kicked { reason: KickReason },
    /// An observer moved to a table seat, staking `safe_money`.
    UpSeat { from: usize, safe_money: i64 },
    /// A table seat was moved back to the observer pool.
    DownSeat { to: usize },
    /// The seat's stake was topped up.
    ToppedUp { amount: i64, safe_money: i64 },
}

/// Events the room engine hands to the notification collaborator.
///
/// Fire-and-forget: nothing in the engine waits for delivery.
/// `#[serde(tag = "type")]` gives the flat `{ "type": "SeatChanged", ... }`
/// shape clients expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoomEvent {
    /// A room was created on this shard.
    RoomCreated {
        room_id: RoomId,
        game_type: GameType,
        scene: SceneId,
    },
    /// A seat changed occupant or stake.
    SeatChanged {
        room_id: RoomId,
        seat: usize,
        player_id: PlayerId,
        change: SeatChange,
    },
    /// The room moved from one phase to another. `ends_at_ms` is the
    /// wall-clock time the new phase is scheduled to end.
    PhaseChanged {
        room_id: RoomId,
        from: RoomPhase,
        to: RoomPhase,
        ends_at_ms: i64,
    },
    /// The room was dissolved and every seat refunded.
    Dissolved { room_id: RoomId },
    /// A game-specific event, already encoded by the game.
    Game {
        room_id: RoomId,
        name: String,
        payload: Vec<u8>,
    },
}

impl RoomEvent {
    /// The room the event belongs to.
    pub fn room_id(&self) -> RoomId {
        match self {
            Self::RoomCreated { room_id, .. }
            | Self::SeatChanged { room_id, .. }
            | Self::PhaseChanged { room_id, .. }
            | Self::Dissolved { room_id }
            | Self::Game { room_id, .. } => *room_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&PlayerId(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_room_id_display() {
        assert_eq!(RoomId(7).to_string(), "R-7");
    }

    #[test]
    fn test_room_code_display_is_six_digits() {
        let code = RoomCode(123_456);
        assert!(code.is_valid());
        assert_eq!(code.to_string(), "123456");
        assert!(!RoomCode(99_999).is_valid());
        assert!(!RoomCode(1_000_000).is_valid());
    }

    #[test]
    fn test_room_phase_between_rounds() {
        assert!(RoomPhase::Init.is_between_rounds());
        assert!(RoomPhase::Ready.is_between_rounds());
        assert!(!RoomPhase::Game(0).is_between_rounds());
        assert!(!RoomPhase::Settle.is_between_rounds());
    }

    #[test]
    fn test_room_phase_display() {
        assert_eq!(RoomPhase::Game(2).to_string(), "Game(2)");
        assert_eq!(RoomPhase::Settle.to_string(), "Settle");
    }

    #[test]
    fn test_kick_reason_codes_are_distinct() {
        let reasons = [
            KickReason::Offline,
            KickReason::Idle,
            KickReason::NotEnoughMoney,
            KickReason::Dissolved,
            KickReason::ByOwner,
            KickReason::Maintenance,
        ];
        let mut codes: Vec<u32> = reasons.iter().map(KickReason::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), reasons.len());
    }

    #[test]
    fn test_seat_changed_json_is_internally_tagged() {
        let event = RoomEvent::SeatChanged {
            room_id: RoomId(1),
            seat: 3,
            player_id: PlayerId(9),
            change: SeatChange::Kicked {
                reason: KickReason::Offline,
            },
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "SeatChanged");
        assert_eq!(json["seat"], 3);
        assert_eq!(json["change"]["type"], "Kicked");
        assert_eq!(json["change"]["reason"], "Offline");
    }

    #[test]
    fn test_event_room_id() {
        let event = RoomEvent::Dissolved { room_id: RoomId(5) };
        assert_eq!(event.room_id(), RoomId(5));
    }
}
