//! Room engine for Parlor.
//!
//! Each loaded room runs as an isolated Tokio task (actor model) that owns
//! its [`RoomInfo`] and a single wake timer. Timer-driven Drives and
//! caller-driven operations are commands on the same channel, so they are
//! strictly serialised per room.
//!
//! # Key types
//!
//! - [`GameRules`]: the trait a game implements (one phase step per Drive)
//! - [`RoomManager`]: creates, finds, reloads and sweeps rooms
//! - [`RoomHandle`]: sends commands to a running room actor
//! - [`RoomInfo`]: the persisted room snapshot, with its [`SeatTable`]
//! - [`ready_phase`] / [`settle_phase`]: the shared round edges
//! - [`Services`]: the collaborators (store, players, notifier, config,
//!   presence); [`memory`] has in-process implementations

mod codes;
mod config;
mod error;
mod info;
mod logic;
mod manager;
pub mod memory;
mod penalty;
mod phase;
mod room;
mod seats;
mod services;
mod view;

pub use codes::{CODE_ATTEMPTS, CODE_TABLE, RoomCodeEntry, RoomCodes};
pub use config::{GameConfig, ManagerSettings, keys};
pub use error::{RoomError, ServiceError, ServiceResult};
pub use info::{Card, Escapee, PayMode, PlayerRoomState, RoomInfo, RoomKind, Seat, SeatTable};
pub use logic::{GameRules, Outbox, PhaseContext};
pub use manager::RoomManager;
pub use penalty::{Settlement, settle_penalties};
pub use phase::{PhaseStep, ready_phase, settle_phase};
pub use room::{RoomHandle, RoomSummary};
pub use seats::{JoinRequest, UpSeatOutcome, down_seat};
pub use services::{
    GameConfigSource, Notifier, PlayerDirectory, PlayerRecord, RoomAssignment, RoomStore, Services,
};
pub use view::reconnection_view;
