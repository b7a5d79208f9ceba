//! Shared vocabulary for Parlor.
//!
//! - **Types** ([`PlayerId`], [`RoomId`], [`RoomPhase`], [`RoomEvent`], ...)
//!   are identities and events that leave the room engine.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how snapshots are
//!   turned into bytes for the persistence collaborator.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Room engine (RoomInfo) → Protocol (Codec, RoomEvent) → collaborators
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    GameType, KickReason, PlayerId, Recipient, RoomCode, RoomEvent, RoomId, RoomPhase, SceneId,
    SeatChange, ShardId,
};
