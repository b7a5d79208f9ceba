//! # Parlor
//!
//! Server-authoritative room engine for multiplayer card tables.
//!
//! A game implements the [`GameRules`](parlor_room::GameRules) trait, one
//! phase step per Drive, and the engine handles rooms, seats, escrow,
//! timers and persistence. This crate ties the layers into a shard
//! process:
//!
//! - [`ShardSettings`]: JSON settings with built-in defaults
//! - [`telemetry::init`]: the tracing subscriber
//! - [`Shard`]: reload, restart and sweep the rooms of one game type
//! - [`Gateway`]: join/exit entry points that forward to a game
//!   component through a [`ComponentRouter`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parlor::prelude::*;
//!
//! // Implement GameRules for your game, then:
//! // let settings = ShardSettings::load();
//! // parlor::telemetry::init(&settings.log_filter);
//! // let shard = ShardBuilder::new(settings).build(services, MyGame);
//! // shard.start().await?;
//! // shard.run().await
//! ```

mod error;
mod gateway;
mod server;
mod settings;
pub mod telemetry;

pub use error::ParlorError;
pub use gateway::{ComponentRouter, Dispatch, Gateway, JoinOutcome};
pub use server::{Shard, ShardBuilder, StartReport};
pub use settings::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH, ShardSettings};

pub use parlor_protocol as protocol;
pub use parlor_room as room;
pub use parlor_session as session;
pub use parlor_tick as tick;

pub mod prelude {
    pub use crate::{
        ComponentRouter, Dispatch, Gateway, JoinOutcome, ParlorError, Shard, ShardBuilder,
        ShardSettings,
    };
    pub use parlor_protocol::{GameType, PlayerId, RoomEvent, RoomId, RoomPhase, SceneId, ShardId};
    pub use parlor_room::{
        GameRules, JoinRequest, Outbox, PhaseContext, RoomError, RoomInfo, RoomKind, Services,
        ready_phase, settle_phase,
    };
}
