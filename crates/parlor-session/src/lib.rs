//! Player session tracking for Parlor.
//!
//! The room engine needs one answer from this layer: is a player
//! connected right now? The Ready-phase sweep asks it for every seat and
//! marks offline seats for removal.
//!
//! 1. **Presence**: the [`Presence`] trait, the connectivity oracle
//!    the room layer consumes.
//! 2. **Session tracking**: [`SessionManager`] records who is
//!    connected, disconnected (inside the reconnection grace period) or
//!    expired.
//! 3. **Sharing**: [`SharedSessions`] wraps a manager behind a lock
//!    and implements [`Presence`] so gateways and rooms can share it.
//!
//! ```text
//! Room layer (above)      ← asks Presence during the Ready sweep
//!     ↕
//! Session layer (this)    ← connection state per player
//!     ↕
//! Protocol layer (below)  ← PlayerId
//! ```

mod error;
mod manager;
mod presence;
mod session;

pub use error::SessionError;
pub use manager::SessionManager;
pub use presence::{Presence, SharedSessions};
pub use session::{Session, SessionConfig, SessionState};
