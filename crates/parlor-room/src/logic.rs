//! The `GameRules` trait, the extension point concrete games implement.
//!
//! A game supplies one driver that performs a single phase step per call.
//! The room calls it from every Drive, then runs the kick sweep, the
//! fallback wake and persistence itself. Most drivers are a `match` on
//! the current phase that delegates the shared edges to
//! [`ready_phase`](crate::ready_phase) and
//! [`settle_phase`](crate::settle_phase).

use std::future::Future;

use parlor_protocol::{PlayerId, Recipient, RoomEvent};
use parlor_tick::Clock;

use crate::{RoomError, RoomInfo, Seat, Services};

/// Events queued during a Drive or operation.
///
/// Flushed to the notifier after the state change is committed, with
/// recipients resolved against the occupants at that point.
#[derive(Debug, Default)]
pub struct Outbox {
    items: Vec<(Recipient, RoomEvent)>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, recipient: Recipient, event: RoomEvent) {
        self.items.push((recipient, event));
    }

    pub fn broadcast(&mut self, event: RoomEvent) {
        self.push(Recipient::All, event);
    }

    pub fn to_player(&mut self, player_id: PlayerId, event: RoomEvent) {
        self.push(Recipient::Player(player_id), event);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn events(&self) -> impl Iterator<Item = &RoomEvent> {
        self.items.iter().map(|(_, event)| event)
    }

    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, (Recipient, RoomEvent)> {
        self.items.drain(..)
    }
}

/// What a driver can reach while it runs.
pub struct PhaseContext {
    pub services: Services,
    pub clock: Clock,
    pub outbox: Outbox,
    /// Per-seat bet slots, from [`GameRules::bet_slots`].
    pub bet_slots: usize,
}

impl PhaseContext {
    pub fn new(services: Services, clock: Clock, bet_slots: usize) -> Self {
        Self {
            services,
            clock,
            outbox: Outbox::new(),
            bet_slots,
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Whether the room's scheduled wake has been reached.
    pub fn is_due(&self, info: &RoomInfo) -> bool {
        info.wake_ms() <= self.now_ms()
    }
}

/// The rules of one game type. Shared by every room of a manager.
pub trait GameRules: Send + Sync + 'static {
    /// Bet slots per seat and per room. Sizes the round-scoped bet arrays.
    fn bet_slots(&self) -> usize {
        1
    }

    /// Performs one phase step.
    ///
    /// Receives a copy of the room state. Returning `Some` replaces the
    /// room state with the returned one when the ids match; `None` leaves
    /// it untouched and only reschedules. An error is logged and the
    /// state is left untouched.
    fn drive(
        &self,
        cx: &mut PhaseContext,
        info: RoomInfo,
    ) -> impl Future<Output = Result<Option<RoomInfo>, RoomError>> + Send;

    /// Masks parts of the viewer's own seat in the reconnection view,
    /// for cards the server has not committed to revealing yet.
    fn mask_own_seat(&self, _info: &RoomInfo, _seat: &mut Seat) {}

    /// The part of the game scratch state every viewer may see.
    fn public_scratch(&self, _scratch: &serde_json::Value) -> serde_json::Value {
        serde_json::Value::Null
    }
}
