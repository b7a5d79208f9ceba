//! Seat lifecycle: join, exit, kick, and the escrow up-seat, top-up and
//! down-seat operations.
//!
//! Everything here runs inside the room actor with exclusive access to
//! the room state. Validation happens before the first mutation, and
//! player-record writes that can fail happen before the seat changes, so
//! a rejected operation leaves the room untouched.

use std::sync::Arc;

use parlor_protocol::{KickReason, PlayerId, RoomCode, RoomEvent, RoomId, SceneId, SeatChange};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{
    Escapee, Outbox, PayMode, PlayerDirectory, PlayerRoomState, RoomAssignment, RoomError,
    RoomInfo, RoomKind, Seat, ServiceResult,
};

/// A request to join (or create) a room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub scene: SceneId,
    pub kind: RoomKind,
    /// Join this room rather than matchmaking.
    pub room_id: Option<RoomId>,
    /// Join the room behind this code.
    pub code: Option<RoomCode>,
    /// Used when the request creates a room.
    pub owner: Option<PlayerId>,
    pub pay_mode: PayMode,
}

impl JoinRequest {
    /// Ordinary matchmaking into a scene.
    pub fn scene(scene: SceneId, kind: RoomKind) -> Self {
        Self {
            scene,
            kind,
            ..Self::default()
        }
    }

    /// A request targeting one room.
    pub fn room(room_id: RoomId) -> Self {
        Self {
            room_id: Some(room_id),
            ..Self::default()
        }
    }

    pub fn is_explicit(&self) -> bool {
        self.room_id.is_some()
    }
}

/// Result of an up-seat request that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpSeatOutcome {
    Seated { index: usize },
    /// The player bought in before and the retained stake is below the
    /// minimum. Not an error: the client should offer a top-up.
    Insufficient { safe_money: i64, min_up_seat: i64 },
}

// ---------------------------------------------------------------------------
// Join / exit
// ---------------------------------------------------------------------------

/// Seats `player_id` and returns the seat index.
///
/// A player who already holds a seat here gets their index back without
/// any change.
pub(crate) async fn try_join(
    info: &mut RoomInfo,
    players: &dyn PlayerDirectory,
    player_id: PlayerId,
    request: &JoinRequest,
    bet_slots: usize,
    outbox: &mut Outbox,
    now_ms: i64,
) -> Result<usize, RoomError> {
    if info.dead {
        return Err(RoomError::RoomDead(info.id));
    }
    if let Some(index) = info.seats.find(player_id) {
        if let Some(seat) = info.seats.get_mut(index) {
            seat.online = true;
        }
        return Ok(index);
    }

    let mut record = players.load(player_id).await?;
    if let Some(assignment) = record.room {
        if assignment.room_id != info.id {
            return Err(RoomError::InOtherRoom {
                player: player_id,
                room: assignment.room_id,
            });
        }
    }

    if request.is_explicit() {
        if info.kind.is_code_accessible() && !info.in_first_ready() {
            return Err(RoomError::PhaseForbidden {
                action: "join",
                phase: info.cur_state,
            });
        }
        check_payer(info, players, player_id, record.balance).await?;
    } else if info.kind.is_matchmade() && record.last_room == Some(info.id) {
        return Err(RoomError::RecentlyLeft(player_id, info.id));
    }
    if record.balance < info.config.min_money {
        return Err(RoomError::InsufficientBalance {
            needed: info.config.min_money,
            available: record.balance,
        });
    }
    if info.is_full() {
        return Err(RoomError::RoomFull(info.id));
    }

    record.room = Some(RoomAssignment {
        game_type: info.game_type,
        shard: info.shard,
        room_id: info.id,
    });
    players.save(record.clone(), true).await?;

    let mut seat = Seat::new(player_id, record.name, record.balance);
    seat.avatar = record.avatar;
    seat.joined_ms = now_ms;
    seat.state = if info.cur_state.is_between_rounds() {
        PlayerRoomState::Free
    } else {
        PlayerRoomState::Watching
    };
    seat.bets = vec![0; bet_slots];
    if let Some(pos) = info.escapees.iter().position(|e| e.player_id == player_id) {
        let escapee = info.escapees.remove(pos);
        escapee.restore(&mut seat);
        info!(room_id = %info.id, %player_id, safe_money = seat.safe_money, "escrow resumed");
    }

    let min_index = if info.kind.is_escrow() { RoomInfo::TABLE_SEATS } else { 0 };
    let index = info.seats.seat_from(min_index, seat);
    info.refresh_seat_markers();

    outbox.broadcast(RoomEvent::SeatChanged {
        room_id: info.id,
        seat: index,
        player_id,
        change: SeatChange::Joined,
    });
    info!(room_id = %info.id, %player_id, seat = index, "player joined");
    Ok(index)
}

async fn check_payer(
    info: &RoomInfo,
    players: &dyn PlayerDirectory,
    player_id: PlayerId,
    balance: i64,
) -> Result<(), RoomError> {
    let fee = info.config.room_fee;
    if fee <= 0 {
        return Ok(());
    }
    match info.pay_mode {
        PayMode::Free => Ok(()),
        PayMode::Owner => {
            let Some(payer) = info.payer.or(info.owner) else {
                return Err(RoomError::PayerCannotCover);
            };
            let payer_balance = if payer == player_id {
                balance
            } else {
                players.load(payer).await?.balance
            };
            if payer_balance < fee {
                return Err(RoomError::PayerCannotCover);
            }
            Ok(())
        }
        PayMode::SplitAll => {
            let shares = info.capacity().max(1) as i64;
            let share = (fee + shares - 1) / shares;
            if balance < share {
                return Err(RoomError::PayerCannotCover);
            }
            Ok(())
        }
    }
}

/// Removes `player_id` from the room at their own request.
pub(crate) async fn try_exit(
    info: &mut RoomInfo,
    players: &dyn PlayerDirectory,
    player_id: PlayerId,
    outbox: &mut Outbox,
    now_ms: i64,
) -> Result<(), RoomError> {
    let index = info
        .seats
        .find(player_id)
        .ok_or(RoomError::NotInRoom(player_id, info.id))?;
    let Some(seat) = info.seats.get(index) else {
        return Err(RoomError::NotInRoom(player_id, info.id));
    };

    let forbidden = if info.kind.is_code_accessible() {
        !info.in_first_ready() && !(info.rounds_complete() && info.cur_state.is_between_rounds())
    } else if info.kind.is_hundred() {
        seat.state == PlayerRoomState::Playing
    } else {
        seat.state != PlayerRoomState::Watching && !info.cur_state.is_between_rounds()
    };
    if forbidden {
        return Err(RoomError::PhaseForbidden {
            action: "exit",
            phase: info.cur_state,
        });
    }

    release_player(players, player_id, info.id, seat.pending_delta).await?;

    let Some(seat) = info.seats.vacate(index) else {
        return Err(RoomError::NotInRoom(player_id, info.id));
    };
    if seat.is_bought_in() {
        capture_escapee(info, &seat, now_ms);
    }
    info.refresh_seat_markers();

    let event = RoomEvent::SeatChanged {
        room_id: info.id,
        seat: index,
        player_id,
        change: SeatChange::Left,
    };
    outbox.to_player(player_id, event.clone());
    outbox.broadcast(event);
    info!(room_id = %info.id, %player_id, seat = index, "player left");

    if info.kind.is_code_accessible() && info.seats.is_empty() && info.rounds_complete() {
        info.dead = true;
        info!(
            room_id = %info.id,
            rounds = info.rounds_played,
            "room finished and empty, marked dead"
        );
    }
    Ok(())
}

fn capture_escapee(info: &mut RoomInfo, seat: &Seat, now_ms: i64) {
    info.escapees.retain(|e| e.player_id != seat.player_id);
    info.escapees.push(Escapee::capture(seat, now_ms));
}

/// Clears the player's room assignment and writes back the pending
/// balance change.
pub(crate) async fn release_player(
    players: &dyn PlayerDirectory,
    player_id: PlayerId,
    room_id: RoomId,
    pending_delta: i64,
) -> ServiceResult<()> {
    let mut record = players.load(player_id).await?;
    if record.room.is_some_and(|a| a.room_id == room_id) {
        record.room = None;
    }
    record.last_room = Some(room_id);
    record.balance += pending_delta;
    players.save(record, true).await
}

// ---------------------------------------------------------------------------
// Kick
// ---------------------------------------------------------------------------

/// Vacates every seat flagged for removal.
///
/// A seat is removed when it carries a pending kick reason and its state
/// is [`PlayerRoomState::None`]. Player records are cleared in the
/// background; the seat is gone locally either way.
pub(crate) fn kick(
    info: &mut RoomInfo,
    players: &Arc<dyn PlayerDirectory>,
    outbox: &mut Outbox,
    now_ms: i64,
) -> Vec<PlayerId> {
    let targets: Vec<(usize, KickReason)> = info
        .seats
        .iter()
        .filter(|(_, seat)| seat.state == PlayerRoomState::None)
        .filter_map(|(index, seat)| seat.wait_kick.map(|reason| (index, reason)))
        .collect();

    let mut kicked = Vec::with_capacity(targets.len());
    for (index, reason) in targets {
        if let Some(player_id) = remove_seat(info, players, index, reason, outbox, now_ms) {
            kicked.push(player_id);
        }
    }
    if !kicked.is_empty() {
        info.refresh_seat_markers();
    }
    kicked
}

/// Vacates one seat for `reason`, keeping any escrow as an escapee.
pub(crate) fn remove_seat(
    info: &mut RoomInfo,
    players: &Arc<dyn PlayerDirectory>,
    index: usize,
    reason: KickReason,
    outbox: &mut Outbox,
    now_ms: i64,
) -> Option<PlayerId> {
    let seat = info.seats.vacate(index)?;
    let player_id = seat.player_id;
    if seat.is_bought_in() {
        capture_escapee(info, &seat, now_ms);
    }

    let directory = Arc::clone(players);
    let room_id = info.id;
    let delta = seat.pending_delta;
    tokio::spawn(async move {
        if let Err(err) = release_player(directory.as_ref(), player_id, room_id, delta).await {
            warn!(%room_id, %player_id, %err, "failed to clear room assignment after kick");
        }
    });

    let event = RoomEvent::SeatChanged {
        room_id,
        seat: index,
        player_id,
        change: SeatChange::Kicked { reason },
    };
    outbox.to_player(player_id, event.clone());
    outbox.broadcast(event);
    info!(%room_id, %player_id, seat = index, %reason, "player kicked");
    Some(player_id)
}

// ---------------------------------------------------------------------------
// Escrow seats
// ---------------------------------------------------------------------------

fn require_escrow(info: &RoomInfo) -> Result<(), RoomError> {
    if !info.kind.is_escrow() {
        return Err(RoomError::InvalidState(format!(
            "{:?} rooms have no escrow seats",
            info.kind
        )));
    }
    if info.seats.len() < RoomInfo::TABLE_SEATS {
        error!(room_id = %info.id, slots = info.seats.len(), "escrow table shorter than 8 seats");
        return Err(RoomError::Internal(format!(
            "escrow table of room {} has {} slots",
            info.id,
            info.seats.len()
        )));
    }
    Ok(())
}

/// Moves an observer to table seat `index`, buying in with `buy_in` on
/// the first sit-down.
pub(crate) fn try_up_seat(
    info: &mut RoomInfo,
    player_id: PlayerId,
    index: usize,
    buy_in: i64,
    outbox: &mut Outbox,
) -> Result<UpSeatOutcome, RoomError> {
    require_escrow(info)?;
    if index >= RoomInfo::TABLE_SEATS {
        return Err(RoomError::InvalidSeat { index });
    }
    if info.seats.get(index).is_some() {
        return Err(RoomError::SeatTaken { index });
    }
    let from = info
        .seats
        .find(player_id)
        .ok_or(RoomError::NotInRoom(player_id, info.id))?;
    if from < RoomInfo::TABLE_SEATS {
        return Err(RoomError::AlreadySeated(player_id, info.id));
    }

    let min = info.config.min_up_seat;
    let max = info.config.max_up_seat;
    let room_id = info.id;
    let Some(seat) = info.seats.get_mut(from) else {
        return Err(RoomError::NotInRoom(player_id, room_id));
    };

    if seat.is_bought_in() {
        if seat.safe_money < min {
            return Ok(UpSeatOutcome::Insufficient {
                safe_money: seat.safe_money,
                min_up_seat: min,
            });
        }
    } else {
        if buy_in < min || buy_in > max {
            return Err(RoomError::AmountOutOfRange { amount: buy_in, min, max });
        }
        if seat.balance < buy_in {
            return Err(RoomError::InsufficientBalance {
                needed: buy_in,
                available: seat.balance,
            });
        }
        seat.credit(-buy_in);
        seat.safe_money += buy_in;
        seat.all_safe_money += buy_in;
    }
    seat.is_seat = true;
    let safe_money = seat.safe_money;

    info.seats.swap(from, index);
    outbox.broadcast(RoomEvent::SeatChanged {
        room_id,
        seat: index,
        player_id,
        change: SeatChange::UpSeat { from, safe_money },
    });
    info!(%room_id, %player_id, from, to = index, safe_money, "player took a table seat");
    Ok(UpSeatOutcome::Seated { index })
}

/// Adds `amount` to a bought-in player's stake. Returns the new stake.
pub(crate) fn try_top_up(
    info: &mut RoomInfo,
    player_id: PlayerId,
    amount: i64,
    outbox: &mut Outbox,
) -> Result<i64, RoomError> {
    require_escrow(info)?;
    let room_id = info.id;
    let min_up_seat = info.config.min_up_seat;
    let max_up_seat = info.config.max_up_seat;
    let index = info
        .seats
        .find(player_id)
        .ok_or(RoomError::NotInRoom(player_id, room_id))?;
    let Some(seat) = info.seats.get_mut(index) else {
        return Err(RoomError::NotInRoom(player_id, room_id));
    };
    if !seat.is_bought_in() {
        return Err(RoomError::NotBoughtIn(player_id));
    }

    let max = max_up_seat - seat.safe_money;
    let min = (min_up_seat - seat.safe_money).max(1);
    if amount < min || amount > max {
        return Err(RoomError::AmountOutOfRange { amount, min, max });
    }
    if seat.balance < amount {
        return Err(RoomError::InsufficientBalance {
            needed: amount,
            available: seat.balance,
        });
    }

    seat.credit(-amount);
    seat.safe_money += amount;
    seat.all_safe_money += amount;
    let safe_money = seat.safe_money;

    outbox.broadcast(RoomEvent::SeatChanged {
        room_id,
        seat: index,
        player_id,
        change: SeatChange::ToppedUp { amount, safe_money },
    });
    Ok(safe_money)
}

/// Moves table seat `index` back to the observer pool and refunds its
/// stake into the balance. Returns the observer index.
///
/// Called by game logic (for example when a stake drops below the
/// minimum), never directly by clients.
pub fn down_seat(
    info: &mut RoomInfo,
    index: usize,
    outbox: &mut Outbox,
) -> Result<usize, RoomError> {
    require_escrow(info)?;
    if index >= RoomInfo::TABLE_SEATS {
        return Err(RoomError::InvalidSeat { index });
    }
    let room_id = info.id;
    let Some(seat) = info.seats.get_mut(index) else {
        return Err(RoomError::InvalidSeat { index });
    };
    let refund = seat.safe_money;
    seat.credit(refund);
    seat.safe_money = 0;
    seat.is_seat = false;
    seat.is_banker = false;
    seat.state = PlayerRoomState::Watching;
    let player_id = seat.player_id;

    let to = info.seats.free_index_from(RoomInfo::TABLE_SEATS);
    info.seats.swap(index, to);
    outbox.broadcast(RoomEvent::SeatChanged {
        room_id,
        seat: to,
        player_id,
        change: SeatChange::DownSeat { to },
    });
    info!(%room_id, %player_id, from = index, to, refund, "player moved to observers");
    Ok(to)
}

#[cfg(test)]
mod tests {
    use parlor_protocol::{GameType, ShardId};

    use super::*;
    use crate::GameConfig;

    fn grab_room() -> RoomInfo {
        let config = GameConfig {
            max_players: 20,
            min_up_seat: 1000,
            max_up_seat: 100_000,
            ..GameConfig::default()
        };
        RoomInfo::new(
            RoomId(1),
            GameType(1),
            SceneId(0),
            RoomKind::Grab,
            ShardId(0),
            config,
            0,
        )
    }

    fn observe(info: &mut RoomInfo, id: u64, balance: i64) -> usize {
        let seat = Seat::new(PlayerId(id), "p", balance);
        info.seats.seat_from(RoomInfo::TABLE_SEATS, seat)
    }

    fn stake(info: &RoomInfo, id: u64) -> (i64, i64) {
        let seat = info.seat_of(PlayerId(id)).unwrap();
        (seat.balance, seat.safe_money)
    }

    #[test]
    fn test_up_seat_first_buy_in_debits_balance() {
        let mut info = grab_room();
        observe(&mut info, 1, 5000);
        let mut outbox = Outbox::new();

        let outcome = try_up_seat(&mut info, PlayerId(1), 3, 2000, &mut outbox).unwrap();

        assert_eq!(outcome, UpSeatOutcome::Seated { index: 3 });
        assert_eq!(info.seats.find(PlayerId(1)), Some(3));
        assert_eq!(stake(&info, 1), (3000, 2000));
        let seat = info.seat_of(PlayerId(1)).unwrap();
        assert!(seat.is_seat);
        assert_eq!(seat.pending_delta, -2000);
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn test_up_seat_buy_in_below_minimum_rejected() {
        let mut info = grab_room();
        observe(&mut info, 1, 5000);

        let err = try_up_seat(&mut info, PlayerId(1), 0, 500, &mut Outbox::new()).unwrap_err();

        assert!(matches!(err, RoomError::AmountOutOfRange { amount: 500, min: 1000, .. }));
        assert_eq!(info.seats.find(PlayerId(1)), Some(8));
        assert_eq!(stake(&info, 1), (5000, 0));
    }

    #[test]
    fn test_up_seat_validates_index_and_occupancy() {
        let mut info = grab_room();
        observe(&mut info, 1, 5000);
        observe(&mut info, 2, 5000);
        try_up_seat(&mut info, PlayerId(1), 0, 1000, &mut Outbox::new()).unwrap();

        assert!(matches!(
            try_up_seat(&mut info, PlayerId(2), 8, 1000, &mut Outbox::new()),
            Err(RoomError::InvalidSeat { index: 8 })
        ));
        assert!(matches!(
            try_up_seat(&mut info, PlayerId(2), 0, 1000, &mut Outbox::new()),
            Err(RoomError::SeatTaken { index: 0 })
        ));
        assert!(matches!(
            try_up_seat(&mut info, PlayerId(1), 1, 1000, &mut Outbox::new()),
            Err(RoomError::AlreadySeated(..))
        ));
    }

    #[test]
    fn test_up_seat_returning_player_with_short_stake_is_insufficient() {
        let mut info = grab_room();
        let index = observe(&mut info, 1, 5000);
        let seat = info.seats.get_mut(index).unwrap();
        seat.all_safe_money = 2000;
        seat.safe_money = 400;

        let outcome = try_up_seat(&mut info, PlayerId(1), 2, 99_999, &mut Outbox::new()).unwrap();

        assert_eq!(
            outcome,
            UpSeatOutcome::Insufficient {
                safe_money: 400,
                min_up_seat: 1000
            }
        );
        assert_eq!(info.seats.find(PlayerId(1)), Some(index));
    }

    #[test]
    fn test_up_seat_rejected_outside_escrow_rooms() {
        let mut info = grab_room();
        info.kind = RoomKind::Match;
        assert!(matches!(
            try_up_seat(&mut info, PlayerId(1), 0, 1000, &mut Outbox::new()),
            Err(RoomError::InvalidState(_))
        ));
    }

    #[test]
    fn test_short_escrow_table_is_internal_error() {
        let mut info = grab_room();
        info.seats = crate::SeatTable::with_slots(3);
        assert!(matches!(
            try_up_seat(&mut info, PlayerId(1), 0, 1000, &mut Outbox::new()),
            Err(RoomError::Internal(_))
        ));
    }

    #[test]
    fn test_top_up_bounds() {
        let mut info = grab_room();
        observe(&mut info, 1, 200_000);
        try_up_seat(&mut info, PlayerId(1), 0, 1000, &mut Outbox::new()).unwrap();

        assert!(matches!(
            try_top_up(&mut info, PlayerId(1), 99_001, &mut Outbox::new()),
            Err(RoomError::AmountOutOfRange { max: 99_000, .. })
        ));
        assert!(matches!(
            try_top_up(&mut info, PlayerId(1), 0, &mut Outbox::new()),
            Err(RoomError::AmountOutOfRange { min: 1, .. })
        ));
        assert_eq!(try_top_up(&mut info, PlayerId(1), 4000, &mut Outbox::new()).unwrap(), 5000);
        assert_eq!(stake(&info, 1), (195_000, 5000));
    }

    #[test]
    fn test_top_up_under_minimum_must_cover_shortfall() {
        let mut info = grab_room();
        observe(&mut info, 1, 10_000);
        try_up_seat(&mut info, PlayerId(1), 0, 1000, &mut Outbox::new()).unwrap();
        info.seat_of_mut(PlayerId(1)).unwrap().safe_money = 300;

        assert!(matches!(
            try_top_up(&mut info, PlayerId(1), 500, &mut Outbox::new()),
            Err(RoomError::AmountOutOfRange { min: 700, .. })
        ));
        assert_eq!(try_top_up(&mut info, PlayerId(1), 700, &mut Outbox::new()).unwrap(), 1000);
    }

    #[test]
    fn test_top_up_requires_buy_in() {
        let mut info = grab_room();
        observe(&mut info, 1, 10_000);
        assert!(matches!(
            try_top_up(&mut info, PlayerId(1), 1000, &mut Outbox::new()),
            Err(RoomError::NotBoughtIn(_))
        ));
    }

    #[test]
    fn test_down_seat_refunds_stake_and_conserves_money() {
        let mut info = grab_room();
        observe(&mut info, 1, 5000);
        try_up_seat(&mut info, PlayerId(1), 2, 2000, &mut Outbox::new()).unwrap();
        try_top_up(&mut info, PlayerId(1), 500, &mut Outbox::new()).unwrap();
        let (balance, safe) = stake(&info, 1);
        assert_eq!(balance + safe, 5000);

        let to = down_seat(&mut info, 2, &mut Outbox::new()).unwrap();

        assert!(to >= RoomInfo::TABLE_SEATS);
        assert_eq!(info.seats.find(PlayerId(1)), Some(to));
        assert!(info.seats.get(2).is_none());
        assert_eq!(stake(&info, 1), (5000, 0));
        let seat = info.seat_of(PlayerId(1)).unwrap();
        assert!(!seat.is_seat);
        assert_eq!(seat.pending_delta, 0, "buy-in and refund cancel out");
    }

    #[test]
    fn test_down_seat_empty_index_is_invalid() {
        let mut info = grab_room();
        assert!(matches!(
            down_seat(&mut info, 4, &mut Outbox::new()),
            Err(RoomError::InvalidSeat { index: 4 })
        ));
    }
}
