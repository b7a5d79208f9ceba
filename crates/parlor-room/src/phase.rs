//! Ready and Settle phase templates.
//!
//! Every game's round cycle reduces to `Ready → game phases → Settle →
//! Ready`. These two functions implement the shared edges once; the
//! game passes a callback for its own part of each.

use parlor_protocol::{KickReason, RoomEvent, RoomPhase};
use tracing::{debug, info, warn};

use crate::{PhaseContext, PlayerRoomState, RoomError, RoomInfo, Seat};

/// What a template did on this Drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStep {
    /// The current phase's wake time hasn't been reached.
    Waiting,
    /// The phase was entered.
    Entered,
    /// Settle has run its course; the driver should enter Ready.
    Elapsed,
}

/// Enters Ready once the current holding phase is due.
///
/// Refreshes the denormalised config, sweeps connectivity (offline seats
/// are flagged for the kick sweep), resets round-scoped fields, assigns a
/// new round id, broadcasts the transition, runs `on_ready`, then
/// schedules `after_ready` once the configured Ready duration elapses.
pub async fn ready_phase<F>(
    cx: &mut PhaseContext,
    info: &mut RoomInfo,
    after_ready: RoomPhase,
    on_ready: F,
) -> Result<PhaseStep, RoomError>
where
    F: FnOnce(&mut PhaseContext, &mut RoomInfo) -> Result<(), RoomError> + Send,
{
    match cx.services.game_config(info.game_type, info.scene).await {
        Ok(config) => info.config = config,
        Err(err) => {
            warn!(room_id = %info.id, %err, "config refresh failed, keeping previous config")
        }
    }
    if !cx.is_due(info) {
        return Ok(PhaseStep::Waiting);
    }

    let room_id = info.id;
    let now_ms = cx.now_ms();
    let ready_secs = info.config.ready_secs;
    let escrow = info.kind.is_escrow();
    info.round_start_ms = now_ms;

    let players = info.occupants();
    for player_id in players {
        let online = cx.services.presence.is_online(player_id).await;
        let Some(seat) = info.seat_of_mut(player_id) else {
            continue;
        };
        seat.idle_rounds = if seat.state == PlayerRoomState::Playing {
            0
        } else {
            seat.idle_rounds + 1
        };
        seat.online = online;
        if online {
            if !(escrow && (seat.is_seat || seat.is_banker)) {
                seat.state = PlayerRoomState::Free;
            }
        } else {
            seat.mark_kick(KickReason::Offline);
            debug!(%room_id, %player_id, "offline at ready, flagged for kick");
        }
        if escrow {
            accrue_punish_time(seat, now_ms);
        }
        seat.reset_round(cx.bet_slots);
    }

    cx.outbox.broadcast(RoomEvent::PhaseChanged {
        room_id: info.id,
        from: info.cur_state,
        to: RoomPhase::Ready,
        ends_at_ms: now_ms + ready_secs * 1000,
    });

    info.total_bets = vec![0; cx.bet_slots];
    info.deck.clear();
    info.ready_count = 0;
    info.round_id = format!("{}-{}-{}", info.id.0, info.rounds_played + 1, now_ms);

    on_ready(cx, info)?;

    info.cur_state = RoomPhase::Ready;
    info.next_state = after_ready;
    info.wake_after_secs(now_ms, ready_secs);
    info!(room_id = %info.id, round = %info.round_id, "ready");
    Ok(PhaseStep::Entered)
}

/// Punish time accrues while a bought-in seat is online and ahead.
fn accrue_punish_time(seat: &mut Seat, now_ms: i64) {
    if seat.punish_mark_ms > 0 && now_ms > seat.punish_mark_ms {
        seat.punish_secs += (now_ms - seat.punish_mark_ms) / 1000;
    }
    seat.punish_mark_ms = if seat.online && seat.is_bought_in() && seat.all_win_or_lose > 0 {
        now_ms
    } else {
        0
    };
}

/// Enters Settle once the last game phase is due.
///
/// Runs `on_settle` (payouts), counts the game for every occupied seat and
/// schedules the return to Ready after the configured Settle duration.
/// When the room is already in Settle this only reports whether Settle
/// is over.
pub async fn settle_phase<F>(
    cx: &mut PhaseContext,
    info: &mut RoomInfo,
    on_settle: F,
) -> Result<PhaseStep, RoomError>
where
    F: FnOnce(&mut PhaseContext, &mut RoomInfo) -> Result<(), RoomError> + Send,
{
    if !cx.is_due(info) {
        return Ok(PhaseStep::Waiting);
    }
    if info.cur_state == RoomPhase::Settle {
        return Ok(PhaseStep::Elapsed);
    }

    let now_ms = cx.now_ms();
    let settle_secs = info.config.settle_secs;
    cx.outbox.broadcast(RoomEvent::PhaseChanged {
        room_id: info.id,
        from: info.cur_state,
        to: RoomPhase::Settle,
        ends_at_ms: now_ms + settle_secs * 1000,
    });

    on_settle(cx, info)?;

    for (_, seat) in info.seats.iter_mut() {
        seat.games_played += 1;
    }
    info.rounds_played += 1;
    info.cur_state = RoomPhase::Settle;
    info.next_state = RoomPhase::Ready;
    info.wake_after_secs(now_ms, settle_secs);
    info!(room_id = %info.id, round = %info.round_id, rounds = info.rounds_played, "settled");
    Ok(PhaseStep::Entered)
}
