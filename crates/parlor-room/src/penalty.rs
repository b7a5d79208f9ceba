//! Dead-room penalty settlement for escrow rooms.
//!
//! When an escrow room is dissolved, seats that sat on winnings for too
//! long give part of them back. The clawed-back pool goes to the seats
//! that lost money, in proportion to their losses, and every remaining
//! stake is refunded.

use parlor_protocol::PlayerId;
use serde::Serialize;
use tracing::{debug, info};

use crate::RoomInfo;

/// What a dissolve paid out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Settlement {
    /// Amount taken from each seat or escapee that exceeded the limits.
    pub clawbacks: Vec<(PlayerId, i64)>,
    /// Total clawed back.
    pub pool: i64,
    /// Refunds credited to seated players.
    pub refunds: Vec<(PlayerId, i64)>,
    /// Refunds owed to escapees, paid through the player directory.
    pub escapee_refunds: Vec<(PlayerId, i64)>,
    /// Part of the pool not handed out: everything when nobody lost,
    /// otherwise the integer remainder of the pro-rata split.
    pub undistributed: i64,
}

/// The escrow fields settlement works on, for seats and escapees alike.
struct Stake<'a> {
    player_id: PlayerId,
    safe_money: &'a mut i64,
    all_safe_money: i64,
    all_win_or_lose: i64,
    punish_secs: i64,
    is_escapee: bool,
}

/// Computes and applies the clawback and refunds for a dissolving room.
///
/// Seat refunds are credited to the seat balance (written back with the
/// next balance flush); escapee refunds are returned for the caller to
/// pay. Every stake is zero afterwards.
pub fn settle_penalties(info: &mut RoomInfo, now_ms: i64) -> Settlement {
    let punish_limit = info.config.punish_secs;
    let quota = info.config.punish_quota;
    let ratio = info.config.punish_ratio;
    let room_id = info.id;

    for (_, seat) in info.seats.iter_mut() {
        if seat.punish_mark_ms > 0 && now_ms > seat.punish_mark_ms {
            seat.punish_secs += (now_ms - seat.punish_mark_ms) / 1000;
        }
        seat.punish_mark_ms = 0;
    }

    let mut seat_refunds: Vec<(usize, i64)> = Vec::new();
    let mut settlement = Settlement::default();

    {
        let mut stakes: Vec<Stake<'_>> = Vec::new();
        let mut seat_indices: Vec<usize> = Vec::new();
        for (index, seat) in info.seats.iter_mut() {
            seat_indices.push(index);
            stakes.push(Stake {
                player_id: seat.player_id,
                all_safe_money: seat.all_safe_money,
                all_win_or_lose: seat.all_win_or_lose,
                punish_secs: seat.punish_secs,
                safe_money: &mut seat.safe_money,
                is_escapee: false,
            });
        }
        for escapee in info.escapees.iter_mut() {
            stakes.push(Stake {
                player_id: escapee.player_id,
                all_safe_money: escapee.all_safe_money,
                all_win_or_lose: escapee.all_win_or_lose,
                punish_secs: escapee.punish_secs,
                safe_money: &mut escapee.safe_money,
                is_escapee: true,
            });
        }

        for stake in stakes.iter_mut().filter(|s| s.all_safe_money > 0) {
            if stake.punish_secs > punish_limit && stake.all_win_or_lose > quota {
                let claw = (stake.all_win_or_lose * ratio / 100).clamp(0, *stake.safe_money);
                if claw > 0 {
                    *stake.safe_money -= claw;
                    settlement.pool += claw;
                    settlement.clawbacks.push((stake.player_id, claw));
                    debug!(%room_id, player_id = %stake.player_id, claw, "penalty clawback");
                }
            }
        }

        let total_loss: i64 = stakes
            .iter()
            .filter(|s| s.all_win_or_lose < 0)
            .map(|s| -s.all_win_or_lose)
            .sum();

        let mut distributed = 0;
        let mut seat_cursor = 0;
        for stake in stakes.iter_mut() {
            let mut refund = *stake.safe_money;
            if stake.all_win_or_lose < 0 && total_loss > 0 && settlement.pool > 0 {
                let share = (settlement.pool as i128 * (-stake.all_win_or_lose) as i128
                    / total_loss as i128) as i64;
                refund += share;
                distributed += share;
            }
            *stake.safe_money = 0;

            if stake.is_escapee {
                if refund > 0 {
                    settlement.escapee_refunds.push((stake.player_id, refund));
                }
            } else {
                if refund > 0 {
                    seat_refunds.push((seat_indices[seat_cursor], refund));
                    settlement.refunds.push((stake.player_id, refund));
                }
                seat_cursor += 1;
            }
        }
        settlement.undistributed = settlement.pool - distributed;
    }

    for (index, refund) in seat_refunds {
        if let Some(seat) = info.seats.get_mut(index) {
            seat.credit(refund);
        }
    }

    if settlement.undistributed > 0 {
        info!(
            %room_id,
            undistributed = settlement.undistributed,
            "penalty pool not fully distributed"
        );
    }
    settlement
}

#[cfg(test)]
mod tests {
    use parlor_protocol::{GameType, RoomId, SceneId, ShardId};

    use super::*;
    use crate::{Escapee, GameConfig, RoomKind, Seat};

    fn escrow_room() -> RoomInfo {
        let config = GameConfig {
            max_players: 20,
            punish_secs: 600,
            punish_quota: 1000,
            punish_ratio: 20,
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

    fn staked(id: u64, safe: i64, all_safe: i64, result: i64, punish: i64) -> Seat {
        let mut seat = Seat::new(PlayerId(id), "p", 0);
        seat.safe_money = safe;
        seat.all_safe_money = all_safe;
        seat.all_win_or_lose = result;
        seat.punish_secs = punish;
        seat.is_seat = true;
        seat
    }

    #[test]
    fn test_winner_clawback_goes_to_only_loser() {
        let mut info = escrow_room();
        info.seats.place(0, staked(1, 4000, 4000, 5000, 700));
        info.seats.place(1, staked(2, 500, 2500, -2000, 0));

        let s = settle_penalties(&mut info, 1_000_000);

        assert_eq!(s.clawbacks, vec![(PlayerId(1), 1000)]);
        assert_eq!(s.pool, 1000);
        assert_eq!(s.refunds, vec![(PlayerId(1), 3000), (PlayerId(2), 1500)]);
        assert_eq!(s.undistributed, 0);

        let a = info.seat_of(PlayerId(1)).unwrap();
        assert_eq!((a.balance, a.safe_money), (3000, 0));
        let b = info.seat_of(PlayerId(2)).unwrap();
        assert_eq!((b.balance, b.safe_money), (1500, 0));
    }

    #[test]
    fn test_no_clawback_below_punish_time_or_quota() {
        let mut info = escrow_room();
        info.seats.place(0, staked(1, 4000, 4000, 5000, 100));
        info.seats.place(1, staked(2, 4000, 4000, 900, 9000));
        info.seats.place(2, staked(3, 500, 2500, -2000, 0));

        let s = settle_penalties(&mut info, 0);

        assert!(s.clawbacks.is_empty());
        assert_eq!(s.pool, 0);
        assert_eq!(info.seat_of(PlayerId(3)).unwrap().balance, 500);
    }

    #[test]
    fn test_clawback_bounded_by_remaining_stake() {
        let mut info = escrow_room();
        info.seats.place(0, staked(1, 300, 4000, 5000, 700));
        info.seats.place(1, staked(2, 0, 1000, -1000, 0));

        let s = settle_penalties(&mut info, 0);

        assert_eq!(s.clawbacks, vec![(PlayerId(1), 300)]);
        assert_eq!(s.refunds, vec![(PlayerId(2), 300)]);
    }

    #[test]
    fn test_pool_without_losers_stays_undistributed() {
        let mut info = escrow_room();
        info.seats.place(0, staked(1, 4000, 4000, 5000, 700));

        let s = settle_penalties(&mut info, 0);

        assert_eq!(s.pool, 1000);
        assert_eq!(s.undistributed, 1000);
        assert_eq!(s.refunds, vec![(PlayerId(1), 3000)]);
    }

    #[test]
    fn test_pro_rata_split_with_remainder() {
        let mut info = escrow_room();
        info.seats.place(0, staked(1, 4000, 4000, 5000, 700));
        info.seats.place(1, staked(2, 0, 1000, -1000, 0));
        info.seats.place(2, staked(3, 0, 2000, -2000, 0));

        let s = settle_penalties(&mut info, 0);

        // 1000 split 1:2 → 333 + 666, 1 left over
        assert_eq!(s.refunds, vec![(PlayerId(1), 3000), (PlayerId(2), 333), (PlayerId(3), 666)]);
        assert_eq!(s.undistributed, 1);
    }

    #[test]
    fn test_escapees_are_settled_too() {
        let mut info = escrow_room();
        info.seats.place(0, staked(1, 0, 1000, -3000, 0));
        info.escapees.push(Escapee {
            player_id: PlayerId(9),
            name: "gone".into(),
            safe_money: 6000,
            all_safe_money: 6000,
            all_win_or_lose: 5000,
            punish_secs: 1200,
            left_ms: 0,
        });

        let s = settle_penalties(&mut info, 0);

        assert_eq!(s.clawbacks, vec![(PlayerId(9), 1000)]);
        assert_eq!(s.escapee_refunds, vec![(PlayerId(9), 5000)]);
        assert_eq!(s.refunds, vec![(PlayerId(1), 1000)]);
        assert_eq!(info.escapees[0].safe_money, 0);
    }

    #[test]
    fn test_running_punish_time_counts_at_dissolve() {
        let mut info = escrow_room();
        let mut winner = staked(1, 4000, 4000, 5000, 0);
        winner.punish_mark_ms = 1_000;
        info.seats.place(0, winner);
        info.seats.place(1, staked(2, 0, 1000, -1000, 0));

        let s = settle_penalties(&mut info, 1_000 + 601_000);

        assert_eq!(s.clawbacks, vec![(PlayerId(1), 1000)]);
    }
}
