//! Reconnection view: what a joining or reconnecting client gets to see.

use parlor_protocol::PlayerId;

use crate::{Card, GameRules, RoomInfo};

/// Builds the view of `info` for `viewer`.
///
/// Hundred-player rooms have no hidden information and are returned
/// as-is. Otherwise every other seat's hand and the deck are replaced by
/// same-length runs of [`Card::UNKNOWN`], so client indexing still lines
/// up, and the escapee list and private bookkeeping are dropped. The
/// viewer's own seat is kept apart from whatever the game masks through
/// [`GameRules::mask_own_seat`].
///
/// Pure: calling it twice without a mutation in between yields the same
/// view.
pub fn reconnection_view<G: GameRules>(info: &RoomInfo, viewer: PlayerId, rules: &G) -> RoomInfo {
    if info.kind.is_hundred() {
        return info.clone();
    }

    let mut view = info.clone();
    for (_, seat) in view.seats.iter_mut() {
        if seat.player_id == viewer {
            rules.mask_own_seat(info, seat);
            continue;
        }
        seat.hand = vec![Card::UNKNOWN; seat.hand.len()];
        seat.pending_delta = 0;
        seat.punish_secs = 0;
        seat.punish_mark_ms = 0;
        seat.wait_kick = None;
    }
    view.deck = vec![Card::UNKNOWN; info.deck.len()];
    view.escapees.clear();
    view.scratch = rules.public_scratch(&info.scratch);
    view
}

#[cfg(test)]
mod tests {
    use parlor_protocol::{GameType, RoomId, RoomPhase, SceneId, ShardId};

    use super::*;
    use crate::{Escapee, GameConfig, PhaseContext, RoomError, RoomKind, Seat};

    struct PeekGame;

    impl GameRules for PeekGame {
        async fn drive(
            &self,
            _cx: &mut PhaseContext,
            _info: RoomInfo,
        ) -> Result<Option<RoomInfo>, RoomError> {
            Ok(None)
        }

        fn mask_own_seat(&self, info: &RoomInfo, seat: &mut Seat) {
            // The last card stays face down until the showdown.
            if info.cur_state == RoomPhase::Game(1) {
                if let Some(last) = seat.hand.last_mut() {
                    *last = Card::UNKNOWN;
                }
            }
        }
    }

    fn room(kind: RoomKind) -> RoomInfo {
        let mut info = RoomInfo::new(
            RoomId(1),
            GameType(1),
            SceneId(0),
            kind,
            ShardId(0),
            GameConfig::default(),
            0,
        );
        let mut a = Seat::new(PlayerId(1), "a", 100);
        a.hand = vec![Card(3), Card(4), Card(5)];
        let mut b = Seat::new(PlayerId(2), "b", 200);
        b.hand = vec![Card(7), Card(8)];
        b.shown = vec![Card(8)];
        info.seats.seat_from(0, a);
        info.seats.seat_from(0, b);
        info.deck = vec![Card(1), Card(2)];
        info.escapees.push(Escapee {
            player_id: PlayerId(9),
            name: "gone".into(),
            safe_money: 10,
            all_safe_money: 10,
            all_win_or_lose: 0,
            punish_secs: 0,
            left_ms: 0,
        });
        info.scratch = serde_json::json!({ "secret": 1 });
        info
    }

    #[test]
    fn test_view_hides_other_hands_keeping_length() {
        let info = room(RoomKind::Match);
        let view = reconnection_view(&info, PlayerId(1), &PeekGame);

        let own = view.seat_of(PlayerId(1)).unwrap();
        assert_eq!(own.hand, vec![Card(3), Card(4), Card(5)]);

        let other = view.seat_of(PlayerId(2)).unwrap();
        assert_eq!(other.hand, vec![Card::UNKNOWN; 2]);
        assert_eq!(other.shown, vec![Card(8)], "shown cards are public");
        assert_eq!(other.balance, 200);

        assert_eq!(view.deck, vec![Card::UNKNOWN; 2]);
        assert!(view.escapees.is_empty());
        assert_eq!(view.scratch, serde_json::Value::Null);
    }

    #[test]
    fn test_view_applies_own_seat_mask() {
        let mut info = room(RoomKind::Match);
        info.cur_state = RoomPhase::Game(1);
        let view = reconnection_view(&info, PlayerId(1), &PeekGame);

        let own = view.seat_of(PlayerId(1)).unwrap();
        assert_eq!(own.hand, vec![Card(3), Card(4), Card::UNKNOWN]);
    }

    #[test]
    fn test_view_is_idempotent() {
        let info = room(RoomKind::Match);
        let first = reconnection_view(&info, PlayerId(2), &PeekGame);
        let second = reconnection_view(&info, PlayerId(2), &PeekGame);
        assert_eq!(first, second);
    }

    #[test]
    fn test_hundred_room_view_is_unfiltered() {
        let info = room(RoomKind::Hundred);
        let view = reconnection_view(&info, PlayerId(1), &PeekGame);
        assert_eq!(view, info);
    }
}
