//! The persisted room snapshot: [`RoomInfo`], its seats and escapees.
//!
//! A `RoomInfo` is owned by exactly one room actor while the room is
//! loaded. Everything here is plain data. The rules that change it live
//! in the seat, phase and penalty modules.

use std::collections::BTreeSet;

use parlor_protocol::{
    GameType, KickReason, PlayerId, RoomCode, RoomId, RoomPhase, SceneId, ShardId,
};
use serde::{Deserialize, Serialize};

use crate::GameConfig;

// ---------------------------------------------------------------------------
// Room categories
// ---------------------------------------------------------------------------

/// The category of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RoomKind {
    /// Ordinary matchmaking by scene.
    #[default]
    Match,
    /// Created by a player, joined by room code.
    Private,
    /// Created for a club, joined by room code.
    Club,
    /// Escrow-seat "system room": an 8 seat table plus an observer pool.
    Grab,
    /// Large-capacity room with no hidden information.
    Hundred,
}

impl RoomKind {
    /// Rooms reached through a room code rather than matchmaking.
    pub fn is_code_accessible(&self) -> bool {
        matches!(self, Self::Private | Self::Club)
    }

    pub fn is_escrow(&self) -> bool {
        matches!(self, Self::Grab)
    }

    pub fn is_hundred(&self) -> bool {
        matches!(self, Self::Hundred)
    }

    /// Rooms filled by scene matchmaking, where re-entering the room
    /// just left is refused.
    pub fn is_matchmade(&self) -> bool {
        matches!(self, Self::Match)
    }
}

/// Who pays the room fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PayMode {
    #[default]
    Free,
    /// The designated payer (the owner unless set otherwise) covers the
    /// whole fee.
    Owner,
    /// Every player covers an equal share.
    SplitAll,
}

/// A seat's participation state (`PlayerRoomState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlayerRoomState {
    /// Seated between rounds.
    #[default]
    Free,
    Ready,
    /// Joined mid-round or sitting in the observer pool.
    Watching,
    Playing,
    /// Gone. Combined with a pending kick reason this marks the seat
    /// for removal at the end of the current Drive.
    None,
}

/// A card or tile. The encoding is up to the game; [`Card::UNKNOWN`] is
/// the placeholder shown in place of hidden ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Card(pub u8);

impl Card {
    pub const UNKNOWN: Card = Card(u8::MAX);
}

// ---------------------------------------------------------------------------
// Seat
// ---------------------------------------------------------------------------

/// One occupied seat (`RoomPlayerInfo`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub player_id: PlayerId,
    pub name: String,
    pub avatar: String,
    pub state: PlayerRoomState,
    /// Mirror of the player's balance in the player directory.
    pub balance: i64,
    /// Balance change not yet written back to the player directory.
    #[serde(default)]
    pub pending_delta: i64,
    /// Set by game logic, consumed by the kick sweep.
    pub wait_kick: Option<KickReason>,
    pub online: bool,
    pub joined_ms: i64,

    // round-scoped
    pub hand: Vec<Card>,
    pub shown: Vec<Card>,
    pub bets: Vec<i64>,
    pub win_lose: i64,
    pub tax: i64,
    pub is_banker: bool,
    pub games_played: u32,
    /// Consecutive rounds the seat sat out.
    pub idle_rounds: u32,

    // escrow
    /// Money currently staked at the table.
    pub safe_money: i64,
    /// Lifetime amount brought to this seat. Positive means bought in.
    pub all_safe_money: i64,
    /// Lifetime net result at this seat.
    pub all_win_or_lose: i64,
    /// Accumulated seconds online while holding winnings.
    pub punish_secs: i64,
    /// When punish time accrual last started, 0 when not accruing.
    pub punish_mark_ms: i64,
    /// Holds one of the 8 table seats.
    pub is_seat: bool,
}

impl Seat {
    pub fn new(player_id: PlayerId, name: impl Into<String>, balance: i64) -> Self {
        Self {
            player_id,
            name: name.into(),
            avatar: String::new(),
            state: PlayerRoomState::Free,
            balance,
            pending_delta: 0,
            wait_kick: None,
            online: true,
            joined_ms: 0,
            hand: Vec::new(),
            shown: Vec::new(),
            bets: Vec::new(),
            win_lose: 0,
            tax: 0,
            is_banker: false,
            games_played: 0,
            idle_rounds: 0,
            safe_money: 0,
            all_safe_money: 0,
            all_win_or_lose: 0,
            punish_secs: 0,
            punish_mark_ms: 0,
            is_seat: false,
        }
    }

    /// Adjusts the balance mirror. The room writes the change back to the
    /// player directory after the current Drive or operation.
    pub fn credit(&mut self, amount: i64) {
        self.balance += amount;
        self.pending_delta += amount;
    }

    /// Flags the seat for removal by the next kick sweep.
    pub fn mark_kick(&mut self, reason: KickReason) {
        self.state = PlayerRoomState::None;
        self.wait_kick = Some(reason);
    }

    pub fn is_bought_in(&self) -> bool {
        self.all_safe_money > 0
    }

    pub(crate) fn reset_round(&mut self, bet_slots: usize) {
        self.hand.clear();
        self.shown.clear();
        self.bets.clear();
        self.bets.resize(bet_slots, 0);
        self.win_lose = 0;
        self.tax = 0;
    }
}

// ---------------------------------------------------------------------------
// SeatTable
// ---------------------------------------------------------------------------

/// Fixed-index seat slots with a free-list.
///
/// Indices are stable: a seat keeps its index until vacated, and a
/// vacated index is reused before the table grows. Serialises as a plain
/// list with `null` for empty slots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Option<Seat>>", into = "Vec<Option<Seat>>")]
pub struct SeatTable {
    slots: Vec<Option<Seat>>,
    free: BTreeSet<usize>,
}

impl SeatTable {
    /// A table with `len` empty slots.
    pub fn with_slots(len: usize) -> Self {
        Self {
            slots: vec![None; len],
            free: (0..len).collect(),
        }
    }

    /// Number of slots, occupied or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }

    pub fn occupied(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn get(&self, index: usize) -> Option<&Seat> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Seat> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Index of the player's seat.
    pub fn find(&self, player_id: PlayerId) -> Option<usize> {
        self.iter()
            .find(|(_, seat)| seat.player_id == player_id)
            .map(|(index, _)| index)
    }

    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.find(player_id).is_some()
    }

    /// Occupied seats in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Seat)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|seat| (i, seat)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Seat)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|seat| (i, seat)))
    }

    pub fn players(&self) -> Vec<PlayerId> {
        self.iter().map(|(_, seat)| seat.player_id).collect()
    }

    /// The lowest empty index at or above `min`, growing the table with
    /// empty slots when there is none.
    pub fn free_index_from(&mut self, min: usize) -> usize {
        if let Some(&index) = self.free.range(min..).next() {
            return index;
        }
        let index = self.slots.len().max(min);
        while self.slots.len() <= index {
            self.free.insert(self.slots.len());
            self.slots.push(None);
        }
        index
    }

    /// Puts `seat` at `index`, growing the table if needed. Returns the
    /// seat that was displaced, if any.
    pub fn place(&mut self, index: usize, seat: Seat) -> Option<Seat> {
        while self.slots.len() <= index {
            self.free.insert(self.slots.len());
            self.slots.push(None);
        }
        self.free.remove(&index);
        self.slots[index].replace(seat)
    }

    /// Seats a player in the first empty slot at or above `min`.
    pub fn seat_from(&mut self, min: usize, seat: Seat) -> usize {
        let index = self.free_index_from(min);
        self.place(index, seat);
        index
    }

    /// Empties the slot and returns its seat.
    pub fn vacate(&mut self, index: usize) -> Option<Seat> {
        let seat = self.slots.get_mut(index)?.take()?;
        self.free.insert(index);
        Some(seat)
    }

    /// Exchanges two slots, empty or not.
    pub fn swap(&mut self, a: usize, b: usize) {
        let needed = a.max(b);
        while self.slots.len() <= needed {
            self.free.insert(self.slots.len());
            self.slots.push(None);
        }
        self.slots.swap(a, b);
        for index in [a, b] {
            if self.slots[index].is_some() {
                self.free.remove(&index);
            } else {
                self.free.insert(index);
            }
        }
    }
}

impl From<Vec<Option<Seat>>> for SeatTable {
    fn from(slots: Vec<Option<Seat>>) -> Self {
        let free = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| i)
            .collect();
        Self { slots, free }
    }
}

impl From<SeatTable> for Vec<Option<Seat>> {
    fn from(table: SeatTable) -> Self {
        table.slots
    }
}

// ---------------------------------------------------------------------------
// Escapee
// ---------------------------------------------------------------------------

/// Escrow state of a player who left while still bought in (`QPlayer`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escapee {
    pub player_id: PlayerId,
    pub name: String,
    pub safe_money: i64,
    pub all_safe_money: i64,
    pub all_win_or_lose: i64,
    pub punish_secs: i64,
    pub left_ms: i64,
}

impl Escapee {
    pub fn capture(seat: &Seat, now_ms: i64) -> Self {
        let mut punish_secs = seat.punish_secs;
        if seat.punish_mark_ms > 0 && now_ms > seat.punish_mark_ms {
            punish_secs += (now_ms - seat.punish_mark_ms) / 1000;
        }
        Self {
            player_id: seat.player_id,
            name: seat.name.clone(),
            safe_money: seat.safe_money,
            all_safe_money: seat.all_safe_money,
            all_win_or_lose: seat.all_win_or_lose,
            punish_secs,
            left_ms: now_ms,
        }
    }

    /// Puts the escrow fields back into a fresh seat.
    pub fn restore(&self, seat: &mut Seat) {
        seat.safe_money = self.safe_money;
        seat.all_safe_money = self.all_safe_money;
        seat.all_win_or_lose = self.all_win_or_lose;
        seat.punish_secs = self.punish_secs;
        seat.punish_mark_ms = 0;
    }
}

// ---------------------------------------------------------------------------
// RoomInfo
// ---------------------------------------------------------------------------

/// Authoritative state of one room, persisted after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub game_type: GameType,
    pub scene: SceneId,
    pub kind: RoomKind,
    pub code: Option<RoomCode>,
    pub owner: Option<PlayerId>,
    pub shard: ShardId,
    pub created_ms: i64,
    pub dead: bool,

    // phase machine
    pub cur_state: RoomPhase,
    pub next_state: RoomPhase,
    /// Next wake, Unix seconds.
    pub do_time: i64,
    /// Optional finer next wake, Unix milliseconds. 0 when unused.
    pub milli_do_time: i64,
    pub phase_entered_ms: i64,
    pub prev_state: RoomPhase,
    pub prev_state_exit_ms: i64,

    pub config: GameConfig,
    pub seats: SeatTable,
    pub escapees: Vec<Escapee>,
    pub pay_mode: PayMode,
    pub payer: Option<PlayerId>,

    // round-scoped
    pub rounds_played: u32,
    pub round_id: String,
    pub round_start_ms: i64,
    /// Who starts the next round: the earliest joiner still seated.
    pub first_player: Option<PlayerId>,
    pub ready_count: usize,
    pub total_bets: Vec<i64>,
    pub deck: Vec<Card>,
    /// Game-specific state.
    #[serde(default)]
    pub scratch: serde_json::Value,
}

impl RoomInfo {
    /// Table seats in escrow rooms; indices at or above this are the
    /// observer pool.
    pub const TABLE_SEATS: usize = 8;

    pub fn new(
        id: RoomId,
        game_type: GameType,
        scene: SceneId,
        kind: RoomKind,
        shard: ShardId,
        config: GameConfig,
        now_ms: i64,
    ) -> Self {
        let seats = if kind.is_escrow() {
            SeatTable::with_slots(Self::TABLE_SEATS)
        } else {
            SeatTable::default()
        };
        Self {
            id,
            game_type,
            scene,
            kind,
            code: None,
            owner: None,
            shard,
            created_ms: now_ms,
            dead: false,
            cur_state: RoomPhase::Init,
            next_state: RoomPhase::Init,
            do_time: 0,
            milli_do_time: 0,
            phase_entered_ms: now_ms,
            prev_state: RoomPhase::Init,
            prev_state_exit_ms: 0,
            config,
            seats,
            escapees: Vec::new(),
            pay_mode: PayMode::Free,
            payer: None,
            rounds_played: 0,
            round_id: String::new(),
            round_start_ms: 0,
            first_player: None,
            ready_count: 0,
            total_bets: Vec::new(),
            deck: Vec::new(),
            scratch: serde_json::Value::Null,
        }
    }

    /// The effective next wake in Unix milliseconds.
    pub fn wake_ms(&self) -> i64 {
        (self.do_time * 1000).max(self.milli_do_time)
    }

    /// Sets the next wake `secs` seconds after `now_ms` and clears the
    /// millisecond wake.
    pub fn wake_after_secs(&mut self, now_ms: i64, secs: i64) {
        self.do_time = now_ms.div_euclid(1000) + secs;
        self.milli_do_time = 0;
    }

    /// Sets the next wake at millisecond precision.
    pub fn wake_at_ms(&mut self, at_ms: i64) {
        self.milli_do_time = at_ms;
        self.do_time = at_ms.div_euclid(1000);
    }

    pub fn capacity(&self) -> usize {
        self.config.max_players
    }

    pub fn is_full(&self) -> bool {
        self.seats.occupied() >= self.capacity()
    }

    pub fn occupants(&self) -> Vec<PlayerId> {
        self.seats.players()
    }

    pub fn seat_of(&self, player_id: PlayerId) -> Option<&Seat> {
        self.seats.find(player_id).and_then(|i| self.seats.get(i))
    }

    pub fn seat_of_mut(&mut self, player_id: PlayerId) -> Option<&mut Seat> {
        let index = self.seats.find(player_id)?;
        self.seats.get_mut(index)
    }

    /// The Ready phase of the first round, the only window in which
    /// club and private rooms accept joins and exits.
    pub fn in_first_ready(&self) -> bool {
        self.rounds_played == 0 && self.cur_state.is_between_rounds()
    }

    /// All configured rounds have been played.
    pub fn rounds_complete(&self) -> bool {
        self.config.max_rounds > 0 && self.rounds_played >= self.config.max_rounds
    }

    /// Recomputes the ready count and the "who starts" pointer after the
    /// seat set changed.
    pub fn refresh_seat_markers(&mut self) {
        self.ready_count = self
            .seats
            .iter()
            .filter(|(_, seat)| seat.state == PlayerRoomState::Ready)
            .count();
        let still_seated = self
            .first_player
            .is_some_and(|player| self.seats.contains(player));
        if !still_seated {
            self.first_player = self
                .seats
                .iter()
                .min_by_key(|(index, seat)| (seat.joined_ms, *index))
                .map(|(_, seat)| seat.player_id);
        }
    }
}
