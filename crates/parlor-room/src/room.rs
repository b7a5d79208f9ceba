//! Room actor: one Tokio task per loaded room.
//!
//! The actor owns its [`RoomInfo`] outright and serves one command at a
//! time from an mpsc channel, interleaved with its single wake timer. A
//! Drive and a Do can therefore never overlap on the same room, and the
//! kick sweep, balance flush and save of one command are observed as a
//! unit from outside.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use parlor_protocol::{
    Codec, JsonCodec, KickReason, PlayerId, Recipient, RoomCode, RoomEvent, RoomId, RoomPhase,
    SceneId,
};
use parlor_tick::{Clock, WakeConfig, WakeTimer};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::seats::{self, JoinRequest, UpSeatOutcome};
use crate::{
    GameRules, Outbox, PhaseContext, PlayerDirectory, RoomError, RoomInfo, RoomKind,
    ServiceResult, Services, Settlement, reconnection_view, settle_penalties,
};

/// What the registry knows about a room without asking it.
///
/// Published by the actor after every command and every Drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub id: RoomId,
    pub kind: RoomKind,
    pub scene: SceneId,
    pub code: Option<RoomCode>,
    pub phase: RoomPhase,
    pub occupied: usize,
    pub capacity: usize,
    pub dead: bool,
    pub rounds_played: u32,
    pub owner: Option<PlayerId>,
}

impl RoomSummary {
    pub fn of(info: &RoomInfo) -> Self {
        Self {
            id: info.id,
            kind: info.kind,
            scene: info.scene,
            code: info.code,
            phase: info.cur_state,
            occupied: info.seats.occupied(),
            capacity: info.capacity(),
            dead: info.dead,
            rounds_played: info.rounds_played,
            owner: info.owner,
        }
    }

    pub fn is_full(&self) -> bool {
        self.occupied >= self.capacity
    }
}

/// Everything a room actor shares with its manager.
pub(crate) struct RoomEnv {
    pub services: Services,
    pub clock: Clock,
    /// Store table for snapshots.
    pub table: String,
    pub fallback_wake: Duration,
    pub wake: WakeConfig,
}

/// Store key of a room snapshot.
pub(crate) fn snapshot_key(room_id: RoomId) -> String {
    room_id.0.to_string()
}

type Reply<T> = oneshot::Sender<Result<T, RoomError>>;
type AnyReply = Box<dyn Any + Send>;
type RoomOp = Box<dyn FnOnce(&mut RoomInfo, &mut Outbox) -> Result<AnyReply, RoomError> + Send>;

pub(crate) enum RoomCommand {
    Drive {
        done: oneshot::Sender<()>,
    },
    Join {
        player_id: PlayerId,
        request: JoinRequest,
        reply: Reply<RoomInfo>,
    },
    Exit {
        player_id: PlayerId,
        reply: Reply<()>,
    },
    UpSeat {
        player_id: PlayerId,
        index: usize,
        buy_in: i64,
        reply: Reply<UpSeatOutcome>,
    },
    TopUp {
        player_id: PlayerId,
        amount: i64,
        reply: Reply<i64>,
    },
    /// A caller-driven operation (Do).
    Apply {
        op: RoomOp,
        reply: Reply<AnyReply>,
    },
    View {
        player_id: PlayerId,
        reply: oneshot::Sender<RoomInfo>,
    },
    Snapshot {
        reply: oneshot::Sender<RoomInfo>,
    },
    Dissolve {
        reply: oneshot::Sender<Settlement>,
    },
    /// Arm the timer from the persisted wake time if nothing is armed.
    Start {
        jitter: bool,
    },
    Shutdown,
}

/// Handle to a running room actor. Cheap to clone.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
    summary: watch::Receiver<RoomSummary>,
}

impl RoomHandle {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// The latest published summary.
    pub fn summary(&self) -> RoomSummary {
        self.summary.borrow().clone()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(command(reply_tx))
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))
    }

    /// Runs one Drive now and waits for it to finish.
    pub async fn drive(&self) -> Result<(), RoomError> {
        self.request(|done| RoomCommand::Drive { done }).await
    }

    /// Seats the player and returns their reconnection view.
    pub async fn try_join(
        &self,
        player_id: PlayerId,
        request: JoinRequest,
    ) -> Result<RoomInfo, RoomError> {
        self.request(|reply| RoomCommand::Join {
            player_id,
            request,
            reply,
        })
        .await?
    }

    pub async fn try_exit(&self, player_id: PlayerId) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Exit { player_id, reply }).await?
    }

    pub async fn up_seat(
        &self,
        player_id: PlayerId,
        index: usize,
        buy_in: i64,
    ) -> Result<UpSeatOutcome, RoomError> {
        self.request(|reply| RoomCommand::UpSeat {
            player_id,
            index,
            buy_in,
            reply,
        })
        .await?
    }

    pub async fn top_up(&self, player_id: PlayerId, amount: i64) -> Result<i64, RoomError> {
        self.request(|reply| RoomCommand::TopUp {
            player_id,
            amount,
            reply,
        })
        .await?
    }

    /// Runs `op` against a copy of the room state.
    ///
    /// On success the copy replaces the state, queued events are sent and
    /// the room is saved. On error nothing changes. The timer is left
    /// alone either way.
    pub async fn apply<R, F>(&self, op: F) -> Result<R, RoomError>
    where
        R: Send + 'static,
        F: FnOnce(&mut RoomInfo, &mut Outbox) -> Result<R, RoomError> + Send + 'static,
    {
        let op: RoomOp = Box::new(move |info: &mut RoomInfo, outbox: &mut Outbox| {
            op(info, outbox).map(|reply| Box::new(reply) as AnyReply)
        });
        let reply = self.request(|reply| RoomCommand::Apply { op, reply }).await??;
        reply.downcast::<R>().map(|reply| *reply).map_err(|_| {
            RoomError::Internal(format!("room {} returned an unexpected reply type", self.room_id))
        })
    }

    /// The reconnection view for `player_id`.
    pub async fn view(&self, player_id: PlayerId) -> Result<RoomInfo, RoomError> {
        self.request(|reply| RoomCommand::View { player_id, reply }).await
    }

    /// The unfiltered room state.
    pub async fn snapshot(&self) -> Result<RoomInfo, RoomError> {
        self.request(|reply| RoomCommand::Snapshot { reply }).await
    }

    /// Settles escrow, refunds and removes every seat, and marks the room
    /// dead.
    pub async fn dissolve(&self) -> Result<Settlement, RoomError> {
        self.request(|reply| RoomCommand::Dissolve { reply }).await
    }

    pub async fn start(&self, jitter: bool) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Start { jitter })
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))
    }

    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Shutdown)
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))
    }
}

struct RoomActor<G: GameRules> {
    info: RoomInfo,
    rules: Arc<G>,
    env: Arc<RoomEnv>,
    timer: WakeTimer,
    receiver: mpsc::Receiver<RoomCommand>,
    summary: watch::Sender<RoomSummary>,
}

impl<G: GameRules> RoomActor<G> {
    async fn run(mut self) {
        info!(room_id = %self.info.id, kind = ?self.info.kind, "room actor started");

        loop {
            tokio::select! {
                command = self.receiver.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle(command).await {
                        break;
                    }
                }
                _ = self.timer.wait() => self.drive().await,
            }
        }

        info!(room_id = %self.info.id, "room actor stopped");
    }

    /// Returns `false` when the actor should stop.
    async fn handle(&mut self, command: RoomCommand) -> bool {
        match command {
            RoomCommand::Drive { done } => {
                self.drive().await;
                let _ = done.send(());
            }
            RoomCommand::Join {
                player_id,
                request,
                reply,
            } => {
                let mut outbox = Outbox::new();
                let now_ms = self.env.clock.now_ms();
                let result = seats::try_join(
                    &mut self.info,
                    self.env.services.players.as_ref(),
                    player_id,
                    &request,
                    self.rules.bet_slots(),
                    &mut outbox,
                    now_ms,
                )
                .await;
                let result = match result {
                    Ok(_) => {
                        self.commit(outbox).await;
                        Ok(reconnection_view(&self.info, player_id, self.rules.as_ref()))
                    }
                    Err(err) => Err(err),
                };
                let _ = reply.send(result);
            }
            RoomCommand::Exit { player_id, reply } => {
                let mut outbox = Outbox::new();
                let now_ms = self.env.clock.now_ms();
                let result = seats::try_exit(
                    &mut self.info,
                    self.env.services.players.as_ref(),
                    player_id,
                    &mut outbox,
                    now_ms,
                )
                .await;
                if result.is_ok() {
                    self.commit(outbox).await;
                }
                let _ = reply.send(result);
            }
            RoomCommand::UpSeat {
                player_id,
                index,
                buy_in,
                reply,
            } => {
                let mut outbox = Outbox::new();
                let result =
                    seats::try_up_seat(&mut self.info, player_id, index, buy_in, &mut outbox);
                if matches!(result, Ok(UpSeatOutcome::Seated { .. })) {
                    self.commit(outbox).await;
                }
                let _ = reply.send(result);
            }
            RoomCommand::TopUp {
                player_id,
                amount,
                reply,
            } => {
                let mut outbox = Outbox::new();
                let result = seats::try_top_up(&mut self.info, player_id, amount, &mut outbox);
                if result.is_ok() {
                    self.commit(outbox).await;
                }
                let _ = reply.send(result);
            }
            RoomCommand::Apply { op, reply } => {
                let mut next = self.info.clone();
                let mut outbox = Outbox::new();
                let result = op(&mut next, &mut outbox);
                if result.is_ok() {
                    next.id = self.info.id;
                    self.info = next;
                    self.commit(outbox).await;
                }
                let _ = reply.send(result);
            }
            RoomCommand::View { player_id, reply } => {
                let _ = reply.send(reconnection_view(&self.info, player_id, self.rules.as_ref()));
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.info.clone());
            }
            RoomCommand::Dissolve { reply } => {
                let settlement = self.dissolve().await;
                let _ = reply.send(settlement);
            }
            RoomCommand::Start { jitter } => self.start(jitter),
            RoomCommand::Shutdown => {
                info!(room_id = %self.info.id, "room shutting down");
                return false;
            }
        }
        true
    }

    /// One autonomous phase step.
    ///
    /// A step that neither changes phase nor moves the wake forward gets
    /// the fallback wake, unless the pending wake is still in the future.
    /// Timer-fired no-op steps therefore move `do_time` forward every
    /// time, while extra Drives after a Do keep the pending wake.
    async fn drive(&mut self) {
        self.timer.record_drive_start();
        self.timer.cancel();

        let room_id = self.info.id;
        let before_phase = self.info.cur_state;
        let before_secs = self.info.do_time;
        let before_ms = self.info.milli_do_time;

        let mut cx = PhaseContext::new(
            self.env.services.clone(),
            self.env.clock,
            self.rules.bet_slots(),
        );
        let mut outbox = match self.rules.drive(&mut cx, self.info.clone()).await {
            Ok(Some(next)) if next.id == room_id => {
                self.info = next;
                cx.outbox
            }
            Ok(Some(next)) => {
                warn!(
                    %room_id,
                    returned = %next.id,
                    "driver returned another room's state, ignored"
                );
                Outbox::new()
            }
            Ok(None) => cx.outbox,
            Err(err) => {
                warn!(%room_id, phase = %before_phase, %err, "drive step failed");
                Outbox::new()
            }
        };

        let now_ms = self.env.clock.now_ms();
        let kicked = seats::kick(&mut self.info, &self.env.services.players, &mut outbox, now_ms);
        if !kicked.is_empty() {
            debug!(%room_id, kicked = kicked.len(), "kick sweep");
        }

        let phase_changed = self.info.cur_state != before_phase;
        let advanced = self.info.do_time > before_secs || self.info.milli_do_time > before_ms;
        if !phase_changed && !advanced && self.info.wake_ms() <= now_ms {
            let secs = self.env.fallback_wake.as_secs().max(1) as i64;
            self.info.wake_after_secs(now_ms, secs);
            debug!(
                %room_id,
                phase = %self.info.cur_state,
                do_time = self.info.do_time,
                "no progress, fallback wake"
            );
        }

        if phase_changed {
            self.info.prev_state = before_phase;
            self.info.prev_state_exit_ms = now_ms;
            self.info.phase_entered_ms = now_ms;
            debug!(%room_id, from = %before_phase, to = %self.info.cur_state, "phase changed");
        }

        if self.info.dead {
            debug!(%room_id, "room is dead, timer left disarmed");
        } else {
            let wake_ms = if self.info.milli_do_time > before_ms && self.info.milli_do_time > 0 {
                self.info.milli_do_time
            } else {
                self.info.do_time * 1000
            };
            self.timer.arm_at(self.env.clock.instant_at_ms(wake_ms));
        }

        self.commit(outbox).await;
        self.timer.record_drive_end();
    }

    fn start(&mut self, jitter: bool) {
        if self.timer.is_armed() || self.info.dead {
            return;
        }
        let at = self.env.clock.instant_at_ms(self.info.wake_ms());
        if jitter {
            self.timer.arm_jittered(at);
        } else {
            self.timer.arm_at(at);
        }
        debug!(
            room_id = %self.info.id,
            wake_ms = self.info.wake_ms(),
            jitter,
            "room timer started"
        );
    }

    async fn dissolve(&mut self) -> Settlement {
        let room_id = self.info.id;
        let now_ms = self.env.clock.now_ms();
        let settlement = if self.info.kind.is_escrow() {
            settle_penalties(&mut self.info, now_ms)
        } else {
            Settlement::default()
        };
        self.flush_balances().await;

        let players = self.env.services.players.as_ref();
        for &(player_id, refund) in &settlement.escapee_refunds {
            if let Err(err) = credit_record(players, player_id, refund).await {
                warn!(%room_id, %player_id, refund, %err, "escapee refund failed");
            }
        }

        let mut outbox = Outbox::new();
        outbox.broadcast(RoomEvent::Dissolved { room_id });
        self.dispatch(&mut outbox);

        let indices: Vec<usize> = self.info.seats.iter().map(|(index, _)| index).collect();
        for index in indices {
            seats::remove_seat(
                &mut self.info,
                &self.env.services.players,
                index,
                KickReason::Dissolved,
                &mut outbox,
                now_ms,
            );
        }
        self.info.escapees.clear();
        self.info.refresh_seat_markers();
        self.info.dead = true;
        self.timer.cancel();

        self.commit(outbox).await;
        info!(
            %room_id,
            pool = settlement.pool,
            refunds = settlement.refunds.len(),
            "room dissolved"
        );
        settlement
    }

    async fn commit(&mut self, mut outbox: Outbox) {
        self.flush_balances().await;
        self.dispatch(&mut outbox);
        self.save().await;
        self.summary.send_replace(RoomSummary::of(&self.info));
    }

    /// Writes pending seat balance changes back to the player directory.
    /// A failed write keeps its delta for the next commit.
    async fn flush_balances(&mut self) {
        let pending: Vec<(PlayerId, i64)> = self
            .info
            .seats
            .iter()
            .filter(|(_, seat)| seat.pending_delta != 0)
            .map(|(_, seat)| (seat.player_id, seat.pending_delta))
            .collect();

        for (player_id, delta) in pending {
            match credit_record(self.env.services.players.as_ref(), player_id, delta).await {
                Ok(()) => {
                    if let Some(seat) = self.info.seat_of_mut(player_id) {
                        seat.pending_delta -= delta;
                    }
                }
                Err(err) => {
                    warn!(
                        room_id = %self.info.id,
                        %player_id,
                        delta,
                        %err,
                        "balance flush failed, keeping delta"
                    );
                }
            }
        }
    }

    fn dispatch(&self, outbox: &mut Outbox) {
        let occupants = self.info.occupants();
        let notifier = &self.env.services.notifier;
        for (recipient, event) in outbox.drain() {
            match recipient {
                Recipient::All => {
                    if !occupants.is_empty() {
                        notifier.broadcast(event, occupants.clone());
                    }
                }
                Recipient::Player(player_id) => notifier.push_to_player(player_id, event),
                Recipient::AllExcept(excluded) => {
                    let others: Vec<PlayerId> =
                        occupants.iter().copied().filter(|p| *p != excluded).collect();
                    if !others.is_empty() {
                        notifier.broadcast(event, others);
                    }
                }
            }
        }
    }

    async fn save(&self) {
        let room_id = self.info.id;
        let bytes = match JsonCodec.encode(&self.info) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%room_id, %err, "room snapshot encode failed");
                return;
            }
        };
        let store = &self.env.services.store;
        if let Err(err) = store.set(&self.env.table, &snapshot_key(room_id), bytes).await {
            warn!(%room_id, %err, "room save failed");
        }
    }
}

async fn credit_record(
    players: &dyn PlayerDirectory,
    player_id: PlayerId,
    amount: i64,
) -> ServiceResult<()> {
    let mut record = players.load(player_id).await?;
    record.balance += amount;
    players.save(record, true).await
}

/// Spawns the actor for `info`. The timer starts disarmed; send a Drive
/// or a Start to get it going.
pub(crate) fn spawn_room<G: GameRules>(
    info: RoomInfo,
    rules: Arc<G>,
    env: Arc<RoomEnv>,
    channel_size: usize,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(channel_size.max(1));
    let (summary_tx, summary_rx) = watch::channel(RoomSummary::of(&info));
    let room_id = info.id;

    let actor = RoomActor {
        info,
        rules,
        timer: WakeTimer::new(env.wake.clone()),
        env,
        receiver: rx,
        summary: summary_tx,
    };
    tokio::spawn(actor.run());

    RoomHandle {
        room_id,
        sender: tx,
        summary: summary_rx,
    }
}

#[cfg(test)]
mod tests {
    use parlor_protocol::{GameType, ShardId};

    use super::*;
    use crate::memory::MemoryServices;
    use crate::{GameConfig, PlayerRoomState};

    /// Never changes anything.
    struct Idle;

    impl GameRules for Idle {
        async fn drive(
            &self,
            _cx: &mut PhaseContext,
            _info: RoomInfo,
        ) -> Result<Option<RoomInfo>, RoomError> {
            Ok(None)
        }
    }

    const T0: i64 = 1_700_000_000_000;

    fn env(mem: &MemoryServices) -> Arc<RoomEnv> {
        Arc::new(RoomEnv {
            services: mem.services(),
            clock: Clock::starting_at(T0),
            table: "rooms".into(),
            fallback_wake: Duration::from_secs(5),
            wake: WakeConfig::default(),
        })
    }

    fn room() -> RoomInfo {
        RoomInfo::new(
            RoomId(1),
            GameType(1),
            SceneId(0),
            RoomKind::Match,
            ShardId(0),
            GameConfig::default(),
            T0,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_noop_drive_arms_fallback_and_redrive_keeps_it() {
        let mem = MemoryServices::new();
        let handle = spawn_room(room(), Arc::new(Idle), env(&mem), 8);

        handle.drive().await.unwrap();
        let first = handle.snapshot().await.unwrap();
        assert!(first.wake_ms() > T0);
        assert!(first.wake_ms() <= T0 + 5_000);
        assert!(mem.store.raw("rooms", "1").is_some());

        handle.drive().await.unwrap();
        let second = handle.snapshot().await.unwrap();
        // an early re-drive does not push the pending wake back
        assert_eq!(second.do_time, first.do_time);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_apply_leaves_state_untouched() {
        let mem = MemoryServices::new();
        let handle = spawn_room(room(), Arc::new(Idle), env(&mem), 8);

        let err = handle
            .apply(|info, _outbox| {
                info.rounds_played = 99;
                Err::<(), _>(RoomError::InvalidState("nope".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::InvalidState(_)));
        assert_eq!(handle.snapshot().await.unwrap().rounds_played, 0);

        let rounds = handle
            .apply(|info, _outbox| {
                info.rounds_played = 3;
                Ok(info.rounds_played)
            })
            .await
            .unwrap();
        assert_eq!(rounds, 3);
        assert_eq!(handle.summary().rounds_played, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_events_resolve_against_occupants() {
        let mem = MemoryServices::new();
        let a = mem.players.add_player(1, 1000);
        let b = mem.players.add_player(2, 1000);
        let handle = spawn_room(room(), Arc::new(Idle), env(&mem), 8);
        handle.try_join(a, JoinRequest::room(RoomId(1))).await.unwrap();
        handle.try_join(b, JoinRequest::room(RoomId(1))).await.unwrap();
        mem.notifier.take();

        handle
            .apply(move |info, outbox| {
                outbox.push(
                    Recipient::AllExcept(a),
                    RoomEvent::Game {
                        room_id: info.id,
                        name: "hint".into(),
                        payload: Vec::new(),
                    },
                );
                Ok(())
            })
            .await
            .unwrap();

        assert!(mem.notifier.events_for(a).is_empty());
        assert_eq!(mem.notifier.events_for(b).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_balance_changes_flush_to_directory() {
        let mem = MemoryServices::new();
        let a = mem.players.add_player(1, 1000);
        let handle = spawn_room(room(), Arc::new(Idle), env(&mem), 8);
        handle.try_join(a, JoinRequest::room(RoomId(1))).await.unwrap();

        handle
            .apply(move |info, _outbox| {
                if let Some(seat) = info.seat_of_mut(a) {
                    seat.credit(250);
                }
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(mem.players.balance(a), Some(1250));
        let seat = handle.snapshot().await.unwrap().seat_of(a).cloned().unwrap();
        assert_eq!((seat.balance, seat.pending_delta), (1250, 0));
        assert_eq!(seat.state, PlayerRoomState::Free);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_makes_room_unavailable() {
        let mem = MemoryServices::new();
        let handle = spawn_room(room(), Arc::new(Idle), env(&mem), 8);
        handle.shutdown().await.unwrap();
        tokio::task::yield_now().await;
        assert!(matches!(handle.snapshot().await, Err(RoomError::Unavailable(_))));
    }
}
