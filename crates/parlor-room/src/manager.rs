//! Room manager: the per-(game type, shard) registry of rooms.
//!
//! Creates rooms, routes joins to them, forwards caller operations and
//! periodically dissolves the rooms game logic marked dead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use parlor_protocol::{Codec, JsonCodec, PlayerId, RoomEvent, RoomId};
use parlor_tick::{Clock, WakeConfig};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::codes::{RoomCodeEntry, RoomCodes};
use crate::room::{RoomEnv, snapshot_key, spawn_room};
use crate::{
    GameRules, JoinRequest, ManagerSettings, Outbox, RoomError, RoomHandle, RoomInfo, Services,
    Settlement, UpSeatOutcome,
};

/// Registry of the rooms of one game type on one shard.
///
/// Created with [`RoomManager::init`], which also starts the dead-room
/// sweep. The map lock is only held for membership changes and lookups,
/// never while waiting on a room.
pub struct RoomManager<G: GameRules> {
    settings: ManagerSettings,
    rules: Arc<G>,
    env: Arc<RoomEnv>,
    codes: RoomCodes,
    rooms: RwLock<HashMap<RoomId, RoomHandle>>,
    next_id: AtomicU64,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<G: GameRules> RoomManager<G> {
    /// Sets up the registry and starts the periodic dead-room sweep.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn init(settings: ManagerSettings, services: Services, rules: G) -> Arc<Self> {
        Self::init_with_clock(settings, services, rules, Clock::system())
    }

    /// Like [`init`](Self::init) with an explicit wall clock.
    pub fn init_with_clock(
        settings: ManagerSettings,
        services: Services,
        rules: G,
        clock: Clock,
    ) -> Arc<Self> {
        let env = Arc::new(RoomEnv {
            services: services.clone(),
            clock,
            table: settings.table.clone(),
            fallback_wake: settings.fallback_wake,
            wake: WakeConfig {
                drive_budget: settings.drive_budget,
                max_jitter: settings.restart_jitter,
                metrics_enabled: true,
            },
        });
        // shard id in the high bits
        let first_id = (u64::from(settings.shard.0) << 40) | 1;

        let manager = Arc::new(Self {
            codes: RoomCodes::new(services.store),
            settings,
            rules: Arc::new(rules),
            env,
            rooms: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(first_id),
            sweeper: Mutex::new(None),
        });
        manager.start_sweeper();
        info!(
            game_type = %manager.settings.game_type,
            shard = %manager.settings.shard,
            table = %manager.settings.table,
            "room manager initialised"
        );
        manager
    }

    /// Starts the periodic dead-room sweep, replacing a running one.
    pub fn start_sweeper(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = self.settings.sweep_interval;
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                let swept = manager.sweep_dead_rooms().await;
                if !swept.is_empty() {
                    info!(rooms = swept.len(), "dead rooms swept");
                }
            }
        });
        if let Some(previous) = self.sweeper_slot().replace(task) {
            previous.abort();
        }
    }

    /// Stops the periodic sweep. Rooms keep running.
    pub fn stop_sweeper(&self) {
        if let Some(task) = self.sweeper_slot().take() {
            task.abort();
            debug!("dead-room sweep stopped");
        }
    }

    fn sweeper_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.sweeper.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn codes(&self) -> &RoomCodes {
        &self.codes
    }

    pub fn clock(&self) -> Clock {
        self.env.clock
    }

    // -----------------------------------------------------------------------
    // Creation and lookup
    // -----------------------------------------------------------------------

    /// Creates a room for `request` within the configured room limit.
    pub async fn create_room(&self, request: &JoinRequest) -> Result<RoomId, RoomError> {
        self.create_room_with(self.settings.max_rooms, request, |_| Ok(())).await
    }

    /// Creates a room, letting `init` customise its initial state.
    ///
    /// Fails with [`RoomError::CapacityReached`] when `max_rooms` rooms
    /// are registered. An error from `init` fails the whole creation. The
    /// new room is driven once before this returns, which enters its
    /// first phase and arms its timer.
    pub async fn create_room_with<F>(
        &self,
        max_rooms: usize,
        request: &JoinRequest,
        init: F,
    ) -> Result<RoomId, RoomError>
    where
        F: FnOnce(&mut RoomInfo) -> Result<(), RoomError> + Send,
    {
        let handle = {
            let mut rooms = self.rooms.write().await;
            if rooms.len() >= max_rooms {
                return Err(RoomError::CapacityReached { limit: max_rooms });
            }

            let config = self
                .env
                .services
                .game_config(self.settings.game_type, request.scene)
                .await?;
            let room_id = RoomId(self.next_id.fetch_add(1, Ordering::Relaxed));
            let now_ms = self.env.clock.now_ms();
            let mut info = RoomInfo::new(
                room_id,
                self.settings.game_type,
                request.scene,
                request.kind,
                self.settings.shard,
                config,
                now_ms,
            );
            info.owner = request.owner;
            info.payer = request.owner;
            info.pay_mode = request.pay_mode;
            init(&mut info)?;

            if info.kind.is_code_accessible() {
                let entry = RoomCodeEntry {
                    room_id,
                    game_type: info.game_type,
                    shard: info.shard,
                    kind: info.kind,
                    owner: info.owner,
                    created_ms: now_ms,
                };
                info.code = Some(self.codes.create(&entry).await?);
            }

            let handle = spawn_room(
                info,
                Arc::clone(&self.rules),
                Arc::clone(&self.env),
                self.settings.channel_size,
            );
            rooms.insert(room_id, handle.clone());
            handle
        };

        let summary = handle.summary();
        info!(
            room_id = %summary.id,
            kind = ?summary.kind,
            scene = %summary.scene,
            code = ?summary.code,
            "room created"
        );
        self.env.services.notifier.announce(RoomEvent::RoomCreated {
            room_id: summary.id,
            game_type: self.settings.game_type,
            scene: summary.scene,
        });
        handle.drive().await?;
        Ok(summary.id)
    }

    /// The room, unless it is absent or dead.
    pub async fn get_room(&self, room_id: RoomId) -> Option<RoomHandle> {
        self.rooms
            .read()
            .await
            .get(&room_id)
            .filter(|handle| !handle.summary().dead)
            .cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Registered room ids in ascending order.
    pub async fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Removes the room from the registry, stops it and deletes its
    /// snapshot and room code.
    pub async fn delete_room(&self, room_id: RoomId) -> Result<(), RoomError> {
        let handle = self
            .rooms
            .write()
            .await
            .remove(&room_id)
            .ok_or(RoomError::NotFound(room_id))?;
        let code = handle.summary().code;
        let _ = handle.shutdown().await;

        self.env
            .services
            .store
            .delete(&self.settings.table, &[snapshot_key(room_id)])
            .await?;
        if let Some(code) = code {
            self.codes.delete(code).await?;
        }
        info!(%room_id, "room deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Joining and player operations
    // -----------------------------------------------------------------------

    /// Finds a room for the player and seats them.
    ///
    /// A room code is resolved to its room first. A player whose record
    /// still points at a live room here is sent back to it. An explicit
    /// room id targets that room only. Otherwise open rooms of the
    /// requested scene and kind are tried in id order.
    ///
    /// Returns the player's reconnection view, or `None` when no room
    /// accepted so the caller can create one and retry.
    pub async fn join_room(
        &self,
        player_id: PlayerId,
        request: &JoinRequest,
    ) -> Result<Option<RoomInfo>, RoomError> {
        let mut request = request.clone();
        if let Some(code) = request.code {
            let entry = self
                .codes
                .lookup(code)
                .await?
                .filter(|entry| {
                    entry.game_type == self.settings.game_type && entry.shard == self.settings.shard
                })
                .ok_or(RoomError::UnknownCode(code))?;
            request.room_id = Some(entry.room_id);
        }

        let players = &self.env.services.players;
        let mut record = players.load(player_id).await?;
        if let Some(assignment) = record.room {
            if assignment.game_type != self.settings.game_type
                || assignment.shard != self.settings.shard
            {
                return Err(RoomError::InOtherRoom {
                    player: player_id,
                    room: assignment.room_id,
                });
            }
            match self.get_room(assignment.room_id).await {
                Some(_) if request.room_id.is_some_and(|id| id != assignment.room_id) => {
                    return Err(RoomError::InOtherRoom {
                        player: player_id,
                        room: assignment.room_id,
                    });
                }
                Some(handle) => {
                    debug!(%player_id, room_id = %assignment.room_id, "re-entering assigned room");
                    return handle.try_join(player_id, request).await.map(Some);
                }
                // A dead room still waiting for the sweep keeps its seat. The
                // sweep only clears assignments that point at the dead room.
                None => {
                    info!(
                        %player_id,
                        room_id = %assignment.room_id,
                        "clearing stale room assignment"
                    );
                    record.room = None;
                    players.save(record, true).await?;
                }
            }
        }

        if let Some(room_id) = request.room_id {
            let handle = self.get_room(room_id).await.ok_or(RoomError::NotFound(room_id))?;
            return handle.try_join(player_id, request).await.map(Some);
        }

        let candidates: Vec<RoomHandle> = {
            let rooms = self.rooms.read().await;
            let mut candidates: Vec<RoomHandle> = rooms
                .values()
                .filter(|handle| {
                    let summary = handle.summary();
                    !summary.dead
                        && summary.scene == request.scene
                        && summary.kind == request.kind
                        && !summary.kind.is_code_accessible()
                        && !summary.is_full()
                })
                .cloned()
                .collect();
            candidates.sort_by_key(RoomHandle::room_id);
            candidates
        };

        for handle in candidates {
            match handle.try_join(player_id, request.clone()).await {
                Ok(view) => return Ok(Some(view)),
                Err(err) if err.is_client_actionable() => {
                    debug!(room_id = %handle.room_id(), %player_id, %err, "room declined join");
                }
                Err(err) => {
                    warn!(room_id = %handle.room_id(), %player_id, %err, "join attempt failed");
                }
            }
        }
        Ok(None)
    }

    /// The live room the player's record points at.
    pub async fn room_of(&self, player_id: PlayerId) -> Result<RoomHandle, RoomError> {
        let record = self.env.services.players.load(player_id).await?;
        let assignment = record
            .room
            .filter(|a| a.game_type == self.settings.game_type && a.shard == self.settings.shard)
            .ok_or(RoomError::NotInAnyRoom(player_id))?;
        self.get_room(assignment.room_id)
            .await
            .ok_or(RoomError::NotFound(assignment.room_id))
    }

    /// Removes the player from their room, then drives it.
    pub async fn exit_room(&self, player_id: PlayerId) -> Result<(), RoomError> {
        let handle = self.room_of(player_id).await?;
        handle.try_exit(player_id).await?;
        handle.drive().await
    }

    /// Runs a caller operation (Do) on the player's room, then drives it
    /// so the operation's events go out before the next phase step's.
    pub async fn do_op<R, F>(&self, player_id: PlayerId, op: F) -> Result<R, RoomError>
    where
        R: Send + 'static,
        F: FnOnce(&mut RoomInfo, &mut Outbox) -> Result<R, RoomError> + Send + 'static,
    {
        let handle = self.room_of(player_id).await?;
        let reply = handle.apply(op).await?;
        handle.drive().await?;
        Ok(reply)
    }

    pub async fn up_seat(
        &self,
        player_id: PlayerId,
        index: usize,
        buy_in: i64,
    ) -> Result<UpSeatOutcome, RoomError> {
        let handle = self.room_of(player_id).await?;
        let outcome = handle.up_seat(player_id, index, buy_in).await?;
        handle.drive().await?;
        Ok(outcome)
    }

    /// Returns the player's new stake.
    pub async fn top_up(&self, player_id: PlayerId, amount: i64) -> Result<i64, RoomError> {
        let handle = self.room_of(player_id).await?;
        let safe_money = handle.top_up(player_id, amount).await?;
        handle.drive().await?;
        Ok(safe_money)
    }

    // -----------------------------------------------------------------------
    // Process lifecycle
    // -----------------------------------------------------------------------

    /// Loads every persisted room of this game type and shard without
    /// starting timers. Unreadable snapshots are skipped. Returns the
    /// number of rooms loaded.
    pub async fn reload_rooms(&self) -> Result<usize, RoomError> {
        let store = &self.env.services.store;
        let table = &self.settings.table;
        let keys = store.list_keys(table).await?;

        let mut loaded = 0;
        for key in keys {
            let Some(bytes) = store.get(table, &key).await? else {
                continue;
            };
            let info: RoomInfo = match JsonCodec.decode(&bytes) {
                Ok(info) => info,
                Err(err) => {
                    warn!(%table, %key, %err, "unreadable room snapshot skipped");
                    continue;
                }
            };
            if info.game_type != self.settings.game_type || info.shard != self.settings.shard {
                warn!(
                    room_id = %info.id,
                    game_type = %info.game_type,
                    shard = %info.shard,
                    "snapshot belongs to another manager, skipped"
                );
                continue;
            }

            let room_id = info.id;
            self.next_id.fetch_max(room_id.0 + 1, Ordering::Relaxed);
            let mut rooms = self.rooms.write().await;
            if rooms.contains_key(&room_id) {
                continue;
            }
            let handle = spawn_room(
                info,
                Arc::clone(&self.rules),
                Arc::clone(&self.env),
                self.settings.channel_size,
            );
            rooms.insert(room_id, handle);
            loaded += 1;
        }
        info!(loaded, %table, "rooms reloaded");
        Ok(loaded)
    }

    /// Arms every room's timer from its persisted wake time, with jitter.
    pub async fn restart_rooms(&self) -> usize {
        let handles: Vec<RoomHandle> = self.rooms.read().await.values().cloned().collect();
        let mut started = 0;
        for handle in handles {
            match handle.start(true).await {
                Ok(()) => started += 1,
                Err(err) => warn!(room_id = %handle.room_id(), %err, "room restart failed"),
            }
        }
        info!(started, "room timers started");
        started
    }

    /// Dissolves and deletes every dead room. One room failing does not
    /// stop the others.
    pub async fn sweep_dead_rooms(&self) -> Vec<(RoomId, Settlement)> {
        let dead: Vec<RoomHandle> = self
            .rooms
            .read()
            .await
            .values()
            .filter(|handle| handle.summary().dead)
            .cloned()
            .collect();

        let mut report = Vec::with_capacity(dead.len());
        for handle in dead {
            let room_id = handle.room_id();
            let settlement = match handle.dissolve().await {
                Ok(settlement) => settlement,
                Err(err) => {
                    warn!(%room_id, %err, "dissolve failed, room skipped");
                    continue;
                }
            };
            if let Err(err) = self.delete_room(room_id).await {
                warn!(%room_id, %err, "dead room delete failed");
            }
            report.push((room_id, settlement));
        }
        report
    }
}

impl<G: GameRules> Drop for RoomManager<G> {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}
