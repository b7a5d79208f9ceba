//! `Shard` builder and process lifecycle.
//!
//! A shard owns the room manager for one game type and the sessions of
//! the players connected to it. Starting it brings back the rooms
//! persisted by a previous process; running it keeps the dead-room and
//! expired-session sweeps going until ctrl-c.

use std::sync::Arc;

use parlor_protocol::PlayerId;
use parlor_room::{GameRules, RoomManager, Services};
use parlor_session::SharedSessions;
use parlor_tick::Clock;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::gateway::{ComponentRouter, Gateway};
use crate::{ParlorError, ShardSettings};

/// What [`Shard::start`] brought back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StartReport {
    pub reloaded: usize,
    pub restarted: usize,
}

/// Builder for configuring a [`Shard`].
///
/// # Example
///
/// ```rust,ignore
/// use parlor::prelude::*;
///
/// let settings = ShardSettings::load();
/// parlor::telemetry::init(&settings.log_filter);
/// let shard = ShardBuilder::new(settings).build(services, MyGame);
/// shard.start().await?;
/// shard.run().await
/// ```
pub struct ShardBuilder {
    settings: ShardSettings,
    clock: Clock,
}

impl ShardBuilder {
    pub fn new(settings: ShardSettings) -> Self {
        Self {
            settings,
            clock: Clock::system(),
        }
    }

    /// Sets the wall clock rooms schedule against.
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Creates the session registry and the room manager. Rooms ask the
    /// shard's sessions whether a seated player is online, replacing
    /// `services.presence`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build<G: GameRules>(self, mut services: Services, rules: G) -> Shard<G> {
        let sessions = SharedSessions::new(self.settings.session_config());
        services.presence = Arc::new(sessions.clone());
        let rooms = RoomManager::init_with_clock(
            self.settings.to_manager_settings(),
            services,
            rules,
            self.clock,
        );
        Shard {
            settings: self.settings,
            rooms,
            sessions,
        }
    }
}

/// One game type's rooms on this process.
pub struct Shard<G: GameRules> {
    settings: ShardSettings,
    rooms: Arc<RoomManager<G>>,
    sessions: SharedSessions,
}

impl<G: GameRules> Shard<G> {
    pub fn settings(&self) -> &ShardSettings {
        &self.settings
    }

    pub fn rooms(&self) -> &Arc<RoomManager<G>> {
        &self.rooms
    }

    pub fn sessions(&self) -> &SharedSessions {
        &self.sessions
    }

    /// A gateway into this shard's rooms that hands located rooms to
    /// `router`.
    pub fn gateway(&self, router: Arc<dyn ComponentRouter>) -> Gateway<G> {
        Gateway::new(Arc::clone(&self.rooms), self.sessions.clone(), router)
    }

    /// Reloads persisted rooms, arms their timers and (re)starts the
    /// dead-room sweep.
    pub async fn start(&self) -> Result<StartReport, ParlorError> {
        let reloaded = self.rooms.reload_rooms().await?;
        let restarted = self.rooms.restart_rooms().await;
        self.rooms.start_sweeper();
        info!(
            shard = self.settings.shard,
            game_type = self.settings.game_type,
            reloaded,
            restarted,
            "shard started"
        );
        Ok(StartReport { reloaded, restarted })
    }

    /// Expires sessions whose reconnect grace ran out and drops them.
    /// Returns the players whose sessions expired.
    pub async fn expire_sessions(&self) -> Vec<PlayerId> {
        let mut sessions = self.sessions.lock().await;
        let expired = sessions.expire_stale();
        sessions.cleanup_expired();
        if !expired.is_empty() {
            debug!(players = expired.len(), "expired sessions dropped");
        }
        expired
    }

    /// Runs the session sweep until ctrl-c, then stops the room sweep.
    /// Rooms are left as they are; their snapshots are already persisted.
    pub async fn run(self) -> Result<(), ParlorError> {
        info!(shard = self.settings.shard, "parlor shard running");
        let period = self.rooms.settings().sweep_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = &mut shutdown => {
                    result?;
                    break;
                }
                _ = ticker.tick() => {
                    self.expire_sessions().await;
                }
            }
        }

        info!(shard = self.settings.shard, "shutdown requested");
        self.rooms.stop_sweeper();
        Ok(())
    }
}
