//! In-memory collaborators.
//!
//! Used by the test suites and by single-process deployments that don't
//! need durable rooms. Every type is cheap to share behind an `Arc` and
//! exposes inspection helpers for assertions.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use parlor_protocol::{GameType, PlayerId, RoomEvent, SceneId};
use parlor_session::Presence;

use crate::{
    GameConfigSource, Notifier, PlayerDirectory, PlayerRecord, RoomStore, ServiceError,
    ServiceResult, Services,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unavailable(message: &str) -> ServiceError {
    ServiceError::unavailable(message, std::io::Error::other(message.to_string()))
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// A [`RoomStore`] over nested maps. Writes can be made to fail.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `set` and `delete` fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn raw(&self, table: &str, key: &str) -> Option<Vec<u8>> {
        lock(&self.tables).get(table)?.get(key).cloned()
    }

    pub fn insert_raw(&self, table: &str, key: &str, value: Vec<u8>) {
        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn len(&self, table: &str) -> usize {
        lock(&self.tables).get(table).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }
}

impl RoomStore for MemoryStore {
    fn get(&self, table: &str, key: &str) -> BoxFuture<'static, ServiceResult<Option<Vec<u8>>>> {
        let value = self.raw(table, key);
        Box::pin(async move { Ok(value) })
    }

    fn set(&self, table: &str, key: &str, value: Vec<u8>) -> BoxFuture<'static, ServiceResult<()>> {
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(unavailable("store write refused"))
        } else {
            self.insert_raw(table, key, value);
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn delete(&self, table: &str, keys: &[String]) -> BoxFuture<'static, ServiceResult<()>> {
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(unavailable("store delete refused"))
        } else {
            if let Some(entries) = lock(&self.tables).get_mut(table) {
                for key in keys {
                    entries.remove(key);
                }
            }
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn list_keys(&self, table: &str) -> BoxFuture<'static, ServiceResult<Vec<String>>> {
        let keys = lock(&self.tables)
            .get(table)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        Box::pin(async move { Ok(keys) })
    }
}

// ---------------------------------------------------------------------------
// MemoryDirectory
// ---------------------------------------------------------------------------

/// A [`PlayerDirectory`] over a map. Unknown players fail to load.
#[derive(Default)]
pub struct MemoryDirectory {
    records: Mutex<HashMap<PlayerId, PlayerRecord>>,
    saves: AtomicUsize,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: PlayerRecord) {
        lock(&self.records).insert(record.id, record);
    }

    /// Registers a player with a balance.
    pub fn add_player(&self, id: u64, balance: i64) -> PlayerId {
        let player_id = PlayerId(id);
        self.insert(PlayerRecord::new(player_id, format!("player-{id}"), balance));
        player_id
    }

    pub fn record(&self, player_id: PlayerId) -> Option<PlayerRecord> {
        lock(&self.records).get(&player_id).cloned()
    }

    pub fn balance(&self, player_id: PlayerId) -> Option<i64> {
        self.record(player_id).map(|r| r.balance)
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl PlayerDirectory for MemoryDirectory {
    fn load(&self, player_id: PlayerId) -> BoxFuture<'static, ServiceResult<PlayerRecord>> {
        let record = self
            .record(player_id)
            .ok_or_else(|| unavailable("unknown player"));
        Box::pin(async move { record })
    }

    fn save(&self, record: PlayerRecord, _durable: bool) -> BoxFuture<'static, ServiceResult<()>> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.insert(record);
        Box::pin(async move { Ok(()) })
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

/// One delivered event and who it went to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub to: Vec<PlayerId>,
    pub event: RoomEvent,
}

/// A [`Notifier`] that records every delivery.
#[derive(Default)]
pub struct RecordingNotifier {
    deliveries: Mutex<Vec<Delivery>>,
    announcements: Mutex<Vec<RoomEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        lock(&self.deliveries).clone()
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&self) -> Vec<Delivery> {
        std::mem::take(&mut *lock(&self.deliveries))
    }

    pub fn announcements(&self) -> Vec<RoomEvent> {
        lock(&self.announcements).clone()
    }

    /// Events delivered to `player_id`.
    pub fn events_for(&self, player_id: PlayerId) -> Vec<RoomEvent> {
        lock(&self.deliveries)
            .iter()
            .filter(|d| d.to.contains(&player_id))
            .map(|d| d.event.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn push_to_player(&self, player_id: PlayerId, event: RoomEvent) {
        lock(&self.deliveries).push(Delivery {
            to: vec![player_id],
            event,
        });
    }

    fn broadcast(&self, event: RoomEvent, occupants: Vec<PlayerId>) {
        lock(&self.deliveries).push(Delivery { to: occupants, event });
    }

    fn announce(&self, event: RoomEvent) {
        lock(&self.announcements).push(event);
    }
}

// ---------------------------------------------------------------------------
// StaticConfigs
// ---------------------------------------------------------------------------

/// A [`GameConfigSource`] serving fixed tables that can be changed live.
#[derive(Default)]
pub struct StaticConfigs {
    tables: Mutex<HashMap<(GameType, SceneId), BTreeMap<String, i64>>>,
}

impl StaticConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, game_type: GameType, scene: SceneId, values: &[(&str, i64)]) {
        let table = values.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        lock(&self.tables).insert((game_type, scene), table);
    }
}

impl GameConfigSource for StaticConfigs {
    fn get_config(
        &self,
        game_type: GameType,
        scene: SceneId,
    ) -> BoxFuture<'static, ServiceResult<BTreeMap<String, i64>>> {
        let table = lock(&self.tables)
            .get(&(game_type, scene))
            .cloned()
            .unwrap_or_default();
        Box::pin(async move { Ok(table) })
    }
}

// ---------------------------------------------------------------------------
// FixedPresence
// ---------------------------------------------------------------------------

/// A [`Presence`] where everyone is online unless marked offline.
#[derive(Default)]
pub struct FixedPresence {
    offline: Mutex<HashSet<PlayerId>>,
}

impl FixedPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, player_id: PlayerId, online: bool) {
        let mut offline = lock(&self.offline);
        if online {
            offline.remove(&player_id);
        } else {
            offline.insert(player_id);
        }
    }
}

impl Presence for FixedPresence {
    fn is_online(&self, player_id: PlayerId) -> BoxFuture<'static, bool> {
        let online = !lock(&self.offline).contains(&player_id);
        Box::pin(async move { online })
    }
}

// ---------------------------------------------------------------------------
// MemoryServices
// ---------------------------------------------------------------------------

/// All in-memory collaborators, kept typed for inspection.
#[derive(Clone, Default)]
pub struct MemoryServices {
    pub store: Arc<MemoryStore>,
    pub players: Arc<MemoryDirectory>,
    pub notifier: Arc<RecordingNotifier>,
    pub configs: Arc<StaticConfigs>,
    pub presence: Arc<FixedPresence>,
}

impl MemoryServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// The type-erased bundle the room manager takes.
    pub fn services(&self) -> Services {
        Services {
            store: self.store.clone(),
            players: self.players.clone(),
            notifier: self.notifier.clone(),
            configs: self.configs.clone(),
            presence: self.presence.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_set_get_delete() {
        let store = MemoryStore::new();
        store.set("t", "a", b"1".to_vec()).await.unwrap();
        store.set("t", "b", b"2".to_vec()).await.unwrap();

        assert_eq!(store.get("t", "a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.list_keys("t").await.unwrap(), vec!["a", "b"]);

        store.delete("t", &["a".to_string()]).await.unwrap();
        assert_eq!(store.get("t", "a").await.unwrap(), None);
        assert_eq!(store.len("t"), 1);
    }

    #[tokio::test]
    async fn test_memory_store_failing_writes() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(store.set("t", "a", Vec::new()).await.is_err());
        assert!(store.is_empty("t"));
    }

    #[tokio::test]
    async fn test_memory_directory_unknown_player_fails() {
        let players = MemoryDirectory::new();
        let id = players.add_player(1, 500);
        assert_eq!(players.load(id).await.unwrap().balance, 500);
        assert!(players.load(PlayerId(2)).await.is_err());
    }

    #[tokio::test]
    async fn test_fixed_presence_toggles() {
        let presence = FixedPresence::new();
        assert!(presence.is_online(PlayerId(1)).await);
        presence.set_online(PlayerId(1), false);
        assert!(!presence.is_online(PlayerId(1)).await);
    }
}
