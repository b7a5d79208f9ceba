//! Integration tests for the shard bootstrap and the join/exit gateway.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use parlor::prelude::*;
use parlor::room::memory::MemoryServices;
use parlor::room::ServiceError;
use parlor::session::SessionError;
use parlor::tick::Clock;
use parlor::StartReport;
use serde_json::{Value, json};

// =========================================================================
// Mock game and router
// =========================================================================

/// Enters Ready once and then idles; the fallback wake keeps it ticking.
struct LobbyGame;

impl GameRules for LobbyGame {
    async fn drive(
        &self,
        cx: &mut PhaseContext,
        mut info: RoomInfo,
    ) -> Result<Option<RoomInfo>, RoomError> {
        if info.cur_state != RoomPhase::Init {
            return Ok(None);
        }
        ready_phase(cx, &mut info, RoomPhase::Game(0), |_, _| Ok(())).await?;
        Ok(Some(info))
    }
}

#[derive(Default)]
struct RecordingRouter {
    calls: Mutex<Vec<Dispatch>>,
    failing: AtomicBool,
}

impl RecordingRouter {
    fn calls(&self) -> Vec<Dispatch> {
        self.calls.lock().unwrap().clone()
    }
}

impl ComponentRouter for RecordingRouter {
    fn dispatch(&self, call: Dispatch) -> BoxFuture<'static, Result<Value, ServiceError>> {
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(ServiceError::unavailable(
                "component down",
                std::io::Error::other("connection refused"),
            ))
        } else {
            let reply = json!({ "method": call.method, "room": call.room_id.0 });
            self.calls.lock().unwrap().push(call);
            Ok(reply)
        };
        Box::pin(async move { result })
    }
}

// =========================================================================
// Helpers
// =========================================================================

const T0: i64 = 1_700_000_000_000;

fn settings() -> ShardSettings {
    ShardSettings {
        game_type: 4,
        ..ShardSettings::default()
    }
}

fn build(mem: &MemoryServices, settings: ShardSettings) -> Shard<LobbyGame> {
    ShardBuilder::new(settings)
        .clock(Clock::starting_at(T0))
        .build(mem.services(), LobbyGame)
}

fn lobby() -> JoinRequest {
    JoinRequest::scene(SceneId(0), RoomKind::Match)
}

// =========================================================================
// Gateway
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_join_creates_room_then_fills_it() {
    let mem = MemoryServices::new();
    let shard = build(&mem, settings());
    let router = Arc::new(RecordingRouter::default());
    let gateway = shard.gateway(router.clone());
    let a = mem.players.add_player(1, 1000);
    let b = mem.players.add_player(2, 1000);

    let first = gateway
        .join(a, &lobby(), "table", "on_join", json!({ "seat": "any" }))
        .await
        .unwrap();
    let second = gateway
        .join(b, &lobby(), "table", "on_join", Value::Null)
        .await
        .unwrap();

    assert_eq!(shard.rooms().room_count().await, 1);
    assert_eq!(first.room.id, second.room.id);
    assert_eq!(second.room.seats.occupied(), 2);
    assert_eq!(first.reply["method"], "on_join");

    let calls = router.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].component, "table");
    assert_eq!(calls[0].player_id, a);
    assert_eq!(calls[0].room_id, first.room.id);
    assert_eq!(calls[0].payload["seat"], "any");
    assert_eq!(calls[1].player_id, b);
}

#[tokio::test(start_paused = true)]
async fn test_join_private_room_for_owner() {
    let mem = MemoryServices::new();
    let shard = build(&mem, settings());
    let gateway = shard.gateway(Arc::new(RecordingRouter::default()));
    let owner = mem.players.add_player(1, 1000);
    let request = JoinRequest {
        kind: RoomKind::Private,
        owner: Some(owner),
        ..lobby()
    };

    let outcome = gateway
        .join(owner, &request, "table", "on_join", Value::Null)
        .await
        .unwrap();

    assert_eq!(outcome.room.owner, Some(owner));
    assert!(outcome.room.code.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_exit_dispatches_for_room_left() {
    let mem = MemoryServices::new();
    let shard = build(&mem, settings());
    let router = Arc::new(RecordingRouter::default());
    let gateway = shard.gateway(router.clone());
    let a = mem.players.add_player(1, 1000);
    let joined = gateway
        .join(a, &lobby(), "table", "on_join", Value::Null)
        .await
        .unwrap();

    let reply = gateway.exit(a, "table", "on_exit", Value::Null).await.unwrap();

    assert_eq!(reply["method"], "on_exit");
    assert_eq!(router.calls()[1].room_id, joined.room.id);
    let record = mem.players.record(a).unwrap();
    assert!(record.room.is_none());

    let err = gateway
        .exit(a, "table", "on_exit", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, ParlorError::Room(RoomError::NotInAnyRoom(_))));
    assert!(err.is_client_actionable());
}

#[tokio::test(start_paused = true)]
async fn test_router_failure_is_a_server_error() {
    let mem = MemoryServices::new();
    let shard = build(&mem, settings());
    let router = Arc::new(RecordingRouter::default());
    router.failing.store(true, Ordering::SeqCst);
    let gateway = shard.gateway(router);
    let a = mem.players.add_player(1, 1000);

    let err = gateway
        .join(a, &lobby(), "table", "on_join", Value::Null)
        .await
        .unwrap_err();

    assert!(matches!(err, ParlorError::Service(_)));
    assert!(!err.is_client_actionable());
    // the seat stays taken
    assert!(mem.players.record(a).unwrap().room.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_join_without_capacity_fails() {
    let mem = MemoryServices::new();
    let shard = build(
        &mem,
        ShardSettings {
            max_rooms: 0,
            ..settings()
        },
    );
    let gateway = shard.gateway(Arc::new(RecordingRouter::default()));
    let a = mem.players.add_player(1, 1000);

    let err = gateway
        .join(a, &lobby(), "table", "on_join", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ParlorError::Room(RoomError::CapacityReached { limit: 0 })
    ));
}

// =========================================================================
// Sessions
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnect_puts_player_back_in_seat() {
    let mem = MemoryServices::new();
    let shard = build(&mem, settings());
    let gateway = shard.gateway(Arc::new(RecordingRouter::default()));
    let a = mem.players.add_player(1, 1000);
    let token = gateway.connect(a).await.unwrap();
    let joined = gateway
        .join(a, &lobby(), "table", "on_join", Value::Null)
        .await
        .unwrap();

    gateway.disconnect(a).await.unwrap();
    assert!(!shard.sessions().lock().await.is_online(a));

    let view = gateway.reconnect(&token).await.unwrap().unwrap();
    assert_eq!(view.id, joined.room.id);
    assert!(view.seats.contains(a));
    assert!(shard.sessions().lock().await.is_online(a));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_without_seat_gives_none() {
    let mem = MemoryServices::new();
    let shard = build(&mem, settings());
    let gateway = shard.gateway(Arc::new(RecordingRouter::default()));
    let a = mem.players.add_player(1, 1000);
    let token = gateway.connect(a).await.unwrap();
    gateway.disconnect(a).await.unwrap();

    assert_eq!(gateway.reconnect(&token).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_expired_session_cannot_reconnect() {
    let mem = MemoryServices::new();
    let shard = build(
        &mem,
        ShardSettings {
            reconnect_grace_secs: 0,
            ..settings()
        },
    );
    let gateway = shard.gateway(Arc::new(RecordingRouter::default()));
    let a = PlayerId(1);
    let token = gateway.connect(a).await.unwrap();
    gateway.disconnect(a).await.unwrap();

    assert_eq!(shard.expire_sessions().await, vec![a]);
    assert!(shard.sessions().lock().await.is_empty());

    let err = gateway.reconnect(&token).await.unwrap_err();
    assert!(matches!(err, ParlorError::Session(SessionError::InvalidToken)));
}

#[tokio::test(start_paused = true)]
async fn test_connect_twice_is_rejected() {
    let mem = MemoryServices::new();
    let shard = build(&mem, settings());
    let gateway = shard.gateway(Arc::new(RecordingRouter::default()));
    gateway.connect(PlayerId(1)).await.unwrap();

    let err = gateway.connect(PlayerId(1)).await.unwrap_err();
    assert!(matches!(
        err,
        ParlorError::Session(SessionError::AlreadyConnected(_))
    ));
}

// =========================================================================
// Shard lifecycle
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_start_on_empty_store() {
    let mem = MemoryServices::new();
    let shard = build(&mem, settings());
    assert_eq!(shard.start().await.unwrap(), StartReport::default());
}

#[tokio::test(start_paused = true)]
async fn test_start_brings_back_persisted_rooms() {
    let mem = MemoryServices::new();
    let a = mem.players.add_player(1, 1000);
    let room_id = {
        let shard = build(&mem, settings());
        let gateway = shard.gateway(Arc::new(RecordingRouter::default()));
        gateway
            .join(a, &lobby(), "table", "on_join", Value::Null)
            .await
            .unwrap()
            .room
            .id
    };
    tokio::task::yield_now().await;

    let shard = build(&mem, settings());
    let report = shard.start().await.unwrap();

    assert_eq!(report, StartReport { reloaded: 1, restarted: 1 });
    assert_eq!(shard.rooms().room_ids().await, vec![room_id]);

    // the player goes back to the reloaded room
    let gateway = shard.gateway(Arc::new(RecordingRouter::default()));
    let again = gateway
        .join(a, &lobby(), "table", "on_join", Value::Null)
        .await
        .unwrap();
    assert_eq!(again.room.id, room_id);
    assert_eq!(again.room.seats.occupied(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_settings_flow_into_manager() {
    let mem = MemoryServices::new();
    let shard = build(
        &mem,
        ShardSettings {
            shard: 3,
            ..settings()
        },
    );
    assert_eq!(shard.rooms().settings().table, "rooms:4:3");
    assert_eq!(shard.rooms().settings().shard, ShardId(3));
    assert_eq!(shard.settings().shard, 3);
}
