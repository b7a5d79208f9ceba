//! Integration tests for the one-shot wake timer and clock.
//!
//! Uses a paused Tokio clock so deadlines resolve deterministically.

use std::time::Duration;

use parlor_tick::{Clock, WakeConfig, WakeTimer};
use tokio::time::Instant;

// =========================================================================
// Helpers
// =========================================================================

fn no_jitter() -> WakeConfig {
    WakeConfig {
        max_jitter: Duration::ZERO,
        ..WakeConfig::default()
    }
}

// =========================================================================
// Arming and firing
// =========================================================================

#[test]
fn test_new_timer_is_disarmed() {
    let t = WakeTimer::new(no_jitter());
    assert!(!t.is_armed());
    assert_eq!(t.deadline(), None);
    assert_eq!(t.wake_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_wait_fires_once_then_disarms() {
    let mut t = WakeTimer::new(no_jitter());
    let start = Instant::now();
    t.arm_after(Duration::from_secs(3));

    let info = t.wait().await;
    assert_eq!(info.wake, 1);
    assert!(Instant::now() - start >= Duration::from_secs(3));
    assert!(!t.is_armed(), "one-shot timer must disarm after firing");

    let again = tokio::time::timeout(Duration::from_secs(60), t.wait()).await;
    assert!(again.is_err(), "disarmed timer should pend");
}

#[tokio::test(start_paused = true)]
async fn test_disarmed_timer_never_fires() {
    let mut t = WakeTimer::new(no_jitter());
    let result = tokio::time::timeout(Duration::from_secs(30), t.wait()).await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_rearm_replaces_pending_deadline() {
    let mut t = WakeTimer::new(no_jitter());
    let start = Instant::now();

    assert!(!t.arm_after(Duration::from_secs(1)));
    assert!(t.arm_after(Duration::from_secs(10)), "second arm replaces the first");

    t.wait().await;
    assert!(
        Instant::now() - start >= Duration::from_secs(10),
        "the replaced 1s deadline must not fire"
    );
    assert_eq!(t.metrics().total_rearms, 1);
    assert_eq!(t.wake_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_clears_deadline() {
    let mut t = WakeTimer::new(no_jitter());
    t.arm_after(Duration::from_secs(1));
    assert!(t.cancel());
    assert!(!t.cancel(), "second cancel has nothing to clear");

    let result = tokio::time::timeout(Duration::from_secs(5), t.wait()).await;
    assert!(result.is_err());
    assert_eq!(t.metrics().total_cancels, 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_now_fires_immediately() {
    let mut t = WakeTimer::new(no_jitter());
    t.arm_at(Instant::now());
    let info = tokio::time::timeout(Duration::from_millis(1), t.wait())
        .await
        .expect("deadline at now should fire at once");
    assert_eq!(info.wake, 1);
}

#[tokio::test(start_paused = true)]
async fn test_jitter_stays_within_bound() {
    let mut t = WakeTimer::new(WakeConfig {
        max_jitter: Duration::from_millis(200),
        ..WakeConfig::default()
    });
    let base = Instant::now() + Duration::from_secs(1);
    t.arm_jittered(base);

    let deadline = t.deadline().unwrap();
    assert!(deadline >= base);
    assert!(deadline < base + Duration::from_millis(200));
}

// =========================================================================
// Drive budget
// =========================================================================

#[test]
fn test_record_drive_end_without_start_is_noop() {
    let mut t = WakeTimer::new(no_jitter());
    t.record_drive_end();
    assert_eq!(t.metrics().max_drive_time, Duration::ZERO);
}

#[test]
fn test_drive_over_budget_is_counted() {
    let mut t = WakeTimer::new(WakeConfig {
        drive_budget: Duration::from_micros(1),
        ..no_jitter()
    });
    t.record_drive_start();
    // record_drive_end uses std::time::Instant, so real time must pass.
    std::thread::sleep(Duration::from_millis(2));
    t.record_drive_end();

    assert_eq!(t.metrics().over_budget, 1);
    assert!(t.metrics().max_drive_time >= Duration::from_millis(2));
}

// =========================================================================
// Clock
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_clock_advances_with_tokio_time() {
    let clock = Clock::starting_at(1_000_000);
    assert_eq!(clock.now_ms(), 1_000_000);
    assert_eq!(clock.now_secs(), 1_000);

    tokio::time::advance(Duration::from_millis(2_500)).await;
    assert_eq!(clock.now_ms(), 1_002_500);
    assert_eq!(clock.now_secs(), 1_002);
}

#[tokio::test(start_paused = true)]
async fn test_clock_instant_at_ms_maps_future_and_clamps_past() {
    let clock = Clock::starting_at(10_000);
    let now = Instant::now();

    assert_eq!(clock.instant_at_ms(13_000), now + Duration::from_secs(3));
    assert_eq!(clock.instant_at_ms(5_000), now, "past times clamp to now");
}

// =========================================================================
// select! loop pattern (mirrors the room actor)
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_select_loop_rearms_from_handler() {
    let mut t = WakeTimer::new(no_jitter());
    t.arm_after(Duration::from_secs(5));

    let (tx, mut rx) = tokio::sync::mpsc::channel::<&str>(4);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(16)).await;
        tx.send("stop").await.ok();
    });

    let mut drives = 0u32;
    loop {
        tokio::select! {
            Some(cmd) = rx.recv() => {
                assert_eq!(cmd, "stop");
                break;
            }
            _ = t.wait() => {
                drives += 1;
                t.arm_after(Duration::from_secs(5));
            }
        }
    }

    assert_eq!(drives, 3, "wakes at 5s, 10s and 15s");
}
