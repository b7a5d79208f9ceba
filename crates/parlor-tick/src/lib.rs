//! One-shot wake timer for Parlor rooms.
//!
//! A room has exactly one pending wake-up at a time. Every Drive cancels
//! whatever is pending and arms a new deadline; when the deadline
//! passes, the room drives again. [`WakeTimer`] owns that single
//! deadline, so "cancel pending, schedule new" is one assignment and an
//! old wake can never fire after a new one was armed.
//!
//! # Disarmed timers
//!
//! With no deadline armed, [`WakeTimer::wait`] pends forever. That is
//! what a room that was reloaded but not yet restarted looks like.
//!
//! # Integration
//!
//! The timer sits inside the room actor's `tokio::select!` loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* join, exit, do, ... */ }
//!         _ = timer.wait() => {
//!             timer.record_drive_start();
//!             drive(&mut room).await; // re-arms the timer
//!             timer.record_drive_end();
//!         }
//!     }
//! }
//! ```
//!
//! [`Clock`] maps the wall-clock seconds and milliseconds stored in room
//! snapshots onto Tokio instants. It reads time through Tokio, so tests
//! running with a paused runtime see wall-clock time advance with it.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{trace, warn};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Wall-clock time anchored to a Tokio instant.
///
/// Snapshots store wake times as Unix seconds (`DoTime`) and Unix
/// milliseconds (`MilliDoTime`). The clock converts those into
/// [`TokioInstant`]s for the timer and back.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin_ms: i64,
    origin: TokioInstant,
}

impl Clock {
    /// A clock anchored at the current system time.
    pub fn system() -> Self {
        let origin_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Self::starting_at(origin_ms)
    }

    /// A clock whose "now" is `origin_ms` Unix milliseconds.
    pub fn starting_at(origin_ms: i64) -> Self {
        Self {
            origin_ms,
            origin: TokioInstant::now(),
        }
    }

    /// Current Unix time in milliseconds.
    pub fn now_ms(&self) -> i64 {
        self.origin_ms + self.origin.elapsed().as_millis() as i64
    }

    /// Current Unix time in whole seconds.
    pub fn now_secs(&self) -> i64 {
        self.now_ms().div_euclid(1000)
    }

    /// The Tokio instant at which Unix time `at_ms` is reached.
    ///
    /// Times in the past map to "now": a timer is never armed behind
    /// the current instant.
    pub fn instant_at_ms(&self, at_ms: i64) -> TokioInstant {
        let now = TokioInstant::now();
        let now_ms = self.now_ms();
        if at_ms <= now_ms {
            return now;
        }
        now + Duration::from_millis((at_ms - now_ms) as u64)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a room's wake timer.
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// How long one Drive may take before a warning is logged.
    pub drive_budget: Duration,
    /// Upper bound of the random delay added by
    /// [`WakeTimer::arm_jittered`]. Spreads the first wake of rooms
    /// restarted in the same instant.
    pub max_jitter: Duration,
    /// Collect per-drive timing metrics.
    pub metrics_enabled: bool,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            drive_budget: Duration::from_millis(50),
            max_jitter: Duration::from_millis(500),
            metrics_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Wake info
// ---------------------------------------------------------------------------

/// Information about a fired wake, returned by [`WakeTimer::wait`].
#[derive(Debug, Clone)]
pub struct WakeInfo {
    /// Monotonically increasing wake number (starts at 1).
    pub wake: u64,
    /// The deadline that fired.
    pub scheduled: TokioInstant,
    /// How far past the deadline the wake was observed.
    pub late_by: Duration,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Runtime metrics for one wake timer.
#[derive(Debug, Clone, Default)]
pub struct WakeMetrics {
    /// Wakes that fired.
    pub total_wakes: u64,
    /// Times an outstanding deadline was replaced by a new one.
    pub total_rearms: u64,
    /// Times an outstanding deadline was cancelled without a replacement.
    pub total_cancels: u64,
    /// Drives that exceeded the configured budget.
    pub over_budget: u64,
    /// Exponential moving average of drive time (α = 0.1).
    pub avg_drive_time: Duration,
    /// Longest drive observed.
    pub max_drive_time: Duration,
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

/// A single-slot, one-shot timer.
///
/// Holds at most one deadline. Arming replaces it, cancelling clears
/// it, firing clears it. One `WakeTimer` per room actor.
pub struct WakeTimer {
    config: WakeConfig,
    deadline: Option<TokioInstant>,
    wake_count: u64,
    /// Wall-clock instant the current drive started.
    /// Set by `record_drive_start`, consumed by `record_drive_end`.
    drive_start: Option<Instant>,
    metrics: WakeMetrics,
}

impl WakeTimer {
    /// Creates a disarmed timer.
    pub fn new(config: WakeConfig) -> Self {
        Self {
            config,
            deadline: None,
            wake_count: 0,
            drive_start: None,
            metrics: WakeMetrics::default(),
        }
    }

    /// Arms the timer for `deadline`, replacing any pending deadline.
    ///
    /// Returns `true` if a pending deadline was replaced.
    pub fn arm_at(&mut self, deadline: TokioInstant) -> bool {
        let replaced = self.deadline.replace(deadline).is_some();
        if replaced {
            self.metrics.total_rearms += 1;
        }
        trace!(replaced, "wake timer armed");
        replaced
    }

    /// Arms the timer `delay` from now.
    pub fn arm_after(&mut self, delay: Duration) -> bool {
        self.arm_at(TokioInstant::now() + delay)
    }

    /// Arms the timer for `deadline` plus a random delay of up to
    /// `max_jitter`.
    pub fn arm_jittered(&mut self, deadline: TokioInstant) -> bool {
        let max_ms = self.config.max_jitter.as_millis() as u64;
        let jitter = if max_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..max_ms))
        } else {
            Duration::ZERO
        };
        self.arm_at(deadline + jitter)
    }

    /// Clears the pending deadline. Returns `true` if one was pending.
    pub fn cancel(&mut self) -> bool {
        let cancelled = self.deadline.take().is_some();
        if cancelled {
            self.metrics.total_cancels += 1;
        }
        cancelled
    }

    /// Whether a deadline is pending.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// The pending deadline, if any.
    pub fn deadline(&self) -> Option<TokioInstant> {
        self.deadline
    }

    /// Number of wakes that fired so far.
    pub fn wake_count(&self) -> u64 {
        self.wake_count
    }

    /// Waits until the pending deadline passes, then disarms.
    ///
    /// With no deadline pending this future never resolves, but
    /// `tokio::select!` keeps serving its other branches. Cancel safe:
    /// dropping the future before it fires leaves the deadline pending.
    pub async fn wait(&mut self) -> WakeInfo {
        let Some(deadline) = self.deadline else {
            std::future::pending::<()>().await;
            unreachable!()
        };

        time::sleep_until(deadline).await;

        self.deadline = None;
        self.wake_count += 1;
        self.metrics.total_wakes += 1;

        let late_by = TokioInstant::now().saturating_duration_since(deadline);
        trace!(wake = self.wake_count, late_ms = late_by.as_millis() as u64, "wake fired");

        WakeInfo {
            wake: self.wake_count,
            scheduled: deadline,
            late_by,
        }
    }

    /// Marks the start of a drive for budget monitoring.
    pub fn record_drive_start(&mut self) {
        self.drive_start = Some(Instant::now());
    }

    /// Marks the end of a drive. Logs a warning if it ran over budget.
    ///
    /// Does nothing unless [`record_drive_start`](Self::record_drive_start)
    /// was called first.
    pub fn record_drive_end(&mut self) {
        let Some(start) = self.drive_start.take() else {
            return;
        };
        let elapsed = start.elapsed();

        if elapsed > self.config.drive_budget {
            self.metrics.over_budget += 1;
            warn!(
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.config.drive_budget.as_secs_f64() * 1000.0,
                "drive exceeded budget"
            );
        }

        if self.config.metrics_enabled {
            if elapsed > self.metrics.max_drive_time {
                self.metrics.max_drive_time = elapsed;
            }
            let alpha = 0.1;
            let prev = self.metrics.avg_drive_time.as_secs_f64();
            let curr = elapsed.as_secs_f64();
            self.metrics.avg_drive_time =
                Duration::from_secs_f64(prev * (1.0 - alpha) + curr * alpha);
        }
    }

    /// Snapshot of current metrics.
    pub fn metrics(&self) -> &WakeMetrics {
        &self.metrics
    }
}

impl Default for WakeTimer {
    fn default() -> Self {
        Self::new(WakeConfig::default())
    }
}
