//! Wall-clock time derived from a wrapping uptime counter.
//!
//! Actors have no RTC. After a sync with a trusted time source they track
//! wall-clock time as `wall_clock_at_sync + elapsed`, where `elapsed` comes
//! from a 32-bit millisecond counter that wraps roughly every 49.7 days.
//! Every observed decrease of the counter counts as one wrap.

use crate::{error::Result, Error, Millis, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};
use std::time::Instant;

/// Period of the uptime counter.
pub const U32_COUNTER_PERIOD: u64 = 1 << 32;

/// A monotonic millisecond counter that wraps at `u32::MAX`.
pub trait MonotonicSource: Send + Sync {
    fn now(&self) -> u32;
}

impl<F> MonotonicSource for F
where
    F: Fn() -> u32 + Send + Sync,
{
    fn now(&self) -> u32 {
        self()
    }
}

/// Process uptime in milliseconds, truncated to 32 bits.
#[derive(Debug, Clone)]
pub struct SystemUptime {
    started: Instant,
}

impl SystemUptime {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemUptime {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicSource for SystemUptime {
    fn now(&self) -> u32 {
        // Truncation is the wrap.
        self.started.elapsed().as_millis() as u32
    }
}

/// A counter moved by hand, for tests and simulations.
#[derive(Debug, Clone, Default)]
pub struct ManualCounter(Arc<AtomicU32>);

impl ManualCounter {
    pub fn new(start: u32) -> Self {
        Self(Arc::new(AtomicU32::new(start)))
    }

    pub fn set(&self, value: u32) {
        self.0.store(value, Ordering::SeqCst);
    }

    /// Advance by `ms`, wrapping like the hardware counter.
    pub fn advance(&self, ms: u32) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl MonotonicSource for ManualCounter {
    fn now(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Clock state captured at the last sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockState {
    pub wall_clock_at_sync: Millis,
    pub monotonic_at_sync: u32,
    pub overflow_count: u32,
    /// Last counter reading, used to detect wraps
    pub last_observed: u32,
}

/// How far apart two clocks may drift before a correction is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftPolicy {
    pub threshold_ms: u64,
}

impl DriftPolicy {
    /// App correcting a device over the local link.
    pub const APP_DEVICE: DriftPolicy = DriftPolicy { threshold_ms: 5_000 };
    /// Telemetry older than this is considered stale.
    pub const TELEMETRY_STALENESS: DriftPolicy = DriftPolicy {
        threshold_ms: 60_000,
    };

    pub fn new(threshold_ms: u64) -> Self {
        Self { threshold_ms }
    }

    pub fn exceeds(&self, drift_ms: i64) -> bool {
        drift_ms.unsigned_abs() > self.threshold_ms
    }
}

/// Result of [`TimeAuthority::apply_correction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Correction {
    /// Trusted time minus local time; `None` if the clock was unsynced
    pub drift_ms: Option<i64>,
    /// Whether the clock was rebased
    pub applied: bool,
}

/// Per-actor wall-clock authority.
#[derive(Debug)]
pub struct TimeAuthority<M> {
    source: M,
    state: Option<ClockState>,
}

impl<M: MonotonicSource> TimeAuthority<M> {
    /// Create an unsynced authority reading `source`.
    pub fn new(source: M) -> Self {
        Self {
            source,
            state: None,
        }
    }

    /// Rebase on a trusted wall-clock reading.
    pub fn sync(&mut self, wall_ms: Millis) {
        let now = self.source.now();
        self.state = Some(ClockState {
            wall_clock_at_sync: wall_ms,
            monotonic_at_sync: now,
            overflow_count: 0,
            last_observed: now,
        });
    }

    pub fn is_synced(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<ClockState> {
        self.state
    }

    /// Current wall-clock time, or `Unset` before the first sync.
    pub fn current_timestamp(&mut self) -> Timestamp {
        let now = self.source.now();
        let Some(state) = self.state.as_mut() else {
            return Timestamp::Unset;
        };

        if now < state.last_observed {
            state.overflow_count += 1;
        }
        state.last_observed = now;

        let elapsed = (u64::from(state.overflow_count) * U32_COUNTER_PERIOD + u64::from(now))
            .saturating_sub(u64::from(state.monotonic_at_sync));
        Timestamp::At(state.wall_clock_at_sync.saturating_add(elapsed))
    }

    /// Current wall-clock time in milliseconds.
    pub fn now_ms(&mut self) -> Result<Millis> {
        self.current_timestamp().millis().ok_or(Error::ClockUnsynced)
    }

    /// Compare against a trusted reading and rebase if the drift exceeds
    /// `policy`. An unsynced clock is always rebased.
    pub fn apply_correction(&mut self, trusted_ms: Millis, policy: DriftPolicy) -> Correction {
        let Some(local) = self.current_timestamp().millis() else {
            self.sync(trusted_ms);
            return Correction {
                drift_ms: None,
                applied: true,
            };
        };

        let drift_ms = trusted_ms as i64 - local as i64;
        let applied = policy.exceeds(drift_ms);
        if applied {
            self.sync(trusted_ms);
        }

        Correction {
            drift_ms: Some(drift_ms),
            applied,
        }
    }
}
