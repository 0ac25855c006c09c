//! Time handling for replay scheduling.
//!
//! Two notions of time meet here:
//! - **Wall time** (`DateTime<Utc>`): when a state was recorded and when its
//!   replay must fire (`recorded_at + delta`).
//! - **Runtime time** (`tokio::time`): how long tasks sleep between checks.
//!
//! The `Clock` trait keeps the two consistent. `SystemClock` reads the real
//! wall clock; `VirtualClock` derives wall time from tokio's clock so a test
//! running under paused time sees days pass in milliseconds.

use std::fmt;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Source of wall-clock time for the scheduler.
pub trait Clock: Send + Sync + fmt::Debug {
    /// The current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// The real UTC wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock anchored at a fixed instant and advanced by tokio's clock.
///
/// Under `tokio::time::pause()` the runtime auto-advances through sleeps, and
/// this clock advances with it.
#[derive(Debug, Clone, Copy)]
pub struct VirtualClock {
    anchor: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl VirtualClock {
    /// Creates a clock reading `anchor` now.
    #[must_use]
    pub fn anchored_at(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        Duration::from_std(self.started.elapsed())
            .ok()
            .and_then(|elapsed| self.anchor.checked_add_signed(elapsed))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Converts a day count into a chrono duration.
#[must_use]
pub fn days(delta_days: u32) -> Duration {
    Duration::days(i64::from(delta_days))
}

/// Wall time at which a state recorded at `recorded_at` is replayed.
///
/// Saturates at the latest representable time.
#[must_use]
pub fn replay_at(recorded_at: DateTime<Utc>, delta_days: u32) -> DateTime<Utc> {
    recorded_at
        .checked_add_signed(days(delta_days))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Time left until `target`, zero if it has passed.
#[must_use]
pub fn until(now: DateTime<Utc>, target: DateTime<Utc>) -> StdDuration {
    (target - now).to_std().unwrap_or(StdDuration::ZERO)
}

/// One simulation cycle: the lookback/replay offset and the restart deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleWindow {
    /// Days of history replayed, also the replay offset.
    pub delta_days: u32,

    /// Poll granularity.
    #[serde(with = "interval_secs")]
    pub interval: StdDuration,

    /// When the cycle started.
    pub started_at: DateTime<Utc>,

    /// When the cycle must be relaunched (`started_at + delta_days`).
    pub deadline: DateTime<Utc>,
}

impl CycleWindow {
    /// Window starting at `started_at`.
    ///
    /// # Errors
    ///
    /// `DeltaOutOfRange` if the deadline or the lookback start falls outside
    /// the representable date range.
    pub fn new(
        started_at: DateTime<Utc>,
        delta_days: u32,
        interval: StdDuration,
    ) -> Result<Self, ValidationError> {
        let span = days(delta_days);
        let out_of_range = || ValidationError::DeltaOutOfRange { delta: delta_days };
        let deadline = started_at.checked_add_signed(span).ok_or_else(out_of_range)?;
        started_at.checked_sub_signed(span).ok_or_else(out_of_range)?;
        Ok(Self {
            delta_days,
            interval,
            started_at,
            deadline,
        })
    }

    /// Start of the history lookback (`started_at - delta_days`).
    #[must_use]
    pub fn lookback_start(&self) -> DateTime<Utc> {
        self.started_at
            .checked_sub_signed(days(self.delta_days))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Returns true once `now` is strictly past the deadline.
    #[must_use]
    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }
}

mod interval_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
