//! Scheduling: the controller, per-entity timelines and the cycle timer.
//!
//! A run owns one `CancellationToken`. Every task it spawns waits with
//! `tokio::select!` on that token and on a sleep bounded by the polling
//! interval, so stopping a run is observed without waiting out the interval.

mod controller;
mod cycle;
mod state;
mod timeline;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::dispatch::ActionDispatcher;
use crate::time::{Clock, CycleWindow};

pub use controller::{ControllerBuilder, SimulationController, StartOutcome};
pub use state::{EventId, RunStatus, ScheduledEvent};
pub use timeline::TimelineReport;

use state::PendingEvents;

/// Shared, cheaply clonable handles every task of one run needs.
#[derive(Clone)]
pub(crate) struct RunContext {
    pub generation: u64,
    pub token: CancellationToken,
    pub window: CycleWindow,
    pub clock: Arc<dyn Clock>,
    pub dispatcher: Arc<dyn ActionDispatcher>,
    pub pending: Arc<PendingEvents>,
}

/// Sleeps for `duration` unless the run is cancelled first.
///
/// Returns true if the run is still live afterwards.
pub(crate) async fn nap(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        () = token.cancelled() => false,
        () = tokio::time::sleep(duration) => !token.is_cancelled(),
    }
}
