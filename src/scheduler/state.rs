//! Run state and the observable status surface.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RunParams;
use crate::entity::EntityId;
use crate::error::ValidationError;
use crate::state::{HistoryRecord, StateSnapshot};
use crate::time::{self, CycleWindow};

/// Unique identifier for a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Create a new random event id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A recorded transition mapped onto the current cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    /// Identity used to drop the event once dispatched.
    pub id: EventId,
    /// Entity the transition is replayed on.
    pub entity_id: EntityId,
    /// When the source recorded the transition.
    pub recorded_at: DateTime<Utc>,
    /// When the transition is replayed (`recorded_at + delta`).
    pub fire_at: DateTime<Utc>,
    /// State to restore.
    pub target: StateSnapshot,
}

impl ScheduledEvent {
    /// Maps a recorded transition `delta_days` forward.
    #[must_use]
    pub fn from_record(entity_id: EntityId, record: HistoryRecord, delta_days: u32) -> Self {
        Self {
            id: EventId::new(),
            entity_id,
            recorded_at: record.recorded_at,
            fire_at: time::replay_at(record.recorded_at, delta_days),
            target: record.snapshot,
        }
    }
}

/// Whether a start/stop belongs to an automatic cycle restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunMode {
    /// Operator-initiated start or stop.
    Fresh,
    /// End-of-cycle stop immediately followed by a start.
    Restart,
}

/// Everything a freshly claimed run needs to launch its tasks.
#[derive(Debug, Clone)]
pub(crate) struct RunTicket {
    pub generation: u64,
    pub token: CancellationToken,
    pub params: RunParams,
    pub window: CycleWindow,
    pub cycle: u64,
}

/// Controller-owned run state. Only `claim` and `halt` flip `running`.
#[derive(Debug, Default)]
pub(crate) struct RunState {
    pub running: bool,
    pub generation: u64,
    pub token: CancellationToken,
    pub started_at: Option<DateTime<Utc>>,
    pub cycle_started_at: Option<DateTime<Utc>>,
    pub cycle: u64,
    pub entities: Vec<EntityId>,
    pub window: Option<CycleWindow>,
    pub last_params: Option<RunParams>,
}

impl RunState {
    /// Marks a new run as active. Returns `Ok(None)` if one already is.
    ///
    /// State is left untouched when the cycle window cannot be built.
    pub fn claim(
        &mut self,
        now: DateTime<Utc>,
        params: RunParams,
        interval: std::time::Duration,
        mode: RunMode,
    ) -> Result<Option<RunTicket>, ValidationError> {
        if self.running {
            return Ok(None);
        }
        let window = CycleWindow::new(now, params.delta_days, interval)?;

        self.running = true;
        self.generation += 1;
        self.token = CancellationToken::new();

        if mode == RunMode::Fresh {
            self.started_at = Some(now);
            self.entities.clear();
            self.cycle = 0;
        }
        self.cycle += 1;
        self.cycle_started_at = Some(now);

        self.window = Some(window);
        self.last_params = Some(params.clone());

        Ok(Some(RunTicket {
            generation: self.generation,
            token: self.token.clone(),
            params,
            window,
            cycle: self.cycle,
        }))
    }

    /// Marks the active run as stopped and cancels its tasks.
    ///
    /// Returns false if nothing was running.
    pub fn halt(&mut self, mode: RunMode) -> bool {
        let was_running = self.running;
        self.running = false;
        self.token.cancel();
        self.window = None;
        if mode == RunMode::Fresh {
            self.started_at = None;
            self.cycle_started_at = None;
            self.cycle = 0;
            self.entities.clear();
        }
        was_running
    }

    /// True if `generation` is the run currently active.
    pub const fn is_current(&self, generation: u64) -> bool {
        self.running && self.generation == generation
    }
}

#[derive(Debug, Default)]
struct PendingInner {
    generation: Option<u64>,
    queues: BTreeMap<EntityId, VecDeque<ScheduledEvent>>,
}

/// Scheduled-but-not-yet-dispatched events, per entity.
///
/// Every timeline task mutates its own entity's queue; the map as a whole is
/// guarded by one mutex. Writes carry the generation of the run they belong
/// to and are ignored once that run is no longer the open one.
#[derive(Debug, Default)]
pub(crate) struct PendingEvents {
    inner: Mutex<PendingInner>,
}

impl PendingEvents {
    fn lock(&self) -> MutexGuard<'_, PendingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clears all queues and accepts writes from `generation` only.
    pub fn open(&self, generation: u64) {
        let mut inner = self.lock();
        inner.generation = Some(generation);
        inner.queues.clear();
    }

    /// Clears all queues and rejects further writes.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.generation = None;
        inner.queues.clear();
    }

    /// Appends `event` to its entity's queue. False if the run is stale.
    pub fn push(&self, generation: u64, event: ScheduledEvent) -> bool {
        let mut inner = self.lock();
        if inner.generation != Some(generation) {
            return false;
        }
        inner.queues.entry(event.entity_id.clone()).or_default().push_back(event);
        true
    }

    /// Removes a dispatched event. False if it was not pending.
    pub fn remove(&self, generation: u64, entity: &EntityId, id: EventId) -> bool {
        let mut inner = self.lock();
        if inner.generation != Some(generation) {
            return false;
        }
        let Some(queue) = inner.queues.get_mut(entity) else {
            return false;
        };
        let Some(pos) = queue.iter().position(|e| e.id == id) else {
            return false;
        };
        queue.remove(pos);
        if queue.is_empty() {
            inner.queues.remove(entity);
        }
        true
    }

    pub fn snapshot(&self) -> BTreeMap<EntityId, Vec<ScheduledEvent>> {
        self.lock()
            .queues
            .iter()
            .map(|(entity, queue)| (entity.clone(), queue.iter().cloned().collect()))
            .collect()
    }
}

/// Point-in-time view of the simulation, readable at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    /// Whether a run is active.
    pub running: bool,

    /// When the operator started the simulation; kept across cycle restarts.
    pub started_at: Option<DateTime<Utc>>,

    /// When the current cycle started.
    pub cycle_started_at: Option<DateTime<Utc>>,

    /// 1-based cycle number, 0 when stopped.
    pub cycle: u64,

    /// Expanded entities being replayed.
    pub entities: Vec<EntityId>,

    /// Events waiting to fire, per entity.
    pub next_events: BTreeMap<EntityId, Vec<ScheduledEvent>>,

    /// When the current cycle restarts.
    pub cycle_deadline: Option<DateTime<Utc>>,

    /// Replay offset of the current cycle.
    pub delta_days: Option<u32>,

    /// Poll interval of the current cycle, in seconds.
    pub interval_secs: Option<u64>,
}

impl RunStatus {
    pub(crate) fn capture(state: &RunState, pending: &PendingEvents) -> Self {
        Self {
            running: state.running,
            started_at: state.started_at,
            cycle_started_at: state.cycle_started_at,
            cycle: state.cycle,
            entities: state.entities.clone(),
            next_events: pending.snapshot(),
            cycle_deadline: state.window.map(|w| w.deadline),
            delta_days: state.window.map(|w| w.delta_days),
            interval_secs: state.window.map(|w| w.interval.as_secs()),
        }
    }

    /// Total number of pending events across entities.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.next_events.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use chrono::TimeZone;

    fn id(raw: &str) -> EntityId {
        EntityId::parse(raw).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap()
    }

    fn params() -> RunParams {
        RunParams {
            entities: vec![id("light.a")],
            delta_days: 1,
        }
    }

    fn event(entity: &str) -> ScheduledEvent {
        ScheduledEvent::from_record(
            id(entity),
            HistoryRecord::new(t0() - chrono::Duration::hours(2), StateSnapshot::new("on")),
            1,
        )
    }

    #[test]
    fn claim_is_exclusive() {
        let mut state = RunState::default();
        let ticket = state
            .claim(t0(), params(), Duration::from_secs(30), RunMode::Fresh)
            .unwrap()
            .unwrap();
        assert_eq!(ticket.generation, 1);
        assert_eq!(ticket.cycle, 1);
        assert_eq!(ticket.window.deadline, t0() + chrono::Duration::days(1));
        assert!(
            state
                .claim(t0(), params(), Duration::from_secs(30), RunMode::Fresh)
                .unwrap()
                .is_none()
        );
        assert_eq!(state.generation, 1);
    }

    #[test]
    fn halt_cancels_and_is_idempotent() {
        let mut state = RunState::default();
        let ticket = state
            .claim(t0(), params(), Duration::from_secs(30), RunMode::Fresh)
            .unwrap()
            .unwrap();
        assert!(state.halt(RunMode::Fresh));
        assert!(ticket.token.is_cancelled());
        assert!(state.started_at.is_none());
        assert!(!state.halt(RunMode::Fresh));
    }

    #[test]
    fn restart_keeps_start_and_bumps_cycle() {
        let mut state = RunState::default();
        state
            .claim(t0(), params(), Duration::from_secs(30), RunMode::Fresh)
            .unwrap()
            .unwrap();
        state.entities = vec![id("light.a")];

        let later = t0() + chrono::Duration::days(1);
        assert!(state.halt(RunMode::Restart));
        let ticket = state
            .claim(later, params(), Duration::from_secs(30), RunMode::Restart)
            .unwrap()
            .unwrap();
        assert_eq!(ticket.cycle, 2);
        assert_eq!(state.started_at, Some(t0()));
        assert_eq!(state.cycle_started_at, Some(later));
        assert_eq!(state.entities, vec![id("light.a")]);
        assert!(!state.is_current(1));
        assert!(state.is_current(2));
    }

    #[test]
    fn oversized_delta_leaves_state_untouched() {
        let mut state = RunState::default();
        let huge = RunParams {
            delta_days: 200_000_000,
            ..params()
        };
        let err = state
            .claim(t0(), huge, Duration::from_secs(30), RunMode::Fresh)
            .unwrap_err();
        assert_eq!(err, ValidationError::DeltaOutOfRange { delta: 200_000_000 });
        assert!(!state.running);
        assert_eq!(state.generation, 0);
        assert!(state.window.is_none());
        assert!(state.started_at.is_none());
        assert!(!state.token.is_cancelled());

        let ticket = state
            .claim(t0(), params(), Duration::from_secs(30), RunMode::Fresh)
            .unwrap()
            .unwrap();
        assert_eq!(ticket.generation, 1);
    }

    #[test]
    fn scheduled_event_fires_delta_later() {
        let ev = event("light.a");
        assert_eq!(ev.fire_at - ev.recorded_at, chrono::Duration::days(1));
    }

    #[test]
    fn pending_rejects_stale_generations() {
        let pending = PendingEvents::default();
        pending.open(1);
        let ev = event("light.a");
        let ev_id = ev.id;
        assert!(pending.push(1, ev));
        assert!(!pending.push(2, event("light.b")));
        assert_eq!(pending.snapshot().len(), 1);

        pending.open(2);
        assert!(pending.snapshot().is_empty());
        assert!(!pending.remove(1, &id("light.a"), ev_id));

        pending.close();
        assert!(!pending.push(2, event("light.a")));
    }

    #[test]
    fn pending_remove_by_id() {
        let pending = PendingEvents::default();
        pending.open(7);
        let first = event("light.a");
        let second = event("light.a");
        let (first_id, second_id) = (first.id, second.id);
        pending.push(7, first);
        pending.push(7, second);

        assert!(pending.remove(7, &id("light.a"), second_id));
        let snap = pending.snapshot();
        assert_eq!(snap[&id("light.a")].len(), 1);
        assert_eq!(snap[&id("light.a")][0].id, first_id);

        assert!(pending.remove(7, &id("light.a"), first_id));
        assert!(pending.snapshot().is_empty());
        assert!(!pending.remove(7, &id("light.a"), first_id));
    }
}
