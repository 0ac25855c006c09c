//! Per-entity replay of one cycle's history.

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::entity::EntityId;
use crate::state::HistoryRecord;
use crate::time;

use super::state::ScheduledEvent;
use super::{RunContext, nap};

/// What a timeline task did before it finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimelineReport {
    /// Events whose dispatch succeeded.
    pub dispatched: usize,
    /// Events whose dispatch failed; they still count as consumed.
    pub failed: usize,
    /// Events never reached because the run was cancelled.
    pub abandoned: usize,
}

impl TimelineReport {
    /// True if every event was consumed.
    #[must_use]
    pub const fn completed(&self) -> bool {
        self.abandoned == 0
    }
}

/// Replays one entity's records in the order received, shifted by the run's delta.
///
/// A record due before the previous one fires right after it.
pub(crate) struct EntityTimelineRunner {
    ctx: RunContext,
    entity: EntityId,
    records: Vec<HistoryRecord>,
}

impl EntityTimelineRunner {
    pub fn new(ctx: RunContext, entity: EntityId, records: Vec<HistoryRecord>) -> Self {
        Self { ctx, entity, records }
    }

    pub async fn run(self) -> TimelineReport {
        let Self { ctx, entity, records } = self;
        let total = records.len();
        let mut report = TimelineReport::default();

        for (idx, record) in records.into_iter().enumerate() {
            let event = ScheduledEvent::from_record(entity.clone(), record, ctx.window.delta_days);
            let (id, fire_at) = (event.id, event.fire_at);
            let target = event.target.clone();

            if !ctx.pending.push(ctx.generation, event) {
                report.abandoned = total - idx;
                break;
            }
            debug!(entity = %entity, fire_at = %fire_at, state = %target.state, "switch foreseen");

            if !wait_until(&ctx, fire_at).await {
                report.abandoned = total - idx;
                break;
            }

            match ctx.dispatcher.apply(&entity, &target).await {
                Ok(()) => report.dispatched += 1,
                Err(err) => {
                    error!(entity = %entity, error = %err, "failed to replay state");
                    report.failed += 1;
                }
            }
            ctx.pending.remove(ctx.generation, &entity, id);
        }

        debug!(
            entity = %entity,
            dispatched = report.dispatched,
            failed = report.failed,
            abandoned = report.abandoned,
            "timeline finished"
        );
        report
    }
}

/// Waits until the clock reaches `fire_at`, polling at most every interval.
///
/// Returns false if the run was cancelled first.
async fn wait_until(ctx: &RunContext, fire_at: DateTime<Utc>) -> bool {
    loop {
        if ctx.token.is_cancelled() {
            return false;
        }
        let now = ctx.clock.now();
        if now >= fire_at {
            return true;
        }
        let step = ctx.window.interval.min(time::until(now, fire_at));
        if !nap(&ctx.token, step).await {
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio_util::sync::CancellationToken;

    use crate::dispatch::{ActionDispatcher, RecordingExecutor, ServiceDispatcher};
    use crate::error::DispatchError;
    use crate::scheduler::state::PendingEvents;
    use crate::state::StateSnapshot;
    use crate::time::{Clock, CycleWindow, VirtualClock};

    fn id(raw: &str) -> EntityId {
        EntityId::parse(raw).unwrap()
    }

    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap()
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, hour, minute, 0).unwrap()
    }

    fn context(dispatcher: Arc<dyn ActionDispatcher>, clock: Arc<dyn Clock>) -> RunContext {
        let pending = Arc::new(PendingEvents::default());
        pending.open(1);
        RunContext {
            generation: 1,
            token: CancellationToken::new(),
            window: CycleWindow::new(anchor(), 1, Duration::from_secs(600)).unwrap(),
            clock,
            dispatcher,
            pending,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_in_order_at_shifted_times() {
        let clock: Arc<dyn Clock> = Arc::new(VirtualClock::anchored_at(anchor()));
        let recorder = RecordingExecutor::new(clock.clone());
        let ctx = context(Arc::new(ServiceDispatcher::new(recorder.clone())), clock);

        // Closer together than the polling interval.
        let records = vec![
            HistoryRecord::new(at(10, 0), StateSnapshot::new("on")),
            HistoryRecord::new(at(10, 5), StateSnapshot::new("off")),
            HistoryRecord::new(at(10, 7), StateSnapshot::new("on")),
        ];
        let report = EntityTimelineRunner::new(ctx.clone(), id("light.x"), records).run().await;

        assert_eq!(report, TimelineReport { dispatched: 3, failed: 0, abandoned: 0 });
        let calls = recorder.calls();
        let services: Vec<_> = calls.iter().map(|c| c.call.service.as_str()).collect();
        assert_eq!(services, vec!["turn_on", "turn_off", "turn_on"]);

        let expected = [at(10, 0), at(10, 5), at(10, 7)].map(|t| t + chrono::Duration::days(1));
        for (call, due) in calls.iter().zip(expected) {
            assert!(call.at >= due);
            assert!(call.at - due < chrono::Duration::seconds(1));
        }
        assert!(ctx.pending.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_the_order_records_arrive_in() {
        let clock: Arc<dyn Clock> = Arc::new(VirtualClock::anchored_at(anchor()));
        let recorder = RecordingExecutor::new(clock.clone());
        let ctx = context(Arc::new(ServiceDispatcher::new(recorder.clone())), clock);

        let records = vec![
            HistoryRecord::new(at(11, 0), StateSnapshot::new("off")),
            HistoryRecord::new(at(10, 0), StateSnapshot::new("on")),
        ];
        let report = EntityTimelineRunner::new(ctx, id("light.x"), records).run().await;

        assert_eq!(report, TimelineReport { dispatched: 2, failed: 0, abandoned: 0 });
        let calls = recorder.calls();
        let services: Vec<_> = calls.iter().map(|c| c.call.service.as_str()).collect();
        assert_eq!(services, vec!["turn_off", "turn_on"]);
        let off_due = at(11, 0) + chrono::Duration::days(1);
        assert!(calls[0].at >= off_due);
        assert!(calls[1].at - calls[0].at < chrono::Duration::seconds(1));
    }

    #[tokio::test(start_paused = true)]
    async fn past_events_fire_immediately() {
        let clock: Arc<dyn Clock> = Arc::new(VirtualClock::anchored_at(anchor()));
        let recorder = RecordingExecutor::new(clock.clone());
        let ctx = context(Arc::new(ServiceDispatcher::new(recorder.clone())), clock);

        let records = vec![HistoryRecord::new(
            anchor() - chrono::Duration::days(2),
            StateSnapshot::new("off"),
        )];
        let started = tokio::time::Instant::now();
        EntityTimelineRunner::new(ctx, id("light.x"), records).run().await;

        assert_eq!(recorder.calls().len(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_remaining_events() {
        let clock: Arc<dyn Clock> = Arc::new(VirtualClock::anchored_at(anchor()));
        let recorder = RecordingExecutor::new(clock.clone());
        let ctx = context(Arc::new(ServiceDispatcher::new(recorder.clone())), clock);
        let token = ctx.token.clone();

        let records = vec![
            HistoryRecord::new(at(1, 0), StateSnapshot::new("on")),
            HistoryRecord::new(at(2, 0), StateSnapshot::new("off")),
        ];
        let task = tokio::spawn(EntityTimelineRunner::new(ctx, id("light.x"), records).run());

        tokio::time::sleep(Duration::from_secs(1800)).await;
        token.cancel();
        let report = tokio::time::timeout(Duration::from_secs(600), task)
            .await
            .expect("timeline exits within one interval")
            .unwrap();

        assert_eq!(report, TimelineReport { dispatched: 0, failed: 0, abandoned: 2 });
        assert!(recorder.calls().is_empty());
    }

    struct AlwaysFails;

    #[async_trait]
    impl ActionDispatcher for AlwaysFails {
        async fn apply(&self, entity: &EntityId, target: &StateSnapshot) -> Result<(), DispatchError> {
            Err(DispatchError::UnsupportedState {
                entity: entity.clone(),
                state: target.state.clone(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_failures_are_consumed() {
        let clock: Arc<dyn Clock> = Arc::new(VirtualClock::anchored_at(anchor()));
        let ctx = context(Arc::new(AlwaysFails), clock);

        let records = vec![
            HistoryRecord::new(at(1, 0), StateSnapshot::new("on")),
            HistoryRecord::new(at(2, 0), StateSnapshot::new("off")),
        ];
        let report = EntityTimelineRunner::new(ctx.clone(), id("light.x"), records).run().await;

        assert_eq!(report, TimelineReport { dispatched: 0, failed: 2, abandoned: 0 });
        assert!(report.completed());
        assert!(ctx.pending.snapshot().is_empty());
    }
}
