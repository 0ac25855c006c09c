//! The simulation controller.
//!
//! Owns the run state and the task registry. A start is split in two:
//! a synchronous claim under the state lock, then an async launch (expand,
//! fetch, spawn) that re-checks its generation before publishing anything.
//! A stop arriving during the launch therefore wins.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::{CallOverrides, SimulationConfig};
use crate::dispatch::ActionDispatcher;
use crate::entity::EntityId;
use crate::error::{SimResult, SimulationError, ValidationError};
use crate::expand::expand;
use crate::storage::{EntityRegistry, HistoryFetcher};
use crate::time::{Clock, SystemClock};

use super::RunContext;
use super::cycle::CycleScheduler;
use super::state::{PendingEvents, RunMode, RunState, RunStatus, RunTicket};
use super::timeline::EntityTimelineRunner;

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Tasks were spawned for a new run.
    Started {
        /// Cycle number of the run, 1 for a fresh start.
        cycle: u64,
        /// Distinct entities after group expansion.
        entities: usize,
        /// Entities with history to replay.
        timelines: usize,
    },
    /// A run was already active; nothing changed.
    AlreadyRunning,
    /// The run was stopped or superseded before its tasks were spawned.
    Cancelled,
}

impl StartOutcome {
    /// True if this call launched a run.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        matches!(self, Self::Started { .. })
    }
}

/// Builder for [`SimulationController`].
pub struct ControllerBuilder {
    config: SimulationConfig,
    registry: Option<Arc<dyn EntityRegistry>>,
    history: Option<Arc<dyn HistoryFetcher>>,
    dispatcher: Option<Arc<dyn ActionDispatcher>>,
    clock: Arc<dyn Clock>,
}

impl ControllerBuilder {
    /// Sets the registry used to verify entities and resolve groups.
    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn EntityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the history source.
    #[must_use]
    pub fn history(mut self, history: Arc<dyn HistoryFetcher>) -> Self {
        self.history = Some(history);
        self
    }

    /// Sets the dispatcher that replays states.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Overrides the wall clock (defaults to `SystemClock`).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the controller.
    ///
    /// # Errors
    ///
    /// `MissingField` if a collaborator was not set, or the config's own
    /// validation error.
    pub fn build(self) -> Result<SimulationController, ValidationError> {
        self.config.validate()?;
        let registry = self.registry.ok_or(ValidationError::MissingField {
            field: "registry".to_string(),
        })?;
        let history = self.history.ok_or(ValidationError::MissingField {
            field: "history".to_string(),
        })?;
        let dispatcher = self.dispatcher.ok_or(ValidationError::MissingField {
            field: "dispatcher".to_string(),
        })?;

        Ok(SimulationController {
            inner: Arc::new(ControllerInner {
                config: RwLock::new(self.config),
                state: Mutex::new(RunState::default()),
                pending: Arc::new(PendingEvents::default()),
                registry,
                history,
                dispatcher,
                clock: self.clock,
                tasks: TaskTracker::new(),
            }),
        })
    }
}

struct ControllerInner {
    config: RwLock<SimulationConfig>,
    state: Mutex<RunState>,
    pending: Arc<PendingEvents>,
    registry: Arc<dyn EntityRegistry>,
    history: Arc<dyn HistoryFetcher>,
    dispatcher: Arc<dyn ActionDispatcher>,
    clock: Arc<dyn Clock>,
    tasks: TaskTracker,
}

/// Starts, stops and restarts the presence simulation.
///
/// Cheap to clone; clones share the same run.
#[derive(Clone)]
pub struct SimulationController {
    inner: Arc<ControllerInner>,
}

impl fmt::Debug for SimulationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationController")
            .field("running", &self.is_running())
            .field("clock", &self.inner.clock)
            .field("tasks", &self.inner.tasks.len())
            .finish_non_exhaustive()
    }
}

impl SimulationController {
    /// Starts building a controller around `config`.
    #[must_use]
    pub fn builder(config: SimulationConfig) -> ControllerBuilder {
        ControllerBuilder {
            config,
            registry: None,
            history: None,
            dispatcher: None,
            clock: Arc::new(SystemClock),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_config(&self) -> RwLockReadGuard<'_, SimulationConfig> {
        self.inner.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The configured defaults.
    #[must_use]
    pub fn config(&self) -> SimulationConfig {
        self.read_config().clone()
    }

    /// Replaces the configured defaults.
    ///
    /// An active run keeps its parameters; the new ones apply from the next
    /// operator start. The polling interval also applies from the next cycle.
    ///
    /// # Errors
    ///
    /// The config's validation error; the previous config is kept.
    pub fn reconfigure(&self, config: SimulationConfig) -> SimResult<()> {
        config.validate()?;
        let mut current = self.inner.config.write().unwrap_or_else(PoisonError::into_inner);
        *current = config;
        info!(
            entities = current.entities.len(),
            delta = current.delta,
            interval = current.interval,
            "configuration updated"
        );
        Ok(())
    }

    /// Whether a run is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    /// A consistent snapshot of the status surface.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        let state = self.lock_state();
        RunStatus::capture(&state, &self.inner.pending)
    }

    /// Number of spawned tasks that have not exited yet.
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Starts a run with the configured defaults, or `overrides` where given.
    ///
    /// # Errors
    ///
    /// - `Validation` if the overrides resolve to an invalid run, or the
    ///   delta reaches outside the supported date range
    /// - `Fatal` if the history could not be fetched; the run is stopped first
    pub async fn start(&self, overrides: Option<&CallOverrides>) -> SimResult<StartOutcome> {
        let (params, interval) = {
            let config = self.read_config();
            let params = overrides.cloned().unwrap_or_default().resolve(&config)?;
            (params, config.interval())
        };

        let ticket = {
            let mut state = self.lock_state();
            let claimed = state.claim(self.inner.clock.now(), params, interval, RunMode::Fresh)?;
            let Some(ticket) = claimed else {
                warn!("Presence simulation already running. Doing nothing");
                return Ok(StartOutcome::AlreadyRunning);
            };
            self.inner.pending.open(ticket.generation);
            ticket
        };

        info!(
            entities = ?ticket.params.entities,
            delta_days = ticket.params.delta_days,
            "presence simulation started"
        );
        self.launch(ticket).await
    }

    /// Stops the active run. Returns false if nothing was running.
    pub fn stop(&self) -> bool {
        let stopped = self.halt(RunMode::Fresh);
        if stopped {
            info!("presence simulation stopped");
        } else {
            debug!("presence simulation is not running");
        }
        stopped
    }

    /// Stops the active run and hands `err` back as a fatal error.
    ///
    /// # Errors
    ///
    /// Always returns `Err(SimulationError::Fatal(err))`.
    pub fn stop_with_error(&self, err: impl Into<SimulationError>) -> SimResult<()> {
        let err = err.into();
        error!(error = %err, "stopping presence simulation on error");
        self.halt(RunMode::Fresh);
        Err(SimulationError::fatal(err))
    }

    /// Stops if running, starts otherwise. Returns whether a run is active
    /// afterwards.
    ///
    /// # Errors
    ///
    /// As [`start`](Self::start).
    pub async fn toggle(&self, overrides: Option<&CallOverrides>) -> SimResult<bool> {
        if self.is_running() {
            self.stop();
            return Ok(false);
        }
        let outcome = self.start(overrides).await?;
        Ok(outcome.is_started() || self.is_running())
    }

    /// Stops the active run and waits for every spawned task to exit.
    pub async fn shutdown(&self) {
        self.stop();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
        debug!("all simulation tasks exited");
    }

    /// Relaunches run `generation` with its last parameters.
    ///
    /// Does nothing if that run was stopped or replaced meanwhile.
    pub(crate) async fn restart(&self, generation: u64) -> SimResult<StartOutcome> {
        let ticket = {
            let mut state = self.lock_state();
            if !state.is_current(generation) {
                return Ok(StartOutcome::Cancelled);
            }
            let Some(params) = state.last_params.clone() else {
                return Err(SimulationError::internal("running simulation has no parameters"));
            };
            let interval = self.read_config().interval();

            state.halt(RunMode::Restart);
            let ticket = match state.claim(self.inner.clock.now(), params, interval, RunMode::Restart) {
                Ok(Some(ticket)) => ticket,
                Ok(None) => return Err(SimulationError::internal("run still active after halt")),
                Err(err) => {
                    state.halt(RunMode::Fresh);
                    self.inner.pending.close();
                    error!(error = %err, "stopping presence simulation on error");
                    return Err(SimulationError::fatal(err.into()));
                }
            };
            self.inner.pending.open(ticket.generation);
            ticket
        };

        info!(cycle = ticket.cycle, "presence simulation cycle restarted");
        self.launch(ticket).await
    }

    fn halt(&self, mode: RunMode) -> bool {
        let mut state = self.lock_state();
        let was_running = state.halt(mode);
        self.inner.pending.close();
        was_running
    }

    fn record_entities(&self, generation: u64, entities: &[EntityId]) -> bool {
        let mut state = self.lock_state();
        if !state.is_current(generation) {
            return false;
        }
        state.entities = entities.to_vec();
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_state().is_current(generation)
    }

    async fn launch(&self, ticket: RunTicket) -> SimResult<StartOutcome> {
        let RunTicket {
            generation,
            token,
            params,
            window,
            cycle,
        } = ticket;

        let expansion = expand(&params.entities, self.inner.registry.as_ref());
        for failure in &expansion.failures {
            error!(error = %failure, "Error when trying to identify entity");
        }
        let entities = expansion.unique_entities();
        if !self.record_entities(generation, &entities) {
            debug!(generation, "run stopped before entities were recorded");
            return Ok(StartOutcome::Cancelled);
        }

        let since = window.lookback_start();
        debug!(since = %since, entities = entities.len(), "fetching history");
        let history = match self.inner.history.fetch(&entities, since).await {
            Ok(history) => history,
            Err(err) => {
                if !self.is_current(generation) {
                    debug!(generation, error = %err, "history failure for a stopped run ignored");
                    return Ok(StartOutcome::Cancelled);
                }
                return self.stop_with_error(err).map(|()| StartOutcome::Cancelled);
            }
        };

        if token.is_cancelled() {
            debug!(generation, "run stopped before tasks were spawned");
            return Ok(StartOutcome::Cancelled);
        }

        let ctx = RunContext {
            generation,
            token,
            window,
            clock: self.inner.clock.clone(),
            dispatcher: self.inner.dispatcher.clone(),
            pending: self.inner.pending.clone(),
        };

        let mut timelines = 0;
        for (entity, records) in history {
            if records.is_empty() {
                continue;
            }
            debug!(entity = %entity, events = records.len(), "launching timeline");
            let runner = EntityTimelineRunner::new(ctx.clone(), entity, records);
            self.inner.tasks.spawn(async move {
                runner.run().await;
            });
            timelines += 1;
        }

        self.inner.tasks.spawn(CycleScheduler::new(self.clone(), ctx).run());

        info!(cycle, timelines, deadline = %window.deadline, "all tasks launched");
        Ok(StartOutcome::Started {
            cycle,
            entities: entities.len(),
            timelines,
        })
    }
}
