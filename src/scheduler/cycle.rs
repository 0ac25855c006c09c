//! Cycle timer: relaunches the run once its window has elapsed.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, error, info};

use super::controller::{SimulationController, StartOutcome};
use super::{RunContext, nap};

/// Waits out one cycle, then relaunches the run with the same parameters.
pub(crate) struct CycleScheduler {
    controller: SimulationController,
    ctx: RunContext,
}

impl CycleScheduler {
    pub fn new(controller: SimulationController, ctx: RunContext) -> Self {
        Self { controller, ctx }
    }

    // Boxed so the controller can spawn the next cycle from inside this one.
    pub fn run(self) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let Self { controller, ctx } = self;
            debug!(
                generation = ctx.generation,
                deadline = %ctx.window.deadline,
                "cycle relaunch scheduled"
            );

            loop {
                if !nap(&ctx.token, ctx.window.interval).await {
                    debug!(generation = ctx.generation, "cycle abandoned");
                    return;
                }
                if ctx.window.has_elapsed(ctx.clock.now()) {
                    break;
                }
            }

            match controller.restart(ctx.generation).await {
                Ok(StartOutcome::Started { cycle, timelines, .. }) => {
                    info!(cycle, timelines, "presence simulation relaunched");
                }
                Ok(_) => debug!(generation = ctx.generation, "relaunch skipped, run no longer current"),
                Err(err) => error!(error = %err, "presence simulation relaunch failed"),
            }
        })
    }
}
