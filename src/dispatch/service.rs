use async_trait::async_trait;
use tracing::debug;

use crate::entity::EntityId;
use crate::error::DispatchError;
use crate::state::StateSnapshot;

use super::policy::{ActionPlanner, DefaultPlanner};
use super::{ActionDispatcher, ServiceExecutor};

/// Dispatcher that plans service calls and runs them through an executor.
///
/// Calls are issued in plan order. If one fails, the remaining calls of the
/// same plan are skipped.
#[derive(Debug)]
pub struct ServiceDispatcher<X, P = DefaultPlanner> {
    executor: X,
    planner: P,
}

impl<X: ServiceExecutor> ServiceDispatcher<X, DefaultPlanner> {
    /// Create a dispatcher with the default category policy.
    pub fn new(executor: X) -> Self {
        Self::with_planner(executor, DefaultPlanner)
    }
}

impl<X: ServiceExecutor, P: ActionPlanner> ServiceDispatcher<X, P> {
    /// Create a dispatcher with a custom policy.
    pub fn with_planner(executor: X, planner: P) -> Self {
        Self { executor, planner }
    }

    /// The wrapped executor.
    #[must_use]
    pub const fn executor(&self) -> &X {
        &self.executor
    }
}

#[async_trait]
impl<X: ServiceExecutor, P: ActionPlanner> ActionDispatcher for ServiceDispatcher<X, P> {
    async fn apply(&self, entity: &EntityId, target: &StateSnapshot) -> Result<(), DispatchError> {
        let calls = self.planner.plan(entity, target)?;
        if calls.is_empty() {
            debug!(entity = %entity, state = %target.state, "nothing to replay for transitional state");
            return Ok(());
        }
        for call in calls {
            debug!(entity = %entity, service = %call.qualified_name(), blocking = call.blocking, "calling service");
            self.executor.call(call).await?;
        }
        Ok(())
    }
}
