use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::entity::EntityId;
use crate::error::DispatchError;
use crate::time::Clock;

use super::{ServiceCall, ServiceExecutor};

/// A service call together with the wall time it was issued at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedCall {
    /// When the call was issued.
    pub at: DateTime<Utc>,
    /// The call itself.
    pub call: ServiceCall,
}

/// Executor that logs and records calls instead of performing them.
///
/// Backs the dry-run mode of the `presim` binary and lets tests assert on
/// what would have been sent to the live system, and when.
#[derive(Debug, Clone)]
pub struct RecordingExecutor {
    clock: Arc<dyn Clock>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl RecordingExecutor {
    /// Recorder stamping calls with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every call recorded so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Calls recorded for one entity.
    #[must_use]
    pub fn calls_for(&self, entity: &EntityId) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| &c.call.entity_id == entity)
            .cloned()
            .collect()
    }

    /// Forgets every recorded call.
    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[async_trait]
impl ServiceExecutor for RecordingExecutor {
    async fn call(&self, call: ServiceCall) -> Result<(), DispatchError> {
        let at = self.clock.now();
        info!(
            entity = %call.entity_id,
            service = %call.qualified_name(),
            data = %serde_json::Value::Object(call.data.clone()),
            "replaying state"
        );
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall { at, call });
        Ok(())
    }
}
