//! Replaying recorded states on the live system.
//!
//! The scheduler hands every due event to an `ActionDispatcher`. The
//! provided `ServiceDispatcher` splits the work in two:
//! - an `ActionPlanner` turns a snapshot into service calls (category policy)
//! - a `ServiceExecutor` performs each call against the live backend

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::EntityId;
use crate::error::DispatchError;
use crate::state::StateSnapshot;

/// Category policy.
pub mod policy;
/// Recording executor for dry runs and tests.
pub mod recording;
/// Planner + executor dispatcher.
pub mod service;

pub use policy::{ActionPlanner, DefaultPlanner};
pub use recording::{RecordedCall, RecordingExecutor};
pub use service::ServiceDispatcher;

/// Applies a recorded state to an entity in the live system.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    /// Replays `target` on `entity`.
    ///
    /// Best effort: the scheduler logs an error and moves on, it never retries.
    async fn apply(&self, entity: &EntityId, target: &StateSnapshot) -> Result<(), DispatchError>;
}

/// One call into the live system, e.g. `light.turn_on`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCall {
    /// Service domain (`light`, `cover`, `homeassistant`).
    pub domain: String,

    /// Service name within the domain (`turn_on`, `set_cover_position`).
    pub service: String,

    /// Target entity.
    pub entity_id: EntityId,

    /// Extra service data (`brightness`, `position`...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,

    /// Wait for the backend to settle before returning.
    #[serde(default)]
    pub blocking: bool,
}

impl ServiceCall {
    /// A non-blocking call without service data.
    #[must_use]
    pub fn new(domain: impl Into<String>, service: impl Into<String>, entity_id: EntityId) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            entity_id,
            data: Map::new(),
            blocking: false,
        }
    }

    /// Adds one service data entry.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Sets whether the call waits for the backend.
    #[must_use]
    pub const fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// `domain.service`, e.g. `light.turn_on`.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }
}

/// Executes service calls against the live backend.
#[async_trait]
pub trait ServiceExecutor: Send + Sync {
    /// Performs `call`. Non-blocking calls should return as soon as the call
    /// is accepted; blocking calls return once the backend has settled.
    async fn call(&self, call: ServiceCall) -> Result<(), DispatchError>;
}
