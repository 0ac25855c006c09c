//! # presence-sim - Presence simulation by history replay
//!
//! Makes a home look occupied by replaying what its lights, covers and
//! switches did `delta` days ago. Every recorded state transition is fired
//! again exactly `delta` days after it happened; after `delta` days the cycle
//! restarts on fresh history.
//!
//! ## Core Concepts
//!
//! - **EntityId**: a `<domain>.<object_id>` handle for a controllable device
//! - **StateSnapshot**: a recorded state plus its attributes
//! - **Expansion**: configured refs flattened through (nested) groups
//! - **SimulationController**: start, stop and toggle the replay; status surface
//! - **ActionDispatcher**: replays a snapshot on the live system
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use presence_sim::dispatch::{RecordingExecutor, ServiceDispatcher};
//! use presence_sim::storage::InMemoryStores;
//! use presence_sim::{SimulationConfig, SimulationController, SystemClock};
//!
//! let stores = InMemoryStores::from_json(&fixture)?;
//! let controller = SimulationController::builder(SimulationConfig::from_path("presim.toml")?)
//!     .registry(Arc::new(stores.registry))
//!     .history(Arc::new(stores.history))
//!     .dispatcher(Arc::new(ServiceDispatcher::new(RecordingExecutor::new(Arc::new(SystemClock)))))
//!     .build()?;
//!
//! controller.start(None).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod entity;
pub mod error;
pub mod state;
pub mod time;

// Collaborators and replay
pub mod dispatch;
pub mod expand;
pub mod scheduler;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use config::{CallOverrides, RunParams, SimulationConfig};
pub use entity::{EntityDomain, EntityId};
pub use error::{
    ConfigError, DispatchError, HistoryError, LookupError, SimResult, SimulationError, ValidationError,
};
pub use expand::{Expansion, MAX_GROUP_DEPTH, expand};
pub use state::{HistoryRecord, StateSnapshot};
pub use time::{Clock, CycleWindow, SystemClock, VirtualClock};

pub use dispatch::{ActionDispatcher, ServiceCall, ServiceDispatcher, ServiceExecutor};
pub use scheduler::{ControllerBuilder, EventId, RunStatus, ScheduledEvent, SimulationController, StartOutcome};
pub use storage::{EntityRegistry, HistoryFetcher, HistoryMap};
