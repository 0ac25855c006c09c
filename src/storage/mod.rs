//! Collaborator interfaces for the simulation core.
//!
//! The registry and history source are external systems; this module holds
//! their contracts plus in-memory implementations.

mod memory;
mod traits;

pub use memory::{InMemoryHistory, InMemoryRegistry, InMemoryStores};
pub use traits::{EntityRegistry, HistoryFetcher, HistoryMap};
