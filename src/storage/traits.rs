//! Collaborator traits for the simulation core.
//!
//! The scheduler never talks to the live system directly. These traits
//! define the two read-side contracts it depends on:
//! - `EntityRegistry`: which entities exist, and which entities a group holds
//! - `HistoryFetcher`: what each entity recorded since a given instant
//!
//! The write side (replaying a state) is `crate::dispatch::ActionDispatcher`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entity::EntityId;
use crate::error::{HistoryError, LookupError};
use crate::state::HistoryRecord;

/// Recorded transitions per entity, each list in chronological order.
pub type HistoryMap = BTreeMap<EntityId, Vec<HistoryRecord>>;

/// Read access to the live entity registry.
///
/// Implementations must be safe to call from many tasks at once.
pub trait EntityRegistry: Send + Sync {
    /// Verifies that a non-group entity exists.
    ///
    /// # Errors
    /// - `NotFound`: the entity is unknown
    /// - `Backend`: the registry could not be queried
    fn ensure_exists(&self, id: &EntityId) -> Result<(), LookupError>;

    /// Returns the direct members of a group, in configured order.
    ///
    /// Members may themselves be groups; the caller expands them.
    ///
    /// # Errors
    /// - `NotFound`: the group is unknown
    /// - `MissingMembers`: the group carries no member list
    /// - `Backend`: the registry could not be queried
    fn group_members(&self, group: &EntityId) -> Result<Vec<EntityId>, LookupError>;
}

/// Historical state source.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    /// Every recorded transition since `since` for the given entities.
    ///
    /// All transitions are returned, not only "significant" ones: the replay
    /// must reproduce intermediate states such as brightness changes. Lists
    /// are replayed in the order returned, so they should be ordered by
    /// `recorded_at`.
    /// Entities without records may be absent from the map.
    ///
    /// # Errors
    /// `HistoryError` when the source cannot answer.
    async fn fetch(&self, entities: &[EntityId], since: DateTime<Utc>) -> Result<HistoryMap, HistoryError>;
}
