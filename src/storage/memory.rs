//! In-memory collaborator implementations.
//!
//! Thread-safe implementations of `EntityRegistry` and `HistoryFetcher`
//! backed by `RwLock`ed maps. They are used by the `presim` binary to replay
//! a JSON fixture, by tests, and as reference implementations of the
//! collaborator contracts.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::error::{HistoryError, LookupError};
use crate::state::HistoryRecord;
use crate::storage::traits::{EntityRegistry, HistoryFetcher, HistoryMap};

fn lookup_lock_err(context: &'static str) -> LookupError {
    LookupError::Backend {
        message: format!("poisoned lock: {context}"),
    }
}

fn history_lock_err(context: &'static str) -> HistoryError {
    HistoryError::Unavailable {
        message: format!("poisoned lock: {context}"),
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    entities: HashSet<EntityId>,
    groups: HashMap<EntityId, Option<Vec<EntityId>>>,
}

/// Thread-safe in-memory entity registry.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    state: RwLock<RegistryState>,
}

impl InMemoryRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plain entity.
    pub fn insert_entity(&self, id: EntityId) {
        if let Ok(mut state) = self.state.write() {
            state.entities.insert(id);
        }
    }

    /// Registers a group with its members.
    pub fn insert_group(&self, id: EntityId, members: Vec<EntityId>) {
        if let Ok(mut state) = self.state.write() {
            state.groups.insert(id, Some(members));
        }
    }

    /// Registers a group whose member list is missing.
    pub fn insert_group_without_members(&self, id: EntityId) {
        if let Ok(mut state) = self.state.write() {
            state.groups.insert(id, None);
        }
    }

    /// Removes an entity or group.
    pub fn remove(&self, id: &EntityId) {
        if let Ok(mut state) = self.state.write() {
            state.entities.remove(id);
            state.groups.remove(id);
        }
    }
}

impl EntityRegistry for InMemoryRegistry {
    fn ensure_exists(&self, id: &EntityId) -> Result<(), LookupError> {
        let state = self.state.read().map_err(|_| lookup_lock_err("registry.ensure_exists"))?;
        if state.entities.contains(id) || state.groups.contains_key(id) {
            Ok(())
        } else {
            Err(LookupError::NotFound { id: id.clone() })
        }
    }

    fn group_members(&self, group: &EntityId) -> Result<Vec<EntityId>, LookupError> {
        let state = self.state.read().map_err(|_| lookup_lock_err("registry.group_members"))?;
        match state.groups.get(group) {
            Some(Some(members)) => Ok(members.clone()),
            Some(None) => Err(LookupError::MissingMembers { id: group.clone() }),
            None => Err(LookupError::NotFound { id: group.clone() }),
        }
    }
}

/// Thread-safe in-memory history source.
///
/// Records are kept sorted by `recorded_at` per entity; records with equal
/// timestamps keep their insertion order.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    records: RwLock<HashMap<EntityId, Vec<HistoryRecord>>>,
}

impl InMemoryHistory {
    /// Create a new empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transition for `entity`.
    pub fn record(&self, entity: EntityId, record: HistoryRecord) {
        if let Ok(mut records) = self.records.write() {
            let list = records.entry(entity).or_default();
            let idx = list.partition_point(|r| r.recorded_at <= record.recorded_at);
            list.insert(idx, record);
        }
    }

    /// Number of records held for `entity`.
    #[must_use]
    pub fn len_for(&self, entity: &EntityId) -> usize {
        self.records
            .read()
            .map(|records| records.get(entity).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl HistoryFetcher for InMemoryHistory {
    async fn fetch(&self, entities: &[EntityId], since: DateTime<Utc>) -> Result<HistoryMap, HistoryError> {
        let records = self.records.read().map_err(|_| history_lock_err("history.fetch"))?;
        let mut out = BTreeMap::new();
        for entity in entities {
            let Some(list) = records.get(entity) else {
                continue;
            };
            let window: Vec<HistoryRecord> = list.iter().filter(|r| r.recorded_at >= since).cloned().collect();
            if !window.is_empty() {
                out.insert(entity.clone(), window);
            }
        }
        Ok(out)
    }
}

/// Registry and history loaded together from one JSON document.
///
/// ```json
/// {
///   "entities": ["light.porch", "cover.office"],
///   "groups": { "group.downstairs": ["light.porch"] },
///   "history": {
///     "light.porch": [
///       { "recorded_at": "2023-01-01T18:00:00Z", "state": "on", "attributes": { "brightness": 180 } }
///     ]
///   }
/// }
/// ```
///
/// Entities that only appear under `history` are registered too.
#[derive(Debug, Default)]
pub struct InMemoryStores {
    /// Known entities and groups.
    pub registry: InMemoryRegistry,
    /// Recorded transitions.
    pub history: InMemoryHistory,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Fixture {
    #[serde(default)]
    entities: Vec<EntityId>,
    #[serde(default)]
    groups: BTreeMap<EntityId, Vec<EntityId>>,
    #[serde(default)]
    history: BTreeMap<EntityId, Vec<HistoryRecord>>,
}

impl InMemoryStores {
    /// Parses a fixture document.
    ///
    /// # Errors
    /// Returns the `serde_json` error for malformed documents or invalid ids.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let fixture: Fixture = serde_json::from_str(raw)?;
        let stores = Self::default();
        for id in fixture.entities {
            stores.registry.insert_entity(id);
        }
        for (group, members) in fixture.groups {
            stores.registry.insert_group(group, members);
        }
        for (entity, records) in fixture.history {
            stores.registry.insert_entity(entity.clone());
            for record in records {
                stores.history.record(entity.clone(), record);
            }
        }
        Ok(stores)
    }
}
