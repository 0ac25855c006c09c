//! Group expansion.
//!
//! Turns the configured refs into the concrete entities to replay. Groups
//! are replaced by their members, recursively; plain entities are checked
//! for existence. Lookup failures never abort expansion: the failing ref is
//! dropped and the failure is returned so the caller decides how to report
//! it.

use crate::entity::EntityId;
use crate::error::LookupError;
use crate::storage::EntityRegistry;

/// Maximum group nesting followed before giving up on a branch.
pub const MAX_GROUP_DEPTH: usize = 32;

/// Result of expanding a list of refs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    /// Concrete entities, in the order they were reached.
    pub entities: Vec<EntityId>,
    /// Refs that could not be resolved and were dropped.
    pub failures: Vec<LookupError>,
}

impl Expansion {
    /// True if every ref resolved.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// The expanded entities with later duplicates removed.
    #[must_use]
    pub fn unique_entities(&self) -> Vec<EntityId> {
        let mut seen = std::collections::HashSet::with_capacity(self.entities.len());
        self.entities.iter().filter(|id| seen.insert(*id)).cloned().collect()
    }
}

/// Expands `refs` against `registry`, flattening groups in order.
///
/// # Examples
///
/// ```
/// use presence_sim::storage::InMemoryRegistry;
/// use presence_sim::{expand, EntityId};
///
/// let id = |s: &str| EntityId::parse(s).unwrap();
/// let registry = InMemoryRegistry::new();
/// registry.insert_group(id("group.g1"), vec![id("light.a"), id("group.g2")]);
/// registry.insert_group(id("group.g2"), vec![id("light.b")]);
/// registry.insert_entity(id("light.a"));
/// registry.insert_entity(id("light.b"));
///
/// let expansion = expand(&[id("group.g1")], &registry);
/// assert_eq!(expansion.entities, vec![id("light.a"), id("light.b")]);
/// assert!(expansion.is_clean());
/// ```
#[must_use]
pub fn expand<R>(refs: &[EntityId], registry: &R) -> Expansion
where
    R: EntityRegistry + ?Sized,
{
    let mut out = Expansion::default();
    expand_into(refs, registry, 0, &mut out);
    out
}

fn expand_into<R>(refs: &[EntityId], registry: &R, depth: usize, out: &mut Expansion)
where
    R: EntityRegistry + ?Sized,
{
    for entity in refs {
        if !entity.is_group() {
            match registry.ensure_exists(entity) {
                Ok(()) => out.entities.push(entity.clone()),
                Err(err) => out.failures.push(err),
            }
            continue;
        }

        if depth >= MAX_GROUP_DEPTH {
            out.failures.push(LookupError::GroupTooDeep {
                id: entity.clone(),
                max_depth: MAX_GROUP_DEPTH,
            });
            continue;
        }

        match registry.group_members(entity) {
            Ok(members) => expand_into(&members, registry, depth + 1, out),
            Err(err) => out.failures.push(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::storage::InMemoryRegistry;

    fn id(raw: &str) -> EntityId {
        EntityId::parse(raw).unwrap()
    }

    fn nested_registry() -> InMemoryRegistry {
        let registry = InMemoryRegistry::new();
        registry.insert_group(id("group.g1"), vec![id("light.a"), id("group.g2")]);
        registry.insert_group(id("group.g2"), vec![id("light.b")]);
        registry.insert_entity(id("light.a"));
        registry.insert_entity(id("light.b"));
        registry.insert_entity(id("cover.c"));
        registry
    }

    #[test]
    fn nested_groups_flatten_in_order() {
        let registry = nested_registry();
        let expansion = expand(&[id("group.g1")], &registry);
        assert_eq!(expansion.entities, vec![id("light.a"), id("light.b")]);
        assert!(expansion.is_clean());
    }

    #[test]
    fn plain_entities_pass_through_in_order() {
        let registry = nested_registry();
        let expansion = expand(&[id("cover.c"), id("group.g2"), id("light.a")], &registry);
        assert_eq!(expansion.entities, vec![id("cover.c"), id("light.b"), id("light.a")]);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let registry = nested_registry();
        assert_eq!(expand(&[], &registry), Expansion::default());
    }

    #[test]
    fn failures_are_dropped_and_reported() {
        let registry = nested_registry();
        registry.insert_group_without_members(id("group.broken"));

        let expansion = expand(
            &[id("light.ghost"), id("group.broken"), id("group.missing"), id("light.a")],
            &registry,
        );
        assert_eq!(expansion.entities, vec![id("light.a")]);
        assert_eq!(
            expansion.failures,
            vec![
                LookupError::NotFound { id: id("light.ghost") },
                LookupError::MissingMembers { id: id("group.broken") },
                LookupError::NotFound { id: id("group.missing") },
            ]
        );
    }

    #[test]
    fn cyclic_groups_hit_depth_guard() {
        let registry = InMemoryRegistry::new();
        registry.insert_entity(id("light.a"));
        registry.insert_group(id("group.ping"), vec![id("light.a"), id("group.pong")]);
        registry.insert_group(id("group.pong"), vec![id("group.ping")]);

        let expansion = expand(&[id("group.ping")], &registry);
        assert!(!expansion.is_clean());
        assert!(matches!(
            expansion.failures.as_slice(),
            [LookupError::GroupTooDeep { max_depth: MAX_GROUP_DEPTH, .. }]
        ));
        assert_eq!(expansion.unique_entities(), vec![id("light.a")]);
    }
}
