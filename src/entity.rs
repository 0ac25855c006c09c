//! Entity identifiers and domains.
//!
//! Every controllable thing in the live system is addressed by a
//! domain-qualified id such as `light.kitchen` or `group.downstairs`. The
//! domain decides how a recorded state is replayed and whether the id refers
//! to a group that must be expanded first.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

static ENTITY_ID_RE: OnceLock<Regex> = OnceLock::new();

fn entity_id_regex() -> &'static Regex {
    ENTITY_ID_RE.get_or_init(|| Regex::new(r"^[a-z0-9_]+\.[a-z0-9_]+$").expect("entity id regex is valid"))
}

/// Domain-qualified entity identifier (`<domain>.<object_id>`).
///
/// # Examples
///
/// ```
/// use presence_sim::{EntityDomain, EntityId};
///
/// let id = EntityId::parse("light.kitchen").unwrap();
/// assert_eq!(id.domain(), "light");
/// assert_eq!(id.object_id(), "kitchen");
/// assert_eq!(id.category(), EntityDomain::Light);
/// assert!(EntityId::parse("kitchen").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Parses and validates an entity id.
    ///
    /// Surrounding whitespace is ignored and the id is lowercased.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidEntityId` if the id is not of the form
    /// `<domain>.<object_id>`.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let normalized = raw.trim().to_ascii_lowercase();
        if !entity_id_regex().is_match(&normalized) {
            return Err(ValidationError::InvalidEntityId { id: raw.to_string() });
        }
        Ok(Self(normalized))
    }

    /// The domain part (before the dot).
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.split_once('.').map_or(self.0.as_str(), |(domain, _)| domain)
    }

    /// The object part (after the dot).
    #[must_use]
    pub fn object_id(&self) -> &str {
        self.0.split_once('.').map_or("", |(_, object)| object)
    }

    /// The replay category derived from the domain.
    #[must_use]
    pub fn category(&self) -> EntityDomain {
        EntityDomain::from_domain(self.domain())
    }

    /// Returns true if this id refers to a group of other entities.
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.category() == EntityDomain::Group
    }

    /// The normalized `<domain>.<object_id>` form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EntityId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for EntityId {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Replay category of an entity, derived from its domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityDomain {
    /// Dimmable/colored lights.
    Light,
    /// Blinds, shutters, garage doors.
    Cover,
    /// A named collection of other entities.
    Group,
    /// Anything else (switches, media players, fans...).
    Other,
}

impl EntityDomain {
    /// Category of a raw domain string; unknown domains map to `Other`.
    #[must_use]
    pub fn from_domain(domain: &str) -> Self {
        match domain {
            "light" => Self::Light,
            "cover" => Self::Cover,
            "group" => Self::Group,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for EntityDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Light => write!(f, "light"),
            Self::Cover => write!(f, "cover"),
            Self::Group => write!(f, "group"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Parses a list of raw ids, splitting valid ids from rejected ones.
///
/// Used at the configuration and service-call boundary, where one bad id
/// must not discard the rest of the list.
#[must_use]
pub fn parse_many<I, S>(raw: I) -> (Vec<EntityId>, Vec<ValidationError>)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut ids = Vec::new();
    let mut rejected = Vec::new();
    for item in raw {
        match EntityId::parse(item.as_ref()) {
            Ok(id) => ids.push(id),
            Err(err) => rejected.push(err),
        }
    }
    (ids, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes() {
        let id = EntityId::parse("  Light.Living_Room ").unwrap();
        assert_eq!(id.as_str(), "light.living_room");
        assert_eq!(id.to_string(), "light.living_room");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in ["", "light", "light.", ".kitchen", "light.kitchen.extra", "light kitchen"] {
            assert!(
                matches!(EntityId::parse(raw), Err(ValidationError::InvalidEntityId { .. })),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_domain_and_category() {
        let cover = EntityId::parse("cover.garage").unwrap();
        assert_eq!(cover.domain(), "cover");
        assert_eq!(cover.object_id(), "garage");
        assert_eq!(cover.category(), EntityDomain::Cover);
        assert!(!cover.is_group());

        let group = EntityId::parse("group.upstairs").unwrap();
        assert!(group.is_group());

        let switch = EntityId::parse("switch.radio").unwrap();
        assert_eq!(switch.category(), EntityDomain::Other);
    }

    #[test]
    fn test_serde_roundtrip_validates() {
        let id: EntityId = serde_json::from_str("\"light.a\"").unwrap();
        assert_eq!(id.domain(), "light");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"light.a\"");

        let bad = serde_json::from_str::<EntityId>("\"not-an-id\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_parse_many_splits_rejected() {
        let (ids, rejected) = parse_many(["light.a", "oops", "switch.b"]);
        assert_eq!(ids.len(), 2);
        assert_eq!(rejected.len(), 1);
    }
}
