//! Simulation configuration and per-call overrides.
//!
//! Configuration comes from a TOML file (or any serde source) with three
//! recognized options:
//!
//! ```toml
//! entities = ["group.downstairs", "light.porch"]
//! delta = 7       # days replayed, and the replay offset
//! interval = 30   # seconds between checks
//! ```
//!
//! Older configurations wrote `entity_id` instead of `entities`, a single
//! string instead of a list, and numbers as strings. All of those are
//! accepted.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::entity::EntityId;
use crate::error::{ConfigError, ValidationError};

/// Default replay window in days.
pub const DEFAULT_DELTA_DAYS: u32 = 7;
/// Default poll interval in seconds.
pub const DEFAULT_INTERVAL_SECS: u64 = 30;

const fn default_delta() -> u32 {
    DEFAULT_DELTA_DAYS
}

const fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

/// Configured defaults for the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Entity or group refs to replay.
    #[serde(default, alias = "entity_id", deserialize_with = "one_or_many")]
    pub entities: Vec<EntityId>,

    /// Size of the replay window in days.
    #[serde(default = "default_delta", deserialize_with = "lenient_u32")]
    pub delta: u32,

    /// Poll granularity in seconds.
    #[serde(default = "default_interval", deserialize_with = "lenient_u64")]
    pub interval: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            delta: DEFAULT_DELTA_DAYS,
            interval: DEFAULT_INTERVAL_SECS,
        }
    }
}

impl SimulationConfig {
    /// Defaults for `entities`.
    #[must_use]
    pub fn new(entities: Vec<EntityId>) -> Self {
        Self {
            entities,
            ..Self::default()
        }
    }

    /// Replay window in days.
    #[must_use]
    pub const fn with_delta(mut self, delta: u32) -> Self {
        self.delta = delta;
        self
    }

    /// Poll interval in seconds.
    #[must_use]
    pub const fn with_interval(mut self, interval_secs: u64) -> Self {
        self.interval = interval_secs;
        self
    }

    /// The poll interval as a duration.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    /// Checks the values a run depends on.
    ///
    /// # Errors
    ///
    /// `ZeroDelta` / `ZeroInterval` when either is zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.delta == 0 {
            return Err(ValidationError::ZeroDelta);
        }
        if self.interval == 0 {
            return Err(ValidationError::ZeroInterval);
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// `ConfigError::Parse` on malformed TOML or bad values, `ConfigError::Invalid`
    /// when validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// `ConfigError::Io` if the file cannot be read, otherwise as `from_toml_str`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }
}

/// Per-invocation overrides carried by a start or toggle call.
///
/// Deserialized from service-call data, e.g.
/// `{"entity_id": "light.porch", "delta": 3}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOverrides {
    /// Replaces the configured entity refs for this run.
    #[serde(
        default,
        alias = "entity_id",
        deserialize_with = "option_one_or_many",
        skip_serializing_if = "Option::is_none"
    )]
    pub entities: Option<Vec<EntityId>>,

    /// Replaces the configured delta for this run.
    #[serde(default, deserialize_with = "option_lenient_u32", skip_serializing_if = "Option::is_none")]
    pub delta: Option<u32>,
}

impl CallOverrides {
    /// Overrides only the entity set.
    #[must_use]
    pub fn entities(entities: Vec<EntityId>) -> Self {
        Self {
            entities: Some(entities),
            delta: None,
        }
    }

    /// Overrides only the delta.
    #[must_use]
    pub const fn delta(delta: u32) -> Self {
        Self {
            entities: None,
            delta: Some(delta),
        }
    }

    /// Parameters for a run: overrides first, configured defaults otherwise.
    ///
    /// # Errors
    ///
    /// `ZeroDelta` if the resulting delta is zero.
    pub fn resolve(&self, defaults: &SimulationConfig) -> Result<RunParams, ValidationError> {
        let params = RunParams {
            entities: self.entities.clone().unwrap_or_else(|| defaults.entities.clone()),
            delta_days: self.delta.unwrap_or(defaults.delta),
        };
        if params.delta_days == 0 {
            return Err(ValidationError::ZeroDelta);
        }
        Ok(params)
    }
}

/// Entity refs and delta used by one run; reused as-is by a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParams {
    /// Refs as given (groups not yet expanded).
    pub entities: Vec<EntityId>,
    /// Replay window in days.
    pub delta_days: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(EntityId),
    Many(Vec<EntityId>),
}

impl From<OneOrMany> for Vec<EntityId> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(id) => vec![id],
            OneOrMany::Many(ids) => ids,
        }
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<EntityId>, D::Error> {
    OneOrMany::deserialize(d).map(Into::into)
}

fn option_one_or_many<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<EntityId>>, D::Error> {
    Option::<OneOrMany>::deserialize(d).map(|v| v.map(Into::into))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

impl NumberOrString {
    fn into_u64<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            Self::Number(n) => Ok(n),
            Self::String(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("expected a non-negative integer, got {s:?}"))),
        }
    }
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    NumberOrString::deserialize(d)?.into_u64()
}

fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let n = lenient_u64(d)?;
    u32::try_from(n).map_err(|_| serde::de::Error::custom(format!("{n} is out of range")))
}

fn option_lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    match Option::<NumberOrString>::deserialize(d)? {
        None => Ok(None),
        Some(raw) => {
            let n = raw.into_u64()?;
            u32::try_from(n)
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("{n} is out of range")))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn id(raw: &str) -> EntityId {
        EntityId::parse(raw).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = SimulationConfig::from_toml_str("entities = [\"light.a\"]").unwrap();
        assert_eq!(config.delta, 7);
        assert_eq!(config.interval, 30);
        assert_eq!(config.interval(), Duration::from_secs(30));
        assert_eq!(config.entities, vec![id("light.a")]);
    }

    #[test]
    fn test_legacy_forms() {
        let config = SimulationConfig::from_toml_str(
            r#"
            entity_id = "group.all_lights"
            delta = "3"
            interval = "10"
            "#,
        )
        .unwrap();
        assert_eq!(config.entities, vec![id("group.all_lights")]);
        assert_eq!(config.delta, 3);
        assert_eq!(config.interval, 10);
    }

    #[test]
    fn test_rejects_zero_and_garbage() {
        assert!(matches!(
            SimulationConfig::from_toml_str("delta = 0"),
            Err(ConfigError::Invalid(ValidationError::ZeroDelta))
        ));
        assert!(matches!(
            SimulationConfig::from_toml_str("interval = 0"),
            Err(ConfigError::Invalid(ValidationError::ZeroInterval))
        ));
        assert!(matches!(
            SimulationConfig::from_toml_str("delta = \"a week\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SimulationConfig::from_toml_str("entities = [\"kitchen\"]"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "entities = [\"light.a\", \"cover.b\"]\ndelta = 2").unwrap();
        let config = SimulationConfig::from_path(file.path()).unwrap();
        assert_eq!(config.entities.len(), 2);
        assert_eq!(config.delta, 2);

        let missing = SimulationConfig::from_path("/definitely/not/here.toml");
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_call_overrides_from_service_data() {
        let single: CallOverrides = serde_json::from_str(r#"{"entity_id": "light.x"}"#).unwrap();
        assert_eq!(single.entities, Some(vec![id("light.x")]));
        assert_eq!(single.delta, None);

        let both: CallOverrides =
            serde_json::from_str(r#"{"entity_id": ["light.x", "light.y"], "delta": "2"}"#).unwrap();
        assert_eq!(both.entities.as_ref().map(Vec::len), Some(2));
        assert_eq!(both.delta, Some(2));

        let empty: CallOverrides = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, CallOverrides::default());
    }

    #[test]
    fn test_resolve_prefers_overrides() {
        let defaults = SimulationConfig::new(vec![id("light.a")]).with_delta(7);

        let params = CallOverrides::default().resolve(&defaults).unwrap();
        assert_eq!(params.entities, vec![id("light.a")]);
        assert_eq!(params.delta_days, 7);

        let params = CallOverrides::delta(2).resolve(&defaults).unwrap();
        assert_eq!(params.entities, vec![id("light.a")]);
        assert_eq!(params.delta_days, 2);

        let params = CallOverrides::entities(vec![id("switch.b")]).resolve(&defaults).unwrap();
        assert_eq!(params.entities, vec![id("switch.b")]);

        assert_eq!(CallOverrides::delta(0).resolve(&defaults), Err(ValidationError::ZeroDelta));
    }
}
