//! Error types for presence-sim.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! specific conditions. Per-entity failures (lookup, dispatch) are reported
//! and logged by the scheduler without stopping the run; only errors handed
//! to `SimulationController::stop_with_error` terminate the calling chain.

use thiserror::Error;

use crate::entity::EntityId;

/// Validation errors that occur during input validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid entity id '{id}': expected '<domain>.<object_id>'")]
    InvalidEntityId {
        id: String,
    },

    #[error("Delta must be at least one day")]
    ZeroDelta,

    #[error("Interval must be at least one second")]
    ZeroInterval,

    #[error("Delta of {delta} days does not fit the supported date range")]
    DeltaOutOfRange {
        delta: u32,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' has an invalid value: {reason}")]
    InvalidField {
        field: String,
        reason: String,
    },
}

/// Failures while resolving entity or group references.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("Entity not found: {id}")]
    NotFound {
        id: EntityId,
    },

    #[error("Group {id} has no member list")]
    MissingMembers {
        id: EntityId,
    },

    #[error("Group {id} is nested deeper than {max_depth} levels")]
    GroupTooDeep {
        id: EntityId,
        max_depth: usize,
    },

    #[error("Registry error: {message}")]
    Backend {
        message: String,
    },
}

impl LookupError {
    /// The entity the failure refers to, if any.
    #[must_use]
    pub const fn entity(&self) -> Option<&EntityId> {
        match self {
            Self::NotFound { id } | Self::MissingMembers { id } | Self::GroupTooDeep { id, .. } => Some(id),
            Self::Backend { .. } => None,
        }
    }
}

/// Failures while applying a recorded state to the live system.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Cannot replay state '{state}' on {entity}")]
    UnsupportedState {
        entity: EntityId,
        state: String,
    },

    #[error("Service call {service} for {entity} failed: {message}")]
    Executor {
        entity: EntityId,
        service: String,
        message: String,
    },
}

/// Failures reported by the history source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("History source unavailable: {message}")]
    Unavailable {
        message: String,
    },

    #[error("History query failed: {message}")]
    Query {
        message: String,
    },
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(#[from] ValidationError),
}

/// Top-level error type for presence-sim.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Simulation stopped on error: {0}")]
    Fatal(Box<SimulationError>),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl SimulationError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wraps an error that terminated a run.
    #[must_use]
    pub fn fatal(err: Self) -> Self {
        match err {
            already @ Self::Fatal(_) => already,
            other => Self::Fatal(Box::new(other)),
        }
    }

    /// True for invalid input or configuration.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// True for entity or group resolution failures.
    #[must_use]
    pub const fn is_lookup(&self) -> bool {
        matches!(self, Self::Lookup(_))
    }

    /// True for failures replaying a state.
    #[must_use]
    pub const fn is_dispatch(&self) -> bool {
        matches!(self, Self::Dispatch(_))
    }

    /// True for history source failures.
    #[must_use]
    pub const fn is_history(&self) -> bool {
        matches!(self, Self::History(_))
    }

    /// Returns true if this error ended a simulation run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Returns the error that caused a fatal stop, or `self` otherwise.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Fatal(inner) => inner.root(),
            other => other,
        }
    }
}

/// Result type alias for presence-sim operations.
pub type SimResult<T> = Result<T, SimulationError>;
