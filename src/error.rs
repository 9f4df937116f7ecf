//! Error types for the sales decision core

use crate::models::EntityType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for decision-core operations
pub type Result<T> = std::result::Result<T, DecisionError>;

#[derive(Error, Debug)]
pub enum DecisionError {

    // =============================
    // Pipeline Errors
    // =============================

    #[error("Validation failure: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("Configuration failure: {0}")]
    Configuration(#[from] ConfigurationFailure),

    #[error("Capability failure: {0}")]
    Capability(#[from] CapabilityFailure),

    #[error("Invalid configuration value: {0}")]
    Config(String),

    #[error("Unknown tone profile: {0}")]
    UnknownTone(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Ambiguous or incomplete input, detected at normalization or routing.
/// Reported straight back to the caller and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationFailure {
    #[error("{intent} requires parameter '{parameter}'")]
    MissingParameter { intent: String, parameter: String },

    #[error("could not work out what '{text}' refers to")]
    UnresolvedReference { text: String },

    #[error("'{parameter}' expects {expected} but the reference points at {found}")]
    ConflictingEntityTypes {
        parameter: String,
        expected: EntityType,
        found: EntityType,
    },

    #[error("'{parameter}' takes one value but got {values:?}")]
    AmbiguousParameter { parameter: String, values: Vec<String> },

    #[error("'{parameter}' needs at least {minimum} values, got {found}")]
    InsufficientValues {
        parameter: String,
        minimum: usize,
        found: usize,
    },
}

/// Failure reported by (or on behalf of) an invoked capability.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CapabilityFailure {
    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("upstream error: {0}")]
    UpstreamError(String),

    #[error("cancelled")]
    Cancelled,
}

impl CapabilityFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            CapabilityFailure::Timeout(_) => "timeout",
            CapabilityFailure::InvalidInput(_) => "invalid_input",
            CapabilityFailure::UpstreamError(_) => "upstream_error",
            CapabilityFailure::Cancelled => "cancelled",
        }
    }
}

/// Registry or plan misconfiguration. Fatal: planning aborts before any step runs.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigurationFailure {
    #[error("dependency cycle: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("agent '{agent}' depends on unknown agent '{missing}'")]
    DanglingDependency { agent: String, missing: String },

    #[error("agent '{0}' is registered twice")]
    DuplicateAgent(String),

    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    #[error("help agent '{0}' is not registered")]
    MissingHelpAgent(String),

    #[error("step '{step}' depends on unknown step '{missing}'")]
    DanglingStep { step: String, missing: String },

    #[error("plan has {count} steps, limit is {limit}")]
    TooManySteps { count: usize, limit: usize },
}
