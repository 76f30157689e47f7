//! # Core Error Types
//!
//! All errors that can come out of the entity store and its collaborators.

use meridian_shared::{ContractKind, EntityId};
use thiserror::Error;

/// A schema violation inside one contract record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{path}: {message}")]
pub struct ValidationError {
    /// Path of the offending field, e.g. `durability.maxHealth`.
    pub path: String,
    /// What was wrong with it.
    pub message: String,
}

impl ValidationError {
    /// Creates a validation error for a field path.
    #[must_use]
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Errors that can occur in store operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The referenced entity does not exist.
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),

    /// An entity with this id already exists.
    #[error("entity already exists: {0}")]
    AlreadyExists(EntityId),

    /// The contract failed schema validation.
    #[error("invalid {kind} contract: {source}")]
    InvalidComponent {
        /// Kind of the rejected record.
        kind: ContractKind,
        /// The violation, with field path.
        source: ValidationError,
    },

    /// Adding the contract would exceed the resolved cardinality limit.
    #[error("contract limit exceeded for {kind} on {entity}: max {max}")]
    LimitExceeded {
        /// Entity the add targeted.
        entity: EntityId,
        /// Kind whose limit was hit.
        kind: ContractKind,
        /// The resolved limit.
        max: u32,
    },

    /// The referenced archetype is not in the catalog.
    #[error("unknown archetype: {0}")]
    UnknownArchetype(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
