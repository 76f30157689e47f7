//! # World Error Types

use meridian_shared::LayerId;
use thiserror::Error;

/// Errors from the spatial side of the server.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorldError {
    /// The referenced layer does not exist.
    #[error("unknown layer: {0}")]
    UnknownLayer(LayerId),

    /// A layer with this id already exists.
    #[error("layer already exists: {0}")]
    DuplicateLayer(LayerId),

    /// The default layer always exists and cannot be removed.
    #[error("the default layer cannot be removed")]
    DefaultLayerImmutable,

    /// Layer chunk size must be positive.
    #[error("invalid chunk size {0}: must be positive")]
    InvalidChunkSize(f64),
}

/// Result type for world operations.
pub type WorldResult<T> = Result<T, WorldError>;
