//! # Chunk Keys
//!
//! A chunk is addressed by its layer and integer cell coordinates. The
//! canonical string form `"<layer>:<cx>,<cy>,<cz>"` is used for internal map
//! keys and must round-trip bit-exactly through [`ChunkKey::parse`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier of a layer (an independent coordinate space).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(String);

impl LayerId {
    /// Creates a layer id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LayerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Address of one chunk: layer plus integer cell coordinates.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkKey {
    /// Owning layer.
    pub layer_id: LayerId,
    /// Cell X index.
    pub cx: i64,
    /// Cell Y index.
    pub cy: i64,
    /// Cell Z index.
    pub cz: i64,
}

/// Failure to parse the canonical chunk-key string form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkKeyParseError {
    /// The `layer:coords` separator was missing or the layer was empty.
    #[error("missing layer separator in chunk key {0:?}")]
    MissingLayer(String),
    /// The coordinate list was not three comma-separated integers.
    #[error("malformed coordinates in chunk key {0:?}")]
    MalformedCoords(String),
}

impl ChunkKey {
    /// Creates a chunk key.
    #[must_use]
    pub fn new(layer_id: impl Into<LayerId>, cx: i64, cy: i64, cz: i64) -> Self {
        Self {
            layer_id: layer_id.into(),
            cx,
            cy,
            cz,
        }
    }

    /// Parses the canonical `"<layer>:<cx>,<cy>,<cz>"` form.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkKeyParseError`] when the separator is missing, the
    /// layer is empty, or the coordinates are not three signed integers.
    pub fn parse(s: &str) -> Result<Self, ChunkKeyParseError> {
        let (layer, coords) = s
            .split_once(':')
            .ok_or_else(|| ChunkKeyParseError::MissingLayer(s.to_owned()))?;
        if layer.is_empty() {
            return Err(ChunkKeyParseError::MissingLayer(s.to_owned()));
        }

        let mut parts = coords.split(',');
        let mut next = || -> Result<i64, ChunkKeyParseError> {
            parts
                .next()
                .and_then(|p| p.parse::<i64>().ok())
                .ok_or_else(|| ChunkKeyParseError::MalformedCoords(s.to_owned()))
        };
        let (cx, cy, cz) = (next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(ChunkKeyParseError::MalformedCoords(s.to_owned()));
        }

        Ok(Self::new(LayerId::new(layer), cx, cy, cz))
    }

    /// Returns the key with the same coordinates in another layer.
    #[must_use]
    pub fn in_layer(&self, layer_id: LayerId) -> Self {
        Self {
            layer_id,
            ..self.clone()
        }
    }

    /// Returns the key offset by a cell delta within the same layer.
    #[must_use]
    pub fn offset(&self, dx: i64, dy: i64, dz: i64) -> Self {
        Self {
            layer_id: self.layer_id.clone(),
            cx: self.cx + dx,
            cy: self.cy + dy,
            cz: self.cz + dz,
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{},{},{}", self.layer_id, self.cx, self.cy, self.cz)
    }
}

impl FromStr for ChunkKey {
    type Err = ChunkKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
