//! # Meridian World
//!
//! The spatial half of the server: layers, the chunk index with its
//! subscriber streams, static occupancy, and the movement pipeline that
//! keeps entity positions and chunk membership in agreement.
//!
//! Everything here sits on top of `meridian_core`'s entity store; nothing
//! here talks to a socket.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod chunk;
pub mod error;
pub mod layer;
pub mod movement;
pub mod spatial;

pub use chunk::{occupancy::OccupancyGrid, Chunk, ChunkConfig, ChunkManager};
pub use error::{WorldError, WorldResult};
pub use layer::{Layer, LayerRegistry};
pub use movement::{MoveOutcome, MovementConfig, MovementSystem};
