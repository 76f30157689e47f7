//! # Meridian Shared
//!
//! Common types used by every layer of the world server.
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER depend on:
//! - `meridian_core`
//! - `meridian_world`
//! - `meridian_server`
//!
//! It is the vocabulary everything else speaks; keep it leaf-shaped.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod chunk_key;
pub mod constants;
pub mod contract;
pub mod id;
pub mod math;
pub mod protocol;

pub use chunk_key::{ChunkKey, ChunkKeyParseError, LayerId};
pub use constants::{CHUNK_HEIGHT, DEFAULT_CHUNK_SIZE, DEFAULT_GRAVITY, DEFAULT_TICK_RATE};
pub use contract::{Contract, ContractKind};
pub use id::{EntityId, SessionId};
pub use math::{Aabb, Vec3};
pub use protocol::{ChunkDelta, ClientMessage, ErrorCode, ServerMessage};
