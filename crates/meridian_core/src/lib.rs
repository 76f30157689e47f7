//! # Meridian Core
//!
//! The typed heart of the world server: the entity/contract store with
//! schema validation and cardinality limits, the archetype catalog that
//! stamps templates into live entities, and the durability lifecycle.
//!
//! Spatial concerns (layers, chunks, movement) live in `meridian_world`;
//! this crate never touches a coordinate beyond storing it.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod archetype;
pub mod durability;
pub mod error;
pub mod schema;
pub mod store;

pub use archetype::{Archetype, ArchetypeCatalog, SpawnOverrides};
pub use durability::{DamageOutcome, DurabilitySystem};
pub use error::{StoreError, StoreResult, ValidationError};
pub use schema::{default_limit, SchemaRegistry};
pub use store::{EntityStore, HookEvent, HookFn};
