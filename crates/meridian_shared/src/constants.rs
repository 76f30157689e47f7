//! # World Constants
//!
//! Baseline values for the simulation. Runtime configuration may override
//! the tunable ones; the structural ones (chunk height, version start) are
//! fixed for every world this server hosts.

/// Vertical extent of a chunk in world units.
///
/// Independent of the horizontal chunk size: worlds are tall slabs, and the
/// vertical axis is partitioned on this fixed stride.
pub const CHUNK_HEIGHT: f64 = 256.0;

/// Default horizontal chunk size in world units.
pub const DEFAULT_CHUNK_SIZE: f64 = 32.0;

/// Default gravity acceleration (world units per second squared, negative = down).
pub const DEFAULT_GRAVITY: f64 = -9.81;

/// Default simulation tick rate (ticks per second).
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Default terminal velocity for falling entities (units per second).
pub const DEFAULT_TERMINAL_VELOCITY: f64 = -53.0;

/// Default friction multiplier applied per second while grounded.
pub const DEFAULT_GROUND_FRICTION: f64 = 0.8;

/// Default friction multiplier applied per second while airborne.
pub const DEFAULT_AIR_FRICTION: f64 = 0.98;

/// Default epsilon used to back collisions off surfaces and to keep
/// half-open chunk intervals from double-counting boundary positions.
pub const COLLISION_EPSILON: f64 = 0.001;

/// Default maximum speed for a mobile entity that declares none.
pub const DEFAULT_MAX_SPEED: f64 = 5.0;

/// Resolution of the static occupancy grid along each axis of a chunk.
pub const OCCUPANCY_RESOLUTION: usize = 16;

/// First version number a chunk reports. Versions only ever increase.
pub const INITIAL_CHUNK_VERSION: u64 = 1;

/// Identifier of the layer that always exists and cannot be removed.
pub const DEFAULT_LAYER: &str = "default";

/// Server identity advertised in `hello_ok`.
pub const SERVER_ID: &str = "meridian";

/// Server protocol version advertised in `hello_ok`.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_constants() {
        assert_eq!(CHUNK_HEIGHT, 256.0);
        assert_eq!(INITIAL_CHUNK_VERSION, 1);
        assert!(COLLISION_EPSILON > 0.0);
    }
}
