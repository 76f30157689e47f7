//! # Spatial Module
//!
//! Pure, stateless math mapping world coordinates onto the chunk grid.
//!
//! Horizontal axes are partitioned on the layer's chunk size; the vertical
//! axis is partitioned on the fixed [`CHUNK_HEIGHT`] stride regardless of
//! layer.

use meridian_shared::constants::{CHUNK_HEIGHT, COLLISION_EPSILON};
use meridian_shared::{Aabb, ChunkKey, LayerId, Vec3};

/// Maps a world position to its chunk cell.
#[must_use]
pub fn world_to_chunk(pos: Vec3, chunk_size: f64) -> (i64, i64, i64) {
    (
        (pos.x / chunk_size).floor() as i64,
        (pos.y / CHUNK_HEIGHT).floor() as i64,
        (pos.z / chunk_size).floor() as i64,
    )
}

/// Maps a world position to a chunk key within a layer.
#[must_use]
pub fn chunk_key_at(layer: &LayerId, pos: Vec3, chunk_size: f64) -> ChunkKey {
    let (cx, cy, cz) = world_to_chunk(pos, chunk_size);
    ChunkKey::new(layer.clone(), cx, cy, cz)
}

/// The world-space origin (minimum corner) of a chunk cell.
#[must_use]
pub fn chunk_to_world(cx: i64, cy: i64, cz: i64, chunk_size: f64) -> Vec3 {
    Vec3::new(
        cx as f64 * chunk_size,
        cy as f64 * CHUNK_HEIGHT,
        cz as f64 * chunk_size,
    )
}

/// The world-space center of a chunk cell.
#[must_use]
pub fn chunk_center(cx: i64, cy: i64, cz: i64, chunk_size: f64) -> Vec3 {
    chunk_to_world(cx, cy, cz, chunk_size)
        + Vec3::new(chunk_size * 0.5, CHUNK_HEIGHT * 0.5, chunk_size * 0.5)
}

/// Cell index range `[lo, hi]` covered by `[min, max - eps)` on one axis.
///
/// A narrow box that straddles the origin on the axis, with a span smaller
/// than the cell size, clamps to the origin cell so small local volumes
/// resolve to one chunk instead of up to eight.
fn axis_cells(min: f64, max: f64, size: f64) -> (i64, i64) {
    if min < 0.0 && max > 0.0 && (max - min) < size {
        return (0, 0);
    }
    let lo = (min / size).floor() as i64;
    let hi = (((max - COLLISION_EPSILON).max(min)) / size).floor() as i64;
    (lo, hi.max(lo))
}

/// Chunk cells whose half-open extent overlaps a world-space box.
#[must_use]
pub fn intersecting_chunks(layer: &LayerId, bounds: &Aabb, chunk_size: f64) -> Vec<ChunkKey> {
    let (x_lo, x_hi) = axis_cells(bounds.min.x, bounds.max.x, chunk_size);
    let (y_lo, y_hi) = axis_cells(bounds.min.y, bounds.max.y, CHUNK_HEIGHT);
    let (z_lo, z_hi) = axis_cells(bounds.min.z, bounds.max.z, chunk_size);

    let mut out = Vec::new();
    for cy in y_lo..=y_hi {
        for cz in z_lo..=z_hi {
            for cx in x_lo..=x_hi {
                out.push(ChunkKey::new(layer.clone(), cx, cy, cz));
            }
        }
    }
    out
}

/// The inclusive cube `[-r..r]^3` of cells around a center, center included.
#[must_use]
pub fn neighbors(center: &ChunkKey, r: i64) -> Vec<ChunkKey> {
    let r = r.max(0);
    let mut out = Vec::with_capacity(((2 * r + 1).pow(3)) as usize);
    for dy in -r..=r {
        for dz in -r..=r {
            for dx in -r..=r {
                out.push(center.offset(dx, dy, dz));
            }
        }
    }
    out
}

/// Cells within a world-space radius of a position: the radius converts to
/// a chunk radius via `ceil(r / chunk_size)` and delegates to [`neighbors`].
#[must_use]
pub fn chunks_in_radius(
    layer: &LayerId,
    center_pos: Vec3,
    r_world: f64,
    chunk_size: f64,
) -> Vec<ChunkKey> {
    let center = chunk_key_at(layer, center_pos, chunk_size);
    let r = (r_world.max(0.0) / chunk_size).ceil() as i64;
    neighbors(&center, r)
}
