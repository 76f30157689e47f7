//! # Static Occupancy Grid
//!
//! A dense bit volume of fixed per-axis resolution describing which voxels
//! of a chunk are statically solid. The grid is deliberately coarse: it
//! answers "is something here" for terrain, not exact surfaces.

use meridian_shared::constants::{CHUNK_HEIGHT, OCCUPANCY_RESOLUTION};
use meridian_shared::{Aabb, Vec3};

/// Bit volume of `resolution^3` voxels.
#[derive(Clone, Debug)]
pub struct OccupancyGrid {
    resolution: usize,
    bits: Vec<u64>,
    solid_count: usize,
}

impl OccupancyGrid {
    /// Creates an empty grid at the default resolution.
    #[must_use]
    pub fn new() -> Self {
        Self::with_resolution(OCCUPANCY_RESOLUTION)
    }

    /// Creates an empty grid with `resolution` voxels along each axis.
    #[must_use]
    pub fn with_resolution(resolution: usize) -> Self {
        let total = resolution * resolution * resolution;
        Self {
            resolution,
            bits: vec![0; total.div_ceil(64)],
            solid_count: 0,
        }
    }

    /// Voxels along each axis.
    #[must_use]
    pub const fn resolution(&self) -> usize {
        self.resolution
    }

    /// Number of solid voxels.
    #[must_use]
    pub const fn solid_count(&self) -> usize {
        self.solid_count
    }

    fn bit_index(&self, x: usize, y: usize, z: usize) -> usize {
        (y * self.resolution + z) * self.resolution + x
    }

    /// Whether a voxel is solid. Out-of-range coordinates are never solid.
    #[must_use]
    pub fn is_solid(&self, x: i64, y: i64, z: i64) -> bool {
        let r = self.resolution as i64;
        if !(0..r).contains(&x) || !(0..r).contains(&y) || !(0..r).contains(&z) {
            return false;
        }
        let idx = self.bit_index(x as usize, y as usize, z as usize);
        self.bits[idx / 64] & (1 << (idx % 64)) != 0
    }

    /// Sets a voxel. Out-of-range coordinates are clipped silently.
    pub fn set_solid(&mut self, x: i64, y: i64, z: i64, solid: bool) {
        let r = self.resolution as i64;
        if !(0..r).contains(&x) || !(0..r).contains(&y) || !(0..r).contains(&z) {
            return;
        }
        let idx = self.bit_index(x as usize, y as usize, z as usize);
        let mask = 1u64 << (idx % 64);
        let word = &mut self.bits[idx / 64];
        let was = *word & mask != 0;
        if solid {
            *word |= mask;
        } else {
            *word &= !mask;
        }
        match (was, solid) {
            (false, true) => self.solid_count += 1,
            (true, false) => self.solid_count -= 1,
            _ => {}
        }
    }

    /// Maps a world position inside the chunk to grid indices.
    ///
    /// The horizontal axes wrap the position into `[0, chunk_size)` with a
    /// double modulo (so negative coordinates land correctly), then scale to
    /// the resolution; the vertical axis does the same against the fixed
    /// chunk height.
    #[must_use]
    pub fn cell_of(&self, pos: Vec3, chunk_size: f64) -> (i64, i64, i64) {
        let r = self.resolution as f64;
        let wrap = |v: f64, extent: f64| ((v % extent + extent) % extent / extent * r).floor() as i64;
        (
            wrap(pos.x, chunk_size),
            wrap(pos.y, CHUNK_HEIGHT),
            wrap(pos.z, chunk_size),
        )
    }

    /// Whether a world-space box overlaps any solid voxel of this grid.
    ///
    /// `origin` is the chunk's world-space minimum corner.
    #[must_use]
    pub fn overlaps_solid(&self, origin: Vec3, chunk_size: f64, bounds: &Aabb) -> bool {
        if self.solid_count == 0 {
            return false;
        }
        let r = self.resolution as f64;
        let voxel = Vec3::new(chunk_size / r, CHUNK_HEIGHT / r, chunk_size / r);

        let lo = |v: f64, step: f64| (v / step).floor() as i64;
        let hi = |v: f64, step: f64| (v / step).ceil() as i64;

        let local_min = bounds.min - origin;
        let local_max = bounds.max - origin;
        let (x0, x1) = (lo(local_min.x, voxel.x).max(0), hi(local_max.x, voxel.x).min(self.resolution as i64));
        let (y0, y1) = (lo(local_min.y, voxel.y).max(0), hi(local_max.y, voxel.y).min(self.resolution as i64));
        let (z0, z1) = (lo(local_min.z, voxel.z).max(0), hi(local_max.z, voxel.z).min(self.resolution as i64));

        for y in y0..y1 {
            for z in z0..z1 {
                for x in x0..x1 {
                    if !self.is_solid(x, y, z) {
                        continue;
                    }
                    let voxel_box = Aabb::new(
                        origin + Vec3::new(x as f64 * voxel.x, y as f64 * voxel.y, z as f64 * voxel.z),
                        origin
                            + Vec3::new(
                                (x + 1) as f64 * voxel.x,
                                (y + 1) as f64 * voxel.y,
                                (z + 1) as f64 * voxel.z,
                            ),
                    );
                    if bounds.intersects(&voxel_box) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

impl Default for OccupancyGrid {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_query() {
        let mut grid = OccupancyGrid::new();
        assert!(!grid.is_solid(8, 8, 8));
        grid.set_solid(8, 8, 8, true);
        assert!(grid.is_solid(8, 8, 8));
        assert_eq!(grid.solid_count(), 1);

        grid.set_solid(8, 8, 8, false);
        assert!(!grid.is_solid(8, 8, 8));
        assert_eq!(grid.solid_count(), 0);
    }

    #[test]
    fn test_out_of_range_clips() {
        let mut grid = OccupancyGrid::new();
        grid.set_solid(-1, 0, 0, true);
        grid.set_solid(16, 0, 0, true);
        assert_eq!(grid.solid_count(), 0);
        assert!(!grid.is_solid(-1, 0, 0));
        assert!(!grid.is_solid(99, 99, 99));
    }

    #[test]
    fn test_cell_of_negative_coordinates() {
        let grid = OccupancyGrid::new();
        // x = -1 in a 32-wide chunk wraps to 31 -> cell 15.
        let (x, _, _) = grid.cell_of(Vec3::new(-1.0, 0.0, 0.0), 32.0);
        assert_eq!(x, 15);
        let (x, y, z) = grid.cell_of(Vec3::new(16.0, 128.0, 0.0), 32.0);
        assert_eq!((x, y, z), (8, 8, 0));
    }

    #[test]
    fn test_overlap_against_world_box() {
        let mut grid = OccupancyGrid::new();
        // Chunk (0,0,0), size 32: voxel (8,8,8) spans x/z [16,18), y [128,144).
        grid.set_solid(8, 8, 8, true);
        let origin = Vec3::ZERO;

        let hit = Aabb::new(Vec3::new(15.0, 130.0, 15.0), Vec3::new(17.0, 131.0, 17.0));
        assert!(grid.overlaps_solid(origin, 32.0, &hit));

        let miss = Aabb::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(2.0, 2.0, 2.0));
        assert!(!grid.overlaps_solid(origin, 32.0, &miss));
    }
}
