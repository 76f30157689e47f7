//! # Movement System
//!
//! Two surfaces share one collision world:
//!
//! - the **tick integrator** (`update`) applies gravity, friction and speed
//!   clamping to every entity that carries a velocity, resolving collisions
//!   by a horizontal-then-vertical cascade;
//! - the **authoritative intent** surface (`attempt_move`) validates a
//!   requested displacement with a swept AABB test and returns the clamped
//!   position and blocker on contact.
//!
//! The sweep tests the mover against static chunk occupancy (coarse,
//! end-position overlap) and against every solid entity (Minkowski-expanded
//! slab test). The nearest contact wins; on a distance tie the dynamic
//! entity wins, so callers always learn which entity stopped them.

use crate::chunk::ChunkManager;
use crate::layer::LayerRegistry;
use crate::spatial::{chunk_key_at, neighbors};
use meridian_core::EntityStore;
use meridian_shared::constants::{
    COLLISION_EPSILON, DEFAULT_AIR_FRICTION, DEFAULT_GRAVITY, DEFAULT_GROUND_FRICTION,
    DEFAULT_MAX_SPEED, DEFAULT_TERMINAL_VELOCITY,
};
use meridian_shared::contract::{Contract, ContractKind};
use meridian_shared::{Aabb, ChunkKey, EntityId, LayerId, Vec3};
use std::collections::HashSet;

/// Distance of the ground probe below the entity.
const GROUND_PROBE_DEPTH: f64 = 0.1;

/// Tuning for the movement pipeline.
#[derive(Clone, Debug)]
pub struct MovementConfig {
    /// Terminal fall speed (negative, units per second).
    pub terminal_velocity: f64,
    /// Per-second friction multiplier while grounded.
    pub ground_friction: f64,
    /// Per-second friction multiplier while airborne.
    pub air_friction: f64,
    /// Epsilon used to back clamped movement off the contact.
    pub collision_epsilon: f64,
    /// Speed cap for mobile entities that declare none.
    pub default_max_speed: f64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            terminal_velocity: DEFAULT_TERMINAL_VELOCITY,
            ground_friction: DEFAULT_GROUND_FRICTION,
            air_friction: DEFAULT_AIR_FRICTION,
            collision_epsilon: COLLISION_EPSILON,
            default_max_speed: DEFAULT_MAX_SPEED,
        }
    }
}

/// What stopped a sweep.
#[derive(Clone, Debug, PartialEq)]
pub enum Blocker {
    /// A solid entity.
    Entity(EntityId),
    /// The static occupancy grid.
    Terrain,
}

/// A sweep contact.
#[derive(Clone, Debug)]
struct SweepHit {
    distance: f64,
    normal: Vec3,
    blocker: Blocker,
}

/// Result of an `attempt_move`.
#[derive(Clone, Debug, PartialEq)]
pub struct MoveOutcome {
    /// Whether the full displacement was applied.
    pub ok: bool,
    /// The authoritative position after the attempt.
    pub position: Vec3,
    /// Why movement stopped short, when it did.
    pub reason: Option<String>,
    /// Surface normal at the contact, when blocked by geometry.
    pub normal: Option<Vec3>,
}

impl MoveOutcome {
    fn accepted(position: Vec3) -> Self {
        Self {
            ok: true,
            position,
            reason: None,
            normal: None,
        }
    }

    fn refused(position: Vec3, reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            position,
            reason: Some(reason.into()),
            normal: None,
        }
    }
}

/// The movement system.
pub struct MovementSystem {
    config: MovementConfig,
}

impl MovementSystem {
    /// Creates the system.
    #[must_use]
    pub fn new(config: MovementConfig) -> Self {
        Self { config }
    }

    // =========================================================================
    // Authoritative intent
    // =========================================================================

    /// Validates a requested move and returns the clamped outcome. The
    /// store is not mutated; committing the returned position is the
    /// caller's decision.
    #[must_use]
    pub fn attempt_move(
        &self,
        store: &EntityStore,
        chunks: &ChunkManager,
        layers: &LayerRegistry,
        id: &EntityId,
        want: Vec3,
        dt: f64,
    ) -> MoveOutcome {
        let Some(mobility) = store
            .get(id, ContractKind::Mobility)
            .and_then(Contract::as_mobility)
        else {
            return MoveOutcome::refused(Vec3::ZERO, "no mobility");
        };
        let current = mobility.position;
        let Some(shape) = store.get(id, ContractKind::Shape).and_then(Contract::as_shape)
        else {
            return MoveOutcome::refused(current, "no shape");
        };

        let direction = want - current;
        let distance = direction.length();
        if distance < self.config.collision_epsilon {
            return MoveOutcome::accepted(current);
        }

        let max_speed = mobility.max_speed.unwrap_or(self.config.default_max_speed);
        let travel = distance.min(max_speed * dt.max(0.0));
        let unit = direction * (1.0 / distance);
        let displacement = unit * travel;
        let proposed = current + displacement;

        let start_box = shape.bounds.translated(current);
        let (layer_id, chunk_size) = self.layer_of(layers, id);

        match self.sweep(store, chunks, &layer_id, chunk_size, id, &start_box, displacement) {
            None => MoveOutcome::accepted(proposed),
            Some(hit) => {
                let t = (hit.distance / travel - self.config.collision_epsilon).max(0.0);
                let position = current + displacement * t;
                let reason = match &hit.blocker {
                    Blocker::Entity(other) => format!("blocked by entity {other}"),
                    Blocker::Terrain => "blocked by terrain".to_owned(),
                };
                MoveOutcome {
                    ok: false,
                    position,
                    reason: Some(reason),
                    normal: Some(hit.normal),
                }
            }
        }
    }

    // =========================================================================
    // Tick integrator
    // =========================================================================

    /// Integrates gravity, friction and velocity for every entity that
    /// carries one, resolving collisions and keeping chunk membership in
    /// step with motion.
    pub fn update(
        &self,
        dt: f64,
        store: &mut EntityStore,
        chunks: &mut ChunkManager,
        layers: &LayerRegistry,
    ) {
        if dt <= 0.0 {
            return;
        }
        let movers = store.list_with(ContractKind::Mobility);
        for id in movers {
            self.integrate_one(dt, &id, store, chunks, layers);
        }
    }

    fn integrate_one(
        &self,
        dt: f64,
        id: &EntityId,
        store: &mut EntityStore,
        chunks: &mut ChunkManager,
        layers: &LayerRegistry,
    ) {
        let Some(mobility) = store
            .get(id, ContractKind::Mobility)
            .and_then(Contract::as_mobility)
            .cloned()
        else {
            return;
        };
        // Entities without a velocity record are static scenery.
        let Some(mut velocity) = mobility.velocity else {
            return;
        };

        let position = mobility.position;
        let (layer_id, chunk_size) = self.layer_of(layers, id);
        let gravity = layers
            .get(&layer_id)
            .map_or(DEFAULT_GRAVITY, |l| l.gravity);
        let has_shape = store.get(id, ContractKind::Shape).is_some();

        let grounded = has_shape
            && self.position_blocked(
                store,
                chunks,
                layers,
                id,
                position - Vec3::new(0.0, GROUND_PROBE_DEPTH, 0.0),
            );

        if grounded {
            if velocity.y < 0.0 {
                velocity.y = 0.0;
            }
        } else {
            velocity.y = (velocity.y + gravity * dt).max(self.config.terminal_velocity);
        }

        let friction = if grounded {
            self.config.ground_friction
        } else {
            self.config.air_friction
        };
        let damping = friction.powf(dt);
        velocity.x *= damping;
        velocity.z *= damping;

        if let Some(max_speed) = mobility.max_speed {
            let horizontal = (velocity.x * velocity.x + velocity.z * velocity.z).sqrt();
            if horizontal > max_speed {
                let scale = max_speed / horizontal;
                velocity.x *= scale;
                velocity.z *= scale;
            }
        }

        let candidate = position + velocity * dt;
        let new_position = if !has_shape {
            candidate
        } else if !self.position_blocked(store, chunks, layers, id, candidate) {
            candidate
        } else {
            let horizontal_only = Vec3::new(candidate.x, position.y, candidate.z);
            let vertical_only = Vec3::new(position.x, candidate.y, position.z);
            if !self.position_blocked(store, chunks, layers, id, horizontal_only) {
                velocity.y = 0.0;
                horizontal_only
            } else if !self.position_blocked(store, chunks, layers, id, vertical_only) {
                velocity.x = 0.0;
                velocity.z = 0.0;
                vertical_only
            } else {
                velocity = Vec3::ZERO;
                position
            }
        };

        if has_shape
            && velocity.y < 0.0
            && self.position_blocked(
                store,
                chunks,
                layers,
                id,
                new_position - Vec3::new(0.0, GROUND_PROBE_DEPTH, 0.0),
            )
        {
            velocity.y = 0.0;
        }

        let moved = new_position != position;
        if let Some(record) = store.mobility_mut(id) {
            record.position = new_position;
            record.velocity = Some(velocity);
        }
        if moved {
            self.sync_chunk(store, chunks, &layer_id, chunk_size, id, position, new_position);
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Moves an entity's chunk membership after a committed position change
    /// and streams the matching deltas.
    pub fn sync_chunk(
        &self,
        store: &EntityStore,
        chunks: &mut ChunkManager,
        layer_id: &LayerId,
        chunk_size: f64,
        id: &EntityId,
        old_pos: Vec3,
        new_pos: Vec3,
    ) {
        let old_key = chunk_key_at(layer_id, old_pos, chunk_size);
        let new_key = chunk_key_at(layer_id, new_pos, chunk_size);
        if old_key == new_key {
            chunks.note_entity_update(store, id, &new_key);
        } else {
            chunks.move_entity(store, id, &old_key, &new_key);
        }
    }

    /// Teleports an entity, refusing destinations that would collide.
    /// A successful teleport zeroes the velocity.
    pub fn teleport(
        &self,
        store: &mut EntityStore,
        chunks: &mut ChunkManager,
        layers: &LayerRegistry,
        id: &EntityId,
        destination: Vec3,
    ) -> bool {
        let Some(mobility) = store
            .get(id, ContractKind::Mobility)
            .and_then(Contract::as_mobility)
            .cloned()
        else {
            return false;
        };
        let has_shape = store.get(id, ContractKind::Shape).is_some();
        if has_shape && self.position_blocked(store, chunks, layers, id, destination) {
            return false;
        }

        let old_pos = mobility.position;
        let had_velocity = mobility.velocity.is_some();
        if let Some(record) = store.mobility_mut(id) {
            record.position = destination;
            if had_velocity {
                record.velocity = Some(Vec3::ZERO);
            }
        }
        let (layer_id, chunk_size) = self.layer_of(layers, id);
        self.sync_chunk(store, chunks, &layer_id, chunk_size, id, old_pos, destination);
        true
    }

    /// Overwrites an entity's velocity.
    pub fn set_velocity(store: &mut EntityStore, id: &EntityId, velocity: Vec3) -> bool {
        match store.mobility_mut(id) {
            Some(record) => {
                record.velocity = Some(velocity);
                true
            }
            None => false,
        }
    }

    /// Adds to an entity's velocity.
    pub fn apply_impulse(store: &mut EntityStore, id: &EntityId, impulse: Vec3) -> bool {
        match store.mobility_mut(id) {
            Some(record) => {
                let current = record.velocity.unwrap_or(Vec3::ZERO);
                record.velocity = Some(current + impulse);
                true
            }
            None => false,
        }
    }

    /// Whether the entity's box, placed at `pos`, overlaps static occupancy
    /// or any solid entity.
    #[must_use]
    pub fn position_blocked(
        &self,
        store: &EntityStore,
        chunks: &ChunkManager,
        layers: &LayerRegistry,
        id: &EntityId,
        pos: Vec3,
    ) -> bool {
        let Some(shape) = store.get(id, ContractKind::Shape).and_then(Contract::as_shape)
        else {
            return false;
        };
        let bounds = shape.bounds.translated(pos);
        let (layer_id, chunk_size) = self.layer_of(layers, id);

        let center_key = chunk_key_at(&layer_id, pos, chunk_size);
        for key in neighbors(&center_key, 1) {
            if let Some(chunk) = chunks.get(&key) {
                if let Some(grid) = chunk.occupancy.as_ref() {
                    let origin = crate::spatial::chunk_to_world(key.cx, key.cy, key.cz, chunk_size);
                    if grid.overlaps_solid(origin, chunk_size, &bounds) {
                        return true;
                    }
                }
            }
        }

        for (other_box, _) in self.solid_boxes(store, id) {
            if bounds.intersects(&other_box) {
                return true;
            }
        }
        false
    }

    fn layer_of(&self, layers: &LayerRegistry, id: &EntityId) -> (LayerId, f64) {
        match layers.layer_of(id) {
            Some(layer_id) => {
                let size = layers
                    .chunk_size_of(layer_id)
                    .unwrap_or(layers.default_layer().chunk_size);
                (layer_id.clone(), size)
            }
            None => {
                let default = layers.default_layer();
                (default.id.clone(), default.chunk_size)
            }
        }
    }

    /// World-space boxes of every solid entity other than the mover.
    fn solid_boxes(&self, store: &EntityStore, mover: &EntityId) -> Vec<(Aabb, EntityId)> {
        store
            .list_with(ContractKind::Solidity)
            .into_iter()
            .filter(|other| other != mover)
            .filter_map(|other| {
                let solid = store
                    .get(&other, ContractKind::Solidity)
                    .and_then(Contract::as_solidity)?
                    .solid;
                if !solid {
                    return None;
                }
                let shape = store.get(&other, ContractKind::Shape).and_then(Contract::as_shape)?;
                let pos = store
                    .get(&other, ContractKind::Mobility)
                    .and_then(Contract::as_mobility)?
                    .position;
                Some((shape.bounds.translated(pos), other))
            })
            .collect()
    }

    /// Swept test of the mover's box along a displacement. Returns the
    /// nearest contact; dynamic entities win distance ties against the
    /// static grid.
    fn sweep(
        &self,
        store: &EntityStore,
        chunks: &ChunkManager,
        layer_id: &LayerId,
        chunk_size: f64,
        mover: &EntityId,
        start_box: &Aabb,
        displacement: Vec3,
    ) -> Option<SweepHit> {
        let length = displacement.length();
        if length <= 0.0 {
            return None;
        }
        let start_center = start_box.center();
        let end_center = start_center + displacement;
        let end_box = start_box.translated(displacement);

        // Static occupancy: coarse end-position overlap across the start
        // and end chunks plus their immediate neighborhoods.
        let mut candidates: HashSet<ChunkKey> = HashSet::new();
        for anchor in [start_center, end_center] {
            let key = chunk_key_at(layer_id, anchor, chunk_size);
            candidates.extend(neighbors(&key, 1));
        }
        let mut static_hit: Option<SweepHit> = None;
        for key in &candidates {
            let Some(chunk) = chunks.get(key) else { continue };
            let Some(grid) = chunk.occupancy.as_ref() else { continue };
            let origin = crate::spatial::chunk_to_world(key.cx, key.cy, key.cz, chunk_size);
            if grid.overlaps_solid(origin, chunk_size, &end_box) {
                static_hit = Some(SweepHit {
                    distance: length * 0.5,
                    normal: Vec3::UP,
                    blocker: Blocker::Terrain,
                });
                break;
            }
        }

        // Dynamic solids: Minkowski-expanded slab test on the center segment.
        let half = start_box.half_extents();
        let mut dynamic_hit: Option<SweepHit> = None;
        for (target, other) in self.solid_boxes(store, mover) {
            let expanded = target.expanded(half);
            if let Some((t, normal)) = slab_intersect(&expanded, start_center, displacement) {
                let distance = t * length;
                let closer = dynamic_hit
                    .as_ref()
                    .is_none_or(|best| distance < best.distance);
                if closer {
                    dynamic_hit = Some(SweepHit {
                        distance,
                        normal,
                        blocker: Blocker::Entity(other),
                    });
                }
            }
        }

        match (static_hit, dynamic_hit) {
            (None, None) => None,
            (Some(hit), None) => Some(hit),
            (None, Some(hit)) => Some(hit),
            (Some(stat), Some(dynamic)) => {
                if dynamic.distance <= stat.distance {
                    Some(dynamic)
                } else {
                    Some(stat)
                }
            }
        }
    }
}

impl Default for MovementSystem {
    fn default() -> Self {
        Self::new(MovementConfig::default())
    }
}

/// Segment-vs-box slab intersection.
///
/// Returns the entry parameter `t` in `[0, 1]` and the axis-aligned entry
/// normal (opposite to the displacement on the entry axis), or `None` when
/// the segment misses, exits before entering, or starts inside.
fn slab_intersect(bounds: &Aabb, p0: Vec3, d: Vec3) -> Option<(f64, Vec3)> {
    let mins = bounds.min.to_array();
    let maxs = bounds.max.to_array();
    let origin = p0.to_array();
    let delta = d.to_array();

    let mut t_enter = f64::NEG_INFINITY;
    let mut t_exit = f64::INFINITY;
    let mut entry_axis = 0usize;

    for axis in 0..3 {
        if delta[axis].abs() < 1e-12 {
            if origin[axis] < mins[axis] || origin[axis] > maxs[axis] {
                return None;
            }
            continue;
        }
        let t1 = (mins[axis] - origin[axis]) / delta[axis];
        let t2 = (maxs[axis] - origin[axis]) / delta[axis];
        let (lo, hi) = if t1 < t2 { (t1, t2) } else { (t2, t1) };
        if lo > t_enter {
            t_enter = lo;
            entry_axis = axis;
        }
        t_exit = t_exit.min(hi);
        if t_enter > t_exit {
            return None;
        }
    }

    if !(0.0..=1.0).contains(&t_enter) {
        return None;
    }

    let mut normal = [0.0; 3];
    normal[entry_axis] = -delta[entry_axis].signum();
    Some((t_enter, Vec3::new(normal[0], normal[1], normal[2])))
}
