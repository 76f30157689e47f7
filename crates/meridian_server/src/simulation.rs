//! # Simulation Facade
//!
//! The single-threaded executor state: the entity store, the spatial world
//! and the systems, composed behind one type. Everything that mutates
//! simulation state goes through here, one operation at a time; background
//! threads only ever talk to it through posted operations.
//!
//! The facade also owns the cross-cutting sequences the subsystems cannot
//! do alone, e.g. "destroy entity" = durability removal + chunk membership
//! cleanup + despawn fan-out + layer unbinding, in that order.

use crate::config::RuntimeConfig;
use crate::events::{DevEvent, DevEventHub};
use meridian_core::{
    archetype::{player_contracts, ArchetypeCatalog, SpawnOverrides},
    durability::DamageOutcome,
    DurabilitySystem, EntityStore, StoreError,
};
use meridian_shared::contract::{Contract, ContractKind};
use meridian_shared::protocol::ServerMessage;
use meridian_shared::{ChunkKey, EntityId, LayerId, SessionId, Vec3};
use meridian_world::spatial::chunk_key_at;
use meridian_world::{
    Layer, LayerRegistry, ChunkManager, MovementSystem, WorldError,
};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Errors from composite simulation operations.
#[derive(Error, Debug)]
pub enum SimError {
    /// The store refused the operation.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The world refused the operation.
    #[error(transparent)]
    World(#[from] WorldError),
}

/// A stats snapshot for the admin surface.
#[derive(Clone, Debug)]
pub struct SimStats {
    /// Live entities.
    pub entities: usize,
    /// Entities per layer.
    pub entities_per_layer: BTreeMap<LayerId, usize>,
    /// Registered layers.
    pub layers: usize,
    /// Loaded chunks.
    pub loaded_chunks: usize,
    /// Retained chunk metadata entries.
    pub retained_chunks: usize,
    /// Cataloged archetypes.
    pub archetypes: usize,
    /// Players spawned over the server's lifetime.
    pub player_counter: u64,
    /// Ticks executed.
    pub tick_count: u64,
    /// Tick-internal errors logged and survived.
    pub tick_errors: u64,
}

/// The simulation state and systems.
pub struct Simulation {
    /// The entity/contract store.
    pub store: EntityStore,
    /// Layer registry plus entity->layer side index.
    pub layers: LayerRegistry,
    /// Chunk index, subscriptions and streaming.
    pub chunks: ChunkManager,
    /// Movement pipeline.
    pub movement: MovementSystem,
    /// Durability lifecycle.
    pub durability: DurabilitySystem,
    /// Spawnable templates.
    pub archetypes: ArchetypeCatalog,
    /// Dev event hub (injected, process lifetime).
    pub events: std::sync::Arc<DevEventHub>,
    /// Players spawned over the server's lifetime; persisted.
    pub player_counter: u64,
    tick_count: u64,
    tick_errors: u64,
}

impl Simulation {
    /// Builds the simulation from the runtime configuration.
    #[must_use]
    pub fn new(config: &RuntimeConfig, events: std::sync::Arc<DevEventHub>) -> Self {
        let mut store = EntityStore::new();
        let durability = DurabilitySystem::attach(&mut store);
        Self {
            store,
            layers: LayerRegistry::new(),
            chunks: ChunkManager::new(config.chunk_config()),
            movement: MovementSystem::new(config.movement_config()),
            durability,
            archetypes: ArchetypeCatalog::new(),
            events,
            player_counter: 0,
            tick_count: 0,
            tick_errors: 0,
        }
    }

    // =========================================================================
    // Spawning and destruction
    // =========================================================================

    /// Spawns an entity from an archetype into a layer.
    ///
    /// # Errors
    ///
    /// `UnknownLayer`, `UnknownArchetype`, or any store create failure.
    pub fn spawn(
        &mut self,
        archetype_id: &str,
        layer_id: &LayerId,
        pos: Vec3,
        overrides: &SpawnOverrides,
    ) -> Result<EntityId, SimError> {
        if self.layers.get(layer_id).is_none() {
            return Err(WorldError::UnknownLayer(layer_id.clone()).into());
        }
        let id = self
            .archetypes
            .spawn_into(&mut self.store, archetype_id, pos, overrides)?;
        self.place(&id, layer_id, pos);
        Ok(id)
    }

    /// Spawns a player at a layer's spawn point, binding it to nothing yet;
    /// the session layer owns the binding.
    ///
    /// # Errors
    ///
    /// `UnknownLayer` or any store create failure.
    pub fn spawn_player(
        &mut self,
        layer_id: Option<&LayerId>,
        name: Option<&str>,
    ) -> Result<(EntityId, LayerId), SimError> {
        let layer = match layer_id {
            Some(id) => self
                .layers
                .get(id)
                .ok_or_else(|| WorldError::UnknownLayer(id.clone()))?,
            None => self.layers.default_layer(),
        };
        let layer_id = layer.id.clone();
        let spawn_point = layer.spawn_point;

        self.player_counter += 1;
        let tag: u32 = rand::random::<u32>() & 0xFFFF;
        let id = EntityId::new(format!("player-{}-{tag:04x}", self.player_counter));
        let contracts = player_contracts(&id, name, spawn_point);
        self.store.create(id.clone(), contracts)?;
        self.place(&id, &layer_id, spawn_point);
        tracing::info!(player = %id, layer = %layer_id, "player spawned");
        Ok((id, layer_id))
    }

    /// Registers a freshly created entity with its layer and chunk.
    fn place(&mut self, id: &EntityId, layer_id: &LayerId, pos: Vec3) {
        self.layers.bind_entity(id.clone(), layer_id.clone());
        let chunk_size = self
            .layers
            .chunk_size_of(layer_id)
            .unwrap_or(meridian_shared::constants::DEFAULT_CHUNK_SIZE);
        let key = chunk_key_at(layer_id, pos, chunk_size);
        self.chunks.add_entity(&self.store, id, &key);
        self.events.publish(DevEvent::EntitySpawned {
            entity: id.clone(),
            layer: layer_id.clone(),
        });
    }

    /// Removes an entity entirely: chunk membership, despawn fan-out, layer
    /// binding, store record. Returns `false` for unknown ids.
    pub fn despawn(&mut self, id: &EntityId) -> bool {
        if !self.store.contains(id) {
            return false;
        }
        let key = self.entity_chunk_key(id);
        if !self.store.remove(id) {
            return false;
        }
        self.finish_removal(id, key);
        true
    }

    /// Chunk cleanup and fan-out for an entity already gone from the store.
    fn finish_removal(&mut self, id: &EntityId, key: Option<ChunkKey>) {
        if let Some(key) = key {
            self.chunks.remove_entity(id, &key);
            self.broadcast_despawn(id, &key);
        }
        self.layers.unbind_entity(id);
        self.events.publish(DevEvent::EntityDestroyed { entity: id.clone() });
    }

    /// Sends `entity_despawn` to every subscriber of the entity's chunk.
    fn broadcast_despawn(&mut self, id: &EntityId, key: &ChunkKey) {
        let subscribers: Vec<SessionId> = self
            .chunks
            .get(key)
            .map(|c| c.subscribers.iter().copied().collect())
            .unwrap_or_default();
        for session in subscribers {
            self.chunks.send_to(
                session,
                ServerMessage::EntityDespawn {
                    entity_id: id.clone(),
                    chunk_key: key.clone(),
                },
            );
        }
    }

    // =========================================================================
    // Durability composition
    // =========================================================================

    /// Applies damage; a killing blow also runs the spatial destruction
    /// sequence.
    pub fn damage(
        &mut self,
        id: &EntityId,
        amount: f64,
        source: Option<EntityId>,
    ) -> Option<DamageOutcome> {
        let key = self.entity_chunk_key(id);
        let outcome = self
            .durability
            .damage(&mut self.store, id, amount, source)?;
        if outcome.destroyed {
            self.finish_removal(id, key);
        }
        self.events.publish(DevEvent::DamageApplied {
            entity: id.clone(),
            actual: outcome.actual,
            destroyed: outcome.destroyed,
        });
        Some(outcome)
    }

    /// Heals an entity (see [`DurabilitySystem::heal`]).
    pub fn heal(&mut self, id: &EntityId, amount: f64) -> bool {
        self.durability.heal(&mut self.store, id, amount)
    }

    /// Repairs an entity to full health.
    pub fn repair(&mut self, id: &EntityId) -> bool {
        self.durability.repair(&mut self.store, id)
    }

    // =========================================================================
    // Ticking
    // =========================================================================

    /// One simulation tick: movement, then durability. Destruction found by
    /// the durability sweep runs the full spatial sequence. Errors inside a
    /// tick are counted and survived, never propagated.
    pub fn tick(&mut self, dt: f64) {
        self.tick_count += 1;

        self.movement
            .update(dt, &mut self.store, &mut self.chunks, &self.layers);

        // Chunk keys must be captured before the sweep removes the records.
        let doomed: Vec<(EntityId, Option<ChunkKey>)> = self
            .store
            .list_with(ContractKind::Durability)
            .into_iter()
            .filter(|id| {
                self.store
                    .get(id, ContractKind::Durability)
                    .and_then(Contract::as_durability)
                    .is_some_and(|d| d.health <= 0.0)
            })
            .map(|id| {
                let key = self.entity_chunk_key(&id);
                (id, key)
            })
            .collect();

        let destroyed = self.durability.tick(&mut self.store);
        for id in destroyed {
            let key = doomed
                .iter()
                .find(|(doomed_id, _)| *doomed_id == id)
                .and_then(|(_, key)| key.clone());
            self.finish_removal(&id, key);
        }
    }

    /// Periodic upkeep, delegated to the chunk manager.
    pub fn maintenance(&mut self, live_sessions: &HashSet<SessionId>) {
        self.chunks.maintenance(live_sessions);
    }

    /// Records a survived tick-internal error.
    pub fn note_tick_error(&mut self) {
        self.tick_errors += 1;
    }

    // =========================================================================
    // Layers
    // =========================================================================

    /// Creates a layer.
    ///
    /// # Errors
    ///
    /// See [`LayerRegistry::create`].
    pub fn create_layer(&mut self, layer: Layer) -> Result<(), SimError> {
        let id = layer.id.clone();
        self.layers.create(layer)?;
        self.events.publish(DevEvent::LayerCreated { layer: id });
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The chunk an entity currently occupies, derived from its position.
    #[must_use]
    pub fn entity_chunk_key(&self, id: &EntityId) -> Option<ChunkKey> {
        let position = self
            .store
            .get(id, ContractKind::Mobility)
            .and_then(Contract::as_mobility)?
            .position;
        let layer_id = self
            .layers
            .layer_of(id)
            .cloned()
            .unwrap_or_else(|| self.layers.default_layer().id.clone());
        let chunk_size = self
            .layers
            .chunk_size_of(&layer_id)
            .unwrap_or(meridian_shared::constants::DEFAULT_CHUNK_SIZE);
        Some(chunk_key_at(&layer_id, position, chunk_size))
    }

    /// Stats snapshot for the admin surface; returned by copy so external
    /// readers never hold a reference into the executor's state.
    #[must_use]
    pub fn stats(&self) -> SimStats {
        SimStats {
            entities: self.store.len(),
            entities_per_layer: self.layers.entity_counts(),
            layers: self.layers.len(),
            loaded_chunks: self.chunks.loaded_count(),
            retained_chunks: self.chunks.retained_count(),
            archetypes: self.archetypes.len(),
            player_counter: self.player_counter,
            tick_count: self.tick_count,
            tick_errors: self.tick_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::Archetype;
    use meridian_shared::contract::{Durability, Identity, Mobility};
    use std::sync::Arc;

    fn simulation() -> Simulation {
        Simulation::new(&RuntimeConfig::default(), Arc::new(DevEventHub::new()))
    }

    fn crate_archetype() -> Archetype {
        Archetype {
            id: "crate".to_owned(),
            name: "Crate".to_owned(),
            tags: Vec::new(),
            contracts: vec![
                Contract::Identity(Identity {
                    id: None,
                    name: "Crate".to_owned(),
                    description: None,
                }),
                Contract::Mobility(Mobility::default()),
                Contract::Durability(Durability {
                    health: 10.0,
                    max_health: 10.0,
                    armor: None,
                }),
            ],
        }
    }

    #[test]
    fn test_spawn_places_entity_in_chunk_and_layer() {
        let mut sim = simulation();
        sim.archetypes.define(crate_archetype());

        let layer = LayerId::new("default");
        let pos = Vec3::new(40.0, 5.0, -10.0);
        let id = sim
            .spawn("crate", &layer, pos, &SpawnOverrides::new())
            .unwrap();

        assert_eq!(sim.layers.layer_of(&id), Some(&layer));
        let key = sim.entity_chunk_key(&id).unwrap();
        assert_eq!((key.cx, key.cy, key.cz), (1, 0, -1));
        assert_eq!(sim.chunks.entities_in(&key), vec![id]);
    }

    #[test]
    fn test_spawn_into_unknown_layer_fails() {
        let mut sim = simulation();
        sim.archetypes.define(crate_archetype());
        let err = sim
            .spawn(
                "crate",
                &LayerId::new("nowhere"),
                Vec3::ZERO,
                &SpawnOverrides::new(),
            )
            .unwrap_err();
        assert!(matches!(err, SimError::World(WorldError::UnknownLayer(_))));
    }

    #[test]
    fn test_despawn_cleans_every_index() {
        let mut sim = simulation();
        sim.archetypes.define(crate_archetype());
        let layer = LayerId::new("default");
        let id = sim
            .spawn("crate", &layer, Vec3::ZERO, &SpawnOverrides::new())
            .unwrap();
        let key = sim.entity_chunk_key(&id).unwrap();

        assert!(sim.despawn(&id));
        assert!(!sim.store.contains(&id));
        assert!(sim.chunks.entities_in(&key).is_empty());
        assert_eq!(sim.layers.layer_of(&id), None);
        assert!(!sim.despawn(&id));
    }

    #[test]
    fn test_damage_kill_removes_from_chunk() {
        let mut sim = simulation();
        sim.archetypes.define(crate_archetype());
        let layer = LayerId::new("default");
        let id = sim
            .spawn("crate", &layer, Vec3::ZERO, &SpawnOverrides::new())
            .unwrap();
        let key = sim.entity_chunk_key(&id).unwrap();

        let outcome = sim.damage(&id, 25.0, None).unwrap();
        assert!(outcome.destroyed);
        assert!(!sim.store.contains(&id));
        assert!(sim.chunks.entities_in(&key).is_empty());
    }

    #[test]
    fn test_tick_sweep_runs_spatial_cleanup() {
        let mut sim = simulation();
        sim.archetypes.define(crate_archetype());
        let layer = LayerId::new("default");
        let id = sim
            .spawn("crate", &layer, Vec3::ZERO, &SpawnOverrides::new())
            .unwrap();
        let key = sim.entity_chunk_key(&id).unwrap();

        sim.store.durability_mut(&id).unwrap().health = 0.0;
        sim.tick(1.0 / 60.0);

        assert!(!sim.store.contains(&id));
        assert!(sim.chunks.entities_in(&key).is_empty());
        assert_eq!(sim.stats().tick_count, 1);
    }

    #[test]
    fn test_spawn_player_counts_and_binds() {
        let mut sim = simulation();
        let (id, layer) = sim.spawn_player(None, Some("Ada")).unwrap();
        assert_eq!(layer, LayerId::new("default"));
        assert!(id.as_str().starts_with("player-1-"));
        assert_eq!(sim.player_counter, 1);
        assert_eq!(sim.layers.layer_of(&id), Some(&layer));

        let err = sim.spawn_player(Some(&LayerId::new("void")), None).unwrap_err();
        assert!(matches!(err, SimError::World(WorldError::UnknownLayer(_))));
    }
}
