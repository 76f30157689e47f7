//! # Chunk Manager
//!
//! Per-chunk entity membership, static occupancy, subscriber sets and
//! monotonically versioned deltas.
//!
//! ## Design
//!
//! - Membership is modeled as `(entity in chunk.entities)` with the chunk
//!   key always derivable from the entity's position; nothing points back
//!   from entity to chunk, so evicting chunk metadata can never strand a
//!   reference.
//! - Every membership or member-component mutation bumps the chunk version
//!   and stamps `last_modified`; deltas and snapshots carry the version so
//!   clients can detect drop or replay.
//! - Outbound messages ride per-session bounded channels. A full channel
//!   marks the subscriber slow: its whole delta stream is dropped and it
//!   must resubscribe, instead of the broadcaster ever blocking.

pub mod generator;
pub mod occupancy;

use crate::layer::LayerRegistry;
use crossbeam_channel::{Sender, TrySendError};
use meridian_core::EntityStore;
use meridian_shared::constants::INITIAL_CHUNK_VERSION;
use meridian_shared::protocol::{ChunkDelta, EntityState, ServerMessage};
use meridian_shared::{ChunkKey, EntityId, SessionId};
use occupancy::OccupancyGrid;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Eviction and retention tuning.
#[derive(Clone, Debug)]
pub struct ChunkConfig {
    /// Cap on simultaneously loaded chunks.
    pub max_loaded: usize,
    /// Cap on retained chunk metadata entries.
    pub max_retained: usize,
    /// Base delay before an unloaded chunk's metadata may be deleted; the
    /// deletion threshold is twice this.
    pub unload_delay: Duration,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_loaded: 1000,
            max_retained: 20000,
            unload_delay: Duration::from_secs(60),
        }
    }
}

/// One chunk's state.
pub struct Chunk {
    /// Address of this chunk.
    pub key: ChunkKey,
    /// Member entities.
    pub entities: HashSet<EntityId>,
    /// Whether the chunk is loaded (generated and simulated).
    pub loaded: bool,
    /// Static occupancy, present once loaded.
    pub occupancy: Option<OccupancyGrid>,
    /// Sessions subscribed to this chunk's stream.
    pub subscribers: HashSet<SessionId>,
    /// Monotonic version; starts at 1 and bumps on every mutation.
    pub version: u64,
    /// Last read or touch.
    pub last_accessed: Instant,
    /// Last membership or member-component change.
    pub last_modified: Instant,
}

impl Chunk {
    fn new(key: ChunkKey) -> Self {
        let now = Instant::now();
        Self {
            key,
            entities: HashSet::new(),
            loaded: false,
            occupancy: None,
            subscribers: HashSet::new(),
            version: INITIAL_CHUNK_VERSION,
            last_accessed: now,
            last_modified: now,
        }
    }

    fn mark_modified(&mut self) {
        self.version += 1;
        self.last_modified = Instant::now();
    }
}

/// The chunk manager.
pub struct ChunkManager {
    chunks: HashMap<ChunkKey, Chunk>,
    outboxes: HashMap<SessionId, Sender<ServerMessage>>,
    config: ChunkConfig,
}

impl ChunkManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            chunks: HashMap::new(),
            outboxes: HashMap::new(),
            config,
        }
    }

    // =========================================================================
    // Session plumbing
    // =========================================================================

    /// Registers the outbound channel for a session.
    pub fn register_session(&mut self, session: SessionId, outbox: Sender<ServerMessage>) {
        self.outboxes.insert(session, outbox);
    }

    /// Drops a session: outbox and every subscription.
    pub fn unregister_session(&mut self, session: SessionId) {
        self.outboxes.remove(&session);
        self.unsubscribe_all(session);
    }

    // =========================================================================
    // Chunk lifecycle
    // =========================================================================

    /// Looks up or creates a chunk, refreshing `last_accessed`.
    pub fn get_or_create(&mut self, key: &ChunkKey) -> &mut Chunk {
        let chunk = self
            .chunks
            .entry(key.clone())
            .or_insert_with(|| Chunk::new(key.clone()));
        chunk.last_accessed = Instant::now();
        chunk
    }

    /// Read-only chunk lookup; does not touch `last_accessed`.
    #[must_use]
    pub fn get(&self, key: &ChunkKey) -> Option<&Chunk> {
        self.chunks.get(key)
    }

    /// Loads a chunk: marks it loaded, materializes its occupancy grid and
    /// runs the reference generation policy. Idempotent per key: a
    /// re-load never duplicates the generated entity.
    pub fn load(
        &mut self,
        key: &ChunkKey,
        store: &mut EntityStore,
        layers: &mut LayerRegistry,
    ) {
        let chunk_size = layers
            .chunk_size_of(&key.layer_id)
            .unwrap_or(meridian_shared::constants::DEFAULT_CHUNK_SIZE);

        {
            let chunk = self.get_or_create(key);
            chunk.loaded = true;
            if chunk.occupancy.is_none() {
                chunk.occupancy = Some(OccupancyGrid::new());
            }
        }

        if !generator::should_generate(key) {
            return;
        }

        let terrain_id = generator::terrain_entity_id(key);
        if !store.contains(&terrain_id) {
            let (center, contracts) = generator::terrain_entity(key, chunk_size);
            match store.create(terrain_id.clone(), contracts) {
                Ok(()) => {
                    layers.bind_entity(terrain_id.clone(), key.layer_id.clone());
                    self.add_entity(store, &terrain_id, key);
                    tracing::debug!(chunk = %key, entity = %terrain_id, "terrain generated");
                    let chunk = self.get_or_create(key);
                    if let Some(grid) = chunk.occupancy.as_mut() {
                        let (gx, gy, gz) = grid.cell_of(center, chunk_size);
                        grid.set_solid(gx, gy, gz, true);
                    }
                }
                Err(err) => tracing::warn!(chunk = %key, %err, "terrain generation failed"),
            }
        } else if !self
            .get(key)
            .is_some_and(|c| c.entities.contains(&terrain_id))
        {
            // Metadata was evicted while the entity survived; re-register
            // membership without re-creating.
            self.add_entity(store, &terrain_id, key);
        }
    }

    /// Marks a chunk unloaded; metadata (and its grid) is retained.
    pub fn unload(&mut self, key: &ChunkKey) {
        if let Some(chunk) = self.chunks.get_mut(key) {
            chunk.loaded = false;
        }
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Adds an entity to a chunk, bumping the version and streaming an
    /// `entity_add` delta to subscribers.
    pub fn add_entity(&mut self, store: &EntityStore, id: &EntityId, key: &ChunkKey) {
        let inserted = {
            let chunk = self.get_or_create(key);
            let inserted = chunk.entities.insert(id.clone());
            if inserted {
                chunk.mark_modified();
            }
            inserted
        };
        if inserted {
            let contracts = store.contracts(id).map(<[_]>::to_vec).unwrap_or_default();
            self.emit_delta(
                key,
                ChunkDelta::EntityAdd {
                    entity_id: id.clone(),
                    contracts,
                },
            );
        }
    }

    /// Removes an entity from a chunk, bumping the version and streaming an
    /// `entity_remove` delta.
    pub fn remove_entity(&mut self, id: &EntityId, key: &ChunkKey) {
        let removed = match self.chunks.get_mut(key) {
            Some(chunk) => {
                let removed = chunk.entities.remove(id);
                if removed {
                    chunk.mark_modified();
                }
                removed
            }
            None => false,
        };
        if removed {
            self.emit_delta(
                key,
                ChunkDelta::EntityRemove {
                    entity_id: id.clone(),
                },
            );
        }
    }

    /// Moves an entity between chunks: remove from the old, add to the new.
    pub fn move_entity(
        &mut self,
        store: &EntityStore,
        id: &EntityId,
        from: &ChunkKey,
        to: &ChunkKey,
    ) {
        if from == to {
            return;
        }
        self.remove_entity(id, from);
        self.add_entity(store, id, to);
    }

    /// Streams an `entity_update` delta after a member's contract change.
    pub fn note_entity_update(&mut self, store: &EntityStore, id: &EntityId, key: &ChunkKey) {
        let is_member = match self.chunks.get_mut(key) {
            Some(chunk) => {
                if chunk.entities.contains(id) {
                    chunk.mark_modified();
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if is_member {
            let contracts = store.contracts(id).map(<[_]>::to_vec).unwrap_or_default();
            self.emit_delta(
                key,
                ChunkDelta::EntityUpdate {
                    entity_id: id.clone(),
                    contracts,
                },
            );
        }
    }

    /// Member entities of a chunk.
    #[must_use]
    pub fn entities_in(&self, key: &ChunkKey) -> Vec<EntityId> {
        self.chunks
            .get(key)
            .map(|c| c.entities.iter().cloned().collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // Subscriptions and streaming
    // =========================================================================

    /// Subscribes a session to a chunk and sends it a snapshot.
    pub fn subscribe(&mut self, store: &EntityStore, session: SessionId, key: &ChunkKey) {
        self.get_or_create(key).subscribers.insert(session);
        self.emit_snapshot(store, key, session);
    }

    /// Unsubscribes a session from one chunk.
    pub fn unsubscribe(&mut self, session: SessionId, key: &ChunkKey) {
        if let Some(chunk) = self.chunks.get_mut(key) {
            chunk.subscribers.remove(&session);
        }
    }

    /// Unsubscribes a session from every chunk.
    pub fn unsubscribe_all(&mut self, session: SessionId) {
        for chunk in self.chunks.values_mut() {
            chunk.subscribers.remove(&session);
        }
    }

    /// Sends the full state of a chunk to one session.
    pub fn emit_snapshot(&mut self, store: &EntityStore, key: &ChunkKey, session: SessionId) {
        let Some(chunk) = self.chunks.get(key) else {
            return;
        };
        let entities = chunk
            .entities
            .iter()
            .filter_map(|id| {
                store.contracts(id).map(|contracts| EntityState {
                    id: id.clone(),
                    contracts: contracts.to_vec(),
                })
            })
            .collect();
        let message = ServerMessage::ChunkSnapshot {
            chunk_key: key.clone(),
            entities,
            version: chunk.version,
        };
        self.send_to(session, message);
    }

    /// Broadcasts a delta to every subscriber of a chunk, carrying the
    /// chunk's post-mutation version.
    pub fn emit_delta(&mut self, key: &ChunkKey, delta: ChunkDelta) {
        let Some(chunk) = self.chunks.get(key) else {
            return;
        };
        if chunk.subscribers.is_empty() {
            return;
        }
        let message = ServerMessage::ChunkDelta {
            chunk_key: key.clone(),
            delta,
            version: chunk.version,
        };
        let subscribers: Vec<SessionId> = chunk.subscribers.iter().copied().collect();
        for session in subscribers {
            self.send_to(session, message.clone());
        }
    }

    /// Sends one message to one session; a full or closed channel drops the
    /// subscriber's entire stream (it must resubscribe) rather than block.
    pub fn send_to(&mut self, session: SessionId, message: ServerMessage) {
        let Some(outbox) = self.outboxes.get(&session) else {
            return;
        };
        match outbox.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(%session, "outbox full; dropping subscriber stream");
                self.unsubscribe_all(session);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.unregister_session(session);
            }
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Periodic upkeep: prune dead subscribers, unload over-cap chunks by
    /// staleness, and delete long-cold empty metadata.
    pub fn maintenance(&mut self, live_sessions: &HashSet<SessionId>) {
        for chunk in self.chunks.values_mut() {
            chunk.subscribers.retain(|s| live_sessions.contains(s));
        }
        self.outboxes.retain(|s, _| live_sessions.contains(s));

        let loaded: usize = self.chunks.values().filter(|c| c.loaded).count();
        if loaded > self.config.max_loaded {
            let batch = loaded - self.config.max_loaded + 100;
            let mut candidates: Vec<(Instant, ChunkKey)> = self
                .chunks
                .values()
                .filter(|c| c.loaded)
                .map(|c| (c.last_accessed, c.key.clone()))
                .collect();
            candidates.sort_by_key(|(at, _)| *at);
            for (_, key) in candidates.into_iter().take(batch) {
                self.unload(&key);
            }
            tracing::debug!(unloaded = batch, "chunk load cap enforced");
        }

        if self.chunks.len() > self.config.max_retained {
            let cutoff = self.config.unload_delay * 2;
            let before = self.chunks.len();
            self.chunks.retain(|_, c| {
                c.loaded
                    || !c.entities.is_empty()
                    || !c.subscribers.is_empty()
                    || c.last_accessed.elapsed() < cutoff
            });
            let dropped = before - self.chunks.len();
            if dropped > 0 {
                tracing::debug!(dropped, "cold chunk metadata deleted");
            }
        }
    }

    /// Number of loaded chunks.
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.chunks.values().filter(|c| c.loaded).count()
    }

    /// Number of retained chunk entries.
    #[must_use]
    pub fn retained_count(&self) -> usize {
        self.chunks.len()
    }

    /// Current version of a chunk, when retained.
    #[must_use]
    pub fn version_of(&self, key: &ChunkKey) -> Option<u64> {
        self.chunks.get(key).map(|c| c.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, Receiver};
    use meridian_shared::contract::{Contract, Identity};
    use meridian_shared::Vec3;

    fn manager() -> ChunkManager {
        ChunkManager::new(ChunkConfig::default())
    }

    fn store_with_entity(id: &str) -> (EntityStore, EntityId) {
        let mut store = EntityStore::new();
        let entity = EntityId::new(id);
        store
            .create(
                entity.clone(),
                vec![Contract::Identity(Identity {
                    id: None,
                    name: id.to_owned(),
                    description: None,
                })],
            )
            .unwrap();
        (store, entity)
    }

    fn subscribed_session(
        manager: &mut ChunkManager,
        store: &EntityStore,
        id: u64,
        key: &ChunkKey,
    ) -> Receiver<ServerMessage> {
        let (tx, rx) = bounded(64);
        let session = SessionId(id);
        manager.register_session(session, tx);
        manager.subscribe(store, session, key);
        rx
    }

    #[test]
    fn test_version_starts_at_one_and_increases() {
        let mut manager = manager();
        let (store, entity) = store_with_entity("e");
        let key = ChunkKey::new("default", 0, 0, 0);

        assert_eq!(manager.get_or_create(&key).version, 1);
        manager.add_entity(&store, &entity, &key);
        assert_eq!(manager.version_of(&key), Some(2));
        manager.note_entity_update(&store, &entity, &key);
        assert_eq!(manager.version_of(&key), Some(3));
        manager.remove_entity(&entity, &key);
        assert_eq!(manager.version_of(&key), Some(4));
    }

    #[test]
    fn test_subscriber_receives_snapshot_then_deltas() {
        let mut manager = manager();
        let (store, entity) = store_with_entity("e");
        let key = ChunkKey::new("default", 0, 0, 0);

        let rx = subscribed_session(&mut manager, &store, 1, &key);

        let ServerMessage::ChunkSnapshot { version, entities, .. } = rx.recv().unwrap() else {
            panic!("expected snapshot first");
        };
        assert_eq!(version, 1);
        assert!(entities.is_empty());

        manager.add_entity(&store, &entity, &key);
        let ServerMessage::ChunkDelta { delta, version, .. } = rx.recv().unwrap() else {
            panic!("expected delta");
        };
        assert_eq!(version, 2);
        assert!(matches!(delta, ChunkDelta::EntityAdd { .. }));
    }

    #[test]
    fn test_wire_versions_strictly_increase() {
        let mut manager = manager();
        let (store, entity) = store_with_entity("e");
        let key = ChunkKey::new("default", 0, 0, 0);
        let rx = subscribed_session(&mut manager, &store, 1, &key);

        manager.add_entity(&store, &entity, &key);
        for _ in 0..5 {
            manager.note_entity_update(&store, &entity, &key);
        }
        manager.remove_entity(&entity, &key);

        let mut last = 0;
        while let Ok(message) = rx.try_recv() {
            let version = match message {
                ServerMessage::ChunkSnapshot { version, .. }
                | ServerMessage::ChunkDelta { version, .. } => version,
                other => panic!("unexpected message {other:?}"),
            };
            assert!(version > last, "{version} not > {last}");
            last = version;
        }
    }

    #[test]
    fn test_move_entity_between_chunks() {
        let mut manager = manager();
        let (store, entity) = store_with_entity("e");
        let from = ChunkKey::new("default", 0, 0, 0);
        let to = ChunkKey::new("default", 1, 0, 0);

        manager.add_entity(&store, &entity, &from);
        manager.move_entity(&store, &entity, &from, &to);

        assert!(manager.entities_in(&from).is_empty());
        assert_eq!(manager.entities_in(&to), vec![entity]);
    }

    #[test]
    fn test_slow_subscriber_is_dropped_not_blocked() {
        let mut manager = manager();
        let (store, entity) = store_with_entity("e");
        let key = ChunkKey::new("default", 0, 0, 0);

        let (tx, _rx) = bounded(1);
        let session = SessionId(9);
        manager.register_session(session, tx);
        manager.subscribe(&store, session, &key); // snapshot fills the channel

        manager.add_entity(&store, &entity, &key); // overflow: stream dropped

        assert!(manager
            .get(&key)
            .is_some_and(|c| !c.subscribers.contains(&session)));
    }

    #[test]
    fn test_generation_is_idempotent() {
        let mut manager = manager();
        let mut store = EntityStore::new();
        let mut layers = LayerRegistry::new();
        let key = ChunkKey::new("default", 0, 0, 0);

        manager.load(&key, &mut store, &mut layers);
        let first = manager.entities_in(&key);
        assert_eq!(first.len(), 1);

        manager.unload(&key);
        manager.load(&key, &mut store, &mut layers);
        assert_eq!(manager.entities_in(&key), first);
        assert_eq!(store.len(), 1);

        // Center voxel is solid in the occupancy grid.
        let chunk = manager.get(&key).unwrap();
        assert!(chunk.occupancy.as_ref().unwrap().is_solid(8, 8, 8));
    }

    #[test]
    fn test_off_lattice_chunks_generate_nothing() {
        let mut manager = manager();
        let mut store = EntityStore::new();
        let mut layers = LayerRegistry::new();
        let key = ChunkKey::new("default", 1, 0, 1);

        manager.load(&key, &mut store, &mut layers);
        assert!(manager.entities_in(&key).is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_maintenance_prunes_dead_sessions() {
        let mut manager = manager();
        let (store, _) = store_with_entity("e");
        let key = ChunkKey::new("default", 0, 0, 0);
        let _rx = subscribed_session(&mut manager, &store, 7, &key);

        manager.maintenance(&HashSet::new());
        assert!(manager
            .get(&key)
            .is_some_and(|c| c.subscribers.is_empty()));
    }

    #[test]
    fn test_loaded_cap_unloads_stalest() {
        let mut manager = ChunkManager::new(ChunkConfig {
            max_loaded: 2,
            max_retained: 20000,
            unload_delay: Duration::from_secs(60),
        });
        let mut store = EntityStore::new();
        let mut layers = LayerRegistry::new();

        for cx in 0..5 {
            manager.load(&ChunkKey::new("default", cx * 4 + 1, 1, 0), &mut store, &mut layers);
        }
        assert_eq!(manager.loaded_count(), 5);

        manager.maintenance(&HashSet::new());
        // 5 loaded, cap 2: the batch formula unloads min(5, 5 - 2 + 100).
        assert_eq!(manager.loaded_count(), 0);
        assert_eq!(manager.retained_count(), 5);
    }
}
