//! # Persistence
//!
//! A versioned JSON document capturing the full entity store, layers and
//! archetypes. Save and load both run as posted operations on the
//! simulation executor; only the file I/O itself happens off-thread.

use crate::simulation::Simulation;
use meridian_core::Archetype;
use meridian_shared::contract::Contract;
use meridian_shared::{EntityId, LayerId};
use meridian_world::spatial::chunk_key_at;
use meridian_world::Layer;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Current document format version.
pub const SAVE_VERSION: u32 = 1;

/// Persistence failures.
#[derive(Error, Debug)]
pub enum PersistError {
    /// File I/O failed.
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// The document did not (de)serialize.
    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
    /// The document's version is not supported.
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
}

/// One persisted entity.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedEntity {
    /// Entity id, preserved across the round trip.
    pub id: EntityId,
    /// Layer the entity was bound to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<LayerId>,
    /// The full contract list.
    pub contracts: Vec<Contract>,
}

/// Counters that survive restarts.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMetadata {
    /// Players spawned over the server's lifetime.
    pub player_counter: u64,
}

/// The on-disk snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveDocument {
    /// Format version.
    pub version: u32,
    /// Milliseconds since the epoch at save time.
    pub timestamp: u128,
    /// All layers, the default included.
    pub layers: Vec<Layer>,
    /// The archetype catalog.
    pub archetypes: Vec<Archetype>,
    /// Every entity with its contracts.
    pub entities: Vec<SavedEntity>,
    /// Restart-surviving counters.
    pub metadata: SaveMetadata,
}

/// Captures the simulation into a document.
#[must_use]
pub fn save(sim: &Simulation) -> SaveDocument {
    let mut entities: Vec<SavedEntity> = sim
        .store
        .ids()
        .map(|id| SavedEntity {
            id: id.clone(),
            layer_id: sim.layers.layer_of(id).cloned(),
            contracts: sim
                .store
                .contracts(id)
                .map(<[_]>::to_vec)
                .unwrap_or_default(),
        })
        .collect();
    entities.sort_by(|a, b| a.id.cmp(&b.id));

    let mut layers: Vec<Layer> = sim.layers.iter().cloned().collect();
    layers.sort_by(|a, b| a.id.cmp(&b.id));

    let mut archetypes: Vec<Archetype> = sim.archetypes.iter().cloned().collect();
    archetypes.sort_by(|a, b| a.id.cmp(&b.id));

    SaveDocument {
        version: SAVE_VERSION,
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0),
        layers,
        archetypes,
        entities,
        metadata: SaveMetadata {
            player_counter: sim.player_counter,
        },
    }
}

/// Restores a document into a simulation.
///
/// Layers land first (the seeded default is kept as-is), then archetypes,
/// then entities with their layer bindings and chunk memberships rebuilt
/// from their positions.
///
/// # Errors
///
/// `UnsupportedVersion`, or any store/world rejection encountered while
/// rebuilding (the document is replayed through the validating paths, not
/// trusted blindly).
pub fn load(sim: &mut Simulation, document: &SaveDocument) -> Result<(), PersistError> {
    if document.version != SAVE_VERSION {
        return Err(PersistError::UnsupportedVersion(document.version));
    }

    for layer in &document.layers {
        if sim.layers.get(&layer.id).is_none() {
            if let Err(err) = sim.layers.create(layer.clone()) {
                tracing::warn!(layer = %layer.id, %err, "layer skipped on load");
            }
        }
    }

    for archetype in &document.archetypes {
        sim.archetypes.define(archetype.clone());
    }

    for saved in &document.entities {
        if sim.store.contains(&saved.id) {
            tracing::debug!(entity = %saved.id, "already present, skipped on load");
            continue;
        }
        match sim
            .store
            .create(saved.id.clone(), saved.contracts.clone())
        {
            Ok(()) => {
                if let Some(layer_id) = &saved.layer_id {
                    sim.layers.bind_entity(saved.id.clone(), layer_id.clone());
                    let position = saved
                        .contracts
                        .iter()
                        .find_map(Contract::as_mobility)
                        .map(|m| m.position);
                    if let Some(position) = position {
                        let chunk_size = sim
                            .layers
                            .chunk_size_of(layer_id)
                            .unwrap_or(meridian_shared::constants::DEFAULT_CHUNK_SIZE);
                        let key = chunk_key_at(layer_id, position, chunk_size);
                        sim.chunks.add_entity(&sim.store, &saved.id, &key);
                    }
                }
            }
            Err(err) => {
                tracing::warn!(entity = %saved.id, %err, "entity skipped on load");
            }
        }
    }

    sim.player_counter = sim.player_counter.max(document.metadata.player_counter);
    tracing::info!(
        entities = document.entities.len(),
        layers = document.layers.len(),
        "snapshot loaded"
    );
    Ok(())
}

/// Serializes a document to a file.
///
/// # Errors
///
/// I/O or encoding failure.
pub fn write_to_file(document: &SaveDocument, path: &Path) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(document)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Reads a document from a file.
///
/// # Errors
///
/// I/O or decoding failure.
pub fn read_from_file(path: &Path) -> Result<SaveDocument, PersistError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::events::DevEventHub;
    use meridian_core::SpawnOverrides;
    use meridian_shared::contract::{ContractKind, Identity, Mobility};
    use meridian_shared::Vec3;
    use std::sync::Arc;

    fn simulation() -> Simulation {
        Simulation::new(&RuntimeConfig::default(), Arc::new(DevEventHub::new()))
    }

    fn populated() -> Simulation {
        let mut sim = simulation();
        sim.archetypes.define(Archetype {
            id: "lamp".to_owned(),
            name: "Lamp".to_owned(),
            tags: vec!["prop".to_owned()],
            contracts: vec![
                Contract::Identity(Identity {
                    id: None,
                    name: "Lamp".to_owned(),
                    description: None,
                }),
                Contract::Mobility(Mobility::default()),
            ],
        });
        sim.create_layer(Layer {
            id: LayerId::new("cavern"),
            name: "Cavern".to_owned(),
            chunk_size: 16.0,
            gravity: -4.0,
            spawn_point: Vec3::new(0.0, 2.0, 0.0),
            bounds: None,
            properties: Default::default(),
        })
        .unwrap();
        sim.spawn(
            "lamp",
            &LayerId::new("cavern"),
            Vec3::new(20.0, 2.0, 20.0),
            &SpawnOverrides::new(),
        )
        .unwrap();
        let _ = sim.spawn_player(None, Some("Ada")).unwrap();
        sim
    }

    #[test]
    fn test_save_load_round_trip() {
        let source = populated();
        let document = save(&source);
        assert_eq!(document.version, SAVE_VERSION);
        assert_eq!(document.entities.len(), 2);
        assert_eq!(document.metadata.player_counter, 1);

        let mut restored = simulation();
        load(&mut restored, &document).unwrap();

        // Entity ids are preserved.
        let mut original_ids: Vec<EntityId> = source.store.ids().cloned().collect();
        let mut restored_ids: Vec<EntityId> = restored.store.ids().cloned().collect();
        original_ids.sort();
        restored_ids.sort();
        assert_eq!(original_ids, restored_ids);

        // Layers, archetypes and the player counter survive.
        assert!(restored.layers.get(&LayerId::new("cavern")).is_some());
        assert!(restored.archetypes.get("lamp").is_some());
        assert_eq!(restored.player_counter, 1);

        // Chunk membership is rebuilt from positions.
        for id in restored_ids {
            if restored
                .store
                .get(&id, ContractKind::Mobility)
                .is_some()
            {
                let key = restored.entity_chunk_key(&id).unwrap();
                assert!(restored.chunks.entities_in(&key).contains(&id));
            }
        }
    }

    #[test]
    fn test_file_round_trip() {
        let source = populated();
        let document = save(&source);
        let path = std::env::temp_dir().join("meridian_save_test.json");

        write_to_file(&document, &path).unwrap();
        let read_back = read_from_file(&path).unwrap();
        assert_eq!(read_back.version, document.version);
        assert_eq!(read_back.entities.len(), document.entities.len());
        assert_eq!(
            read_back.metadata.player_counter,
            document.metadata.player_counter
        );
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let mut document = save(&populated());
        document.version = 99;
        let mut sim = simulation();
        assert!(matches!(
            load(&mut sim, &document),
            Err(PersistError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_loaded_contracts_still_validate() {
        // validate(serialize(c)) holds for every accepted contract.
        let document = save(&populated());
        let mut sim = simulation();
        load(&mut sim, &document).unwrap();
        let registry = meridian_core::SchemaRegistry::new();
        for saved in &document.entities {
            for contract in &saved.contracts {
                let json = serde_json::to_value(contract).unwrap();
                let back: Contract = serde_json::from_value(json).unwrap();
                assert!(registry.validate(&back).is_ok());
            }
        }
    }
}
