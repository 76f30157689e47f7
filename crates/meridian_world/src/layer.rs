//! # Layer Registry
//!
//! Named worlds, each an independent coordinate space with its own chunk
//! size, gravity and spawn point. The registry also owns the entity->layer
//! side index: layer membership is not a contract on the entity, it is
//! bookkeeping here, so removing a layer or an entity cannot leave a stale
//! back-reference inside the store.

use crate::error::{WorldError, WorldResult};
use meridian_shared::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_GRAVITY, DEFAULT_LAYER};
use meridian_shared::{Aabb, EntityId, LayerId, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Configuration of one layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    /// Layer id.
    pub id: LayerId,
    /// Display name.
    pub name: String,
    /// Horizontal chunk size in world units; must be positive.
    pub chunk_size: f64,
    /// Gravity acceleration (negative = down).
    pub gravity: f64,
    /// Where players appear.
    pub spawn_point: Vec3,
    /// Optional hard bounds of the layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Aabb>,
    /// Free-form extra properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Layer {
    /// The seeded default layer.
    #[must_use]
    pub fn default_layer() -> Self {
        Self {
            id: LayerId::new(DEFAULT_LAYER),
            name: "Default".to_owned(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            gravity: DEFAULT_GRAVITY,
            spawn_point: Vec3::new(0.0, 10.0, 0.0),
            bounds: None,
            properties: BTreeMap::new(),
        }
    }
}

/// Registry of layers plus the entity->layer side index.
pub struct LayerRegistry {
    layers: HashMap<LayerId, Layer>,
    entity_layer: HashMap<EntityId, LayerId>,
}

impl LayerRegistry {
    /// Creates the registry with the default layer seeded.
    #[must_use]
    pub fn new() -> Self {
        let mut layers = HashMap::new();
        let default = Layer::default_layer();
        layers.insert(default.id.clone(), default);
        Self {
            layers,
            entity_layer: HashMap::new(),
        }
    }

    /// Registers a layer.
    ///
    /// # Errors
    ///
    /// `InvalidChunkSize` or `DuplicateLayer`.
    pub fn create(&mut self, layer: Layer) -> WorldResult<()> {
        if !(layer.chunk_size > 0.0) {
            return Err(WorldError::InvalidChunkSize(layer.chunk_size));
        }
        if self.layers.contains_key(&layer.id) {
            return Err(WorldError::DuplicateLayer(layer.id));
        }
        tracing::info!(layer = %layer.id, chunk_size = layer.chunk_size, "layer created");
        self.layers.insert(layer.id.clone(), layer);
        Ok(())
    }

    /// Looks up a layer.
    #[must_use]
    pub fn get(&self, id: &LayerId) -> Option<&Layer> {
        self.layers.get(id)
    }

    /// The always-present default layer.
    #[must_use]
    pub fn default_layer(&self) -> &Layer {
        self.layers
            .get(&LayerId::new(DEFAULT_LAYER))
            .expect("default layer is seeded at construction")
    }

    /// All layers, in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values()
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Never true: the default layer always exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Removes a layer and forgets every entity mapping into it.
    ///
    /// # Errors
    ///
    /// `DefaultLayerImmutable` or `UnknownLayer`.
    pub fn remove(&mut self, id: &LayerId) -> WorldResult<Layer> {
        if id.as_str() == DEFAULT_LAYER {
            return Err(WorldError::DefaultLayerImmutable);
        }
        let layer = self
            .layers
            .remove(id)
            .ok_or_else(|| WorldError::UnknownLayer(id.clone()))?;
        self.entity_layer.retain(|_, l| l != id);
        tracing::info!(layer = %id, "layer removed");
        Ok(layer)
    }

    /// Chunk size of a layer, when it exists.
    #[must_use]
    pub fn chunk_size_of(&self, id: &LayerId) -> Option<f64> {
        self.layers.get(id).map(|l| l.chunk_size)
    }

    // =========================================================================
    // Entity->layer side index
    // =========================================================================

    /// Records which layer an entity lives in.
    pub fn bind_entity(&mut self, entity: EntityId, layer: LayerId) {
        self.entity_layer.insert(entity, layer);
    }

    /// Forgets an entity's layer binding. Returns the layer it was in.
    pub fn unbind_entity(&mut self, entity: &EntityId) -> Option<LayerId> {
        self.entity_layer.remove(entity)
    }

    /// The layer an entity lives in, when bound.
    #[must_use]
    pub fn layer_of(&self, entity: &EntityId) -> Option<&LayerId> {
        self.entity_layer.get(entity)
    }

    /// Every entity bound to a layer.
    #[must_use]
    pub fn entities_in(&self, layer: &LayerId) -> Vec<EntityId> {
        self.entity_layer
            .iter()
            .filter(|(_, l)| *l == layer)
            .map(|(e, _)| e.clone())
            .collect()
    }

    /// Count of entities per layer, for stats.
    #[must_use]
    pub fn entity_counts(&self) -> BTreeMap<LayerId, usize> {
        let mut counts = BTreeMap::new();
        for layer in self.entity_layer.values() {
            *counts.entry(layer.clone()).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for LayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overworld() -> Layer {
        Layer {
            id: LayerId::new("overworld"),
            name: "Overworld".to_owned(),
            chunk_size: 16.0,
            gravity: -9.81,
            spawn_point: Vec3::ZERO,
            bounds: None,
            properties: BTreeMap::new(),
        }
    }

    #[test]
    fn test_default_layer_is_seeded() {
        let registry = LayerRegistry::new();
        let default = registry.default_layer();
        assert_eq!(default.chunk_size, 32.0);
        assert_eq!(default.gravity, -9.81);
        assert_eq!(default.spawn_point, Vec3::new(0.0, 10.0, 0.0));
    }

    #[test]
    fn test_default_layer_cannot_be_removed() {
        let mut registry = LayerRegistry::new();
        assert_eq!(
            registry.remove(&LayerId::new("default")),
            Err(WorldError::DefaultLayerImmutable)
        );
    }

    #[test]
    fn test_create_validates_chunk_size() {
        let mut registry = LayerRegistry::new();
        let mut bad = overworld();
        bad.chunk_size = 0.0;
        assert!(matches!(
            registry.create(bad),
            Err(WorldError::InvalidChunkSize(_))
        ));
    }

    #[test]
    fn test_duplicate_layer() {
        let mut registry = LayerRegistry::new();
        registry.create(overworld()).unwrap();
        assert!(matches!(
            registry.create(overworld()),
            Err(WorldError::DuplicateLayer(_))
        ));
    }

    #[test]
    fn test_entity_side_index() {
        let mut registry = LayerRegistry::new();
        registry.create(overworld()).unwrap();

        let e1 = EntityId::new("e1");
        let e2 = EntityId::new("e2");
        registry.bind_entity(e1.clone(), LayerId::new("overworld"));
        registry.bind_entity(e2.clone(), LayerId::new("default"));

        assert_eq!(registry.layer_of(&e1), Some(&LayerId::new("overworld")));
        assert_eq!(
            registry.entities_in(&LayerId::new("overworld")),
            vec![e1.clone()]
        );

        // Removing a layer drops its bindings.
        registry.remove(&LayerId::new("overworld")).unwrap();
        assert_eq!(registry.layer_of(&e1), None);
        assert_eq!(registry.layer_of(&e2), Some(&LayerId::new("default")));
    }
}
