//! # Archetype Catalog & Spawner
//!
//! Archetypes are templates cloned into live entities. Cloning rewrites the
//! identity id and the mobility position, then shallow-merges any per-kind
//! overrides into the cloned record of that kind.

use crate::error::{StoreError, StoreResult};
use crate::store::EntityStore;
use meridian_shared::contract::{
    CommandAccess, Contract, ContractKind, ContractLimit, Durability, Identity, Inventory,
    Mobility, MovementRules, Shape, Visual,
};
use meridian_shared::{EntityId, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

/// Commands every freshly spawned player may issue.
pub const BASE_PLAYER_COMMANDS: [&str; 9] = [
    "login",
    "logout",
    "set_view",
    "subscribe_chunks",
    "unsubscribe_chunks",
    "move",
    "move_dir",
    "add_contract",
    "remove_contract",
];

/// The reserved archetype id that routes through the player factory.
pub const PLAYER_ARCHETYPE: &str = "player";

/// A spawnable template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Archetype {
    /// Catalog key.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-form classification tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// The template contract list.
    pub contracts: Vec<Contract>,
}

/// Per-kind shallow-merge overrides applied at spawn time.
pub type SpawnOverrides = BTreeMap<ContractKind, serde_json::Value>;

/// The archetype catalog and spawner.
#[derive(Default)]
pub struct ArchetypeCatalog {
    archetypes: HashMap<String, Archetype>,
}

impl ArchetypeCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a template by id; redefining an id overwrites it.
    pub fn define(&mut self, archetype: Archetype) {
        tracing::debug!(archetype = %archetype.id, "archetype defined");
        self.archetypes.insert(archetype.id.clone(), archetype);
    }

    /// Looks up a template.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Archetype> {
        self.archetypes.get(id)
    }

    /// All templates, in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.values()
    }

    /// Number of templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// Clones a template into a fresh contract list for a new entity id at
    /// a position, without touching any store.
    ///
    /// # Errors
    ///
    /// `UnknownArchetype` when the id names no template.
    pub fn instantiate(
        &self,
        archetype_id: &str,
        pos: Vec3,
        overrides: &SpawnOverrides,
    ) -> StoreResult<(EntityId, Vec<Contract>)> {
        let new_id = fresh_entity_id(archetype_id);

        if archetype_id == PLAYER_ARCHETYPE {
            return Ok((new_id.clone(), player_contracts(&new_id, None, pos)));
        }

        let archetype = self
            .archetypes
            .get(archetype_id)
            .ok_or_else(|| StoreError::UnknownArchetype(archetype_id.to_owned()))?;

        let mut contracts = Vec::with_capacity(archetype.contracts.len());
        for template in &archetype.contracts {
            let mut record = template.clone();
            match &mut record {
                Contract::Identity(identity) => identity.id = Some(new_id.clone()),
                Contract::Mobility(mobility) => mobility.position = pos,
                _ => {}
            }
            if let Some(patch) = overrides.get(&record.kind()) {
                record = shallow_merge(&record, patch);
            }
            contracts.push(record);
        }
        Ok((new_id, contracts))
    }

    /// Clones a template and creates the entity in the store.
    ///
    /// # Errors
    ///
    /// `UnknownArchetype`, plus anything [`EntityStore::create`] returns.
    pub fn spawn_into(
        &self,
        store: &mut EntityStore,
        archetype_id: &str,
        pos: Vec3,
        overrides: &SpawnOverrides,
    ) -> StoreResult<EntityId> {
        let (id, contracts) = self.instantiate(archetype_id, pos, overrides)?;
        store.create(id.clone(), contracts)?;
        tracing::debug!(entity = %id, archetype = archetype_id, "spawned");
        Ok(id)
    }
}

/// Generates a fresh spawn id: `<archetype>-<ts>-<rand>`.
#[must_use]
pub fn fresh_entity_id(archetype_id: &str) -> EntityId {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let tag: u32 = rand::random::<u32>() & 0xFFFFFF;
    EntityId::new(format!("{archetype_id}-{ts}-{tag:06x}"))
}

/// Shallow-merges a JSON-object patch into a cloned record.
///
/// Only top-level keys are replaced; the `kind` tag is pinned, and a patch
/// that no longer deserializes as the same kind leaves the record unchanged.
fn shallow_merge(record: &Contract, patch: &serde_json::Value) -> Contract {
    let Ok(serde_json::Value::Object(mut base)) = serde_json::to_value(record) else {
        return record.clone();
    };
    let serde_json::Value::Object(patch) = patch else {
        return record.clone();
    };
    for (key, value) in patch {
        if key == "kind" {
            continue;
        }
        base.insert(key.clone(), value.clone());
    }
    serde_json::from_value(serde_json::Value::Object(base)).unwrap_or_else(|_| record.clone())
}

/// The full standard player contract set.
///
/// Players are not cataloged: every player entity carries the same base
/// loadout, with the entrance/portable cardinality widened so that gameplay
/// systems may stack a few of each.
#[must_use]
pub fn player_contracts(id: &EntityId, name: Option<&str>, pos: Vec3) -> Vec<Contract> {
    let mut limits = BTreeMap::new();
    limits.insert(ContractKind::Entrance, 5);
    limits.insert(ContractKind::Portable, 3);

    vec![
        Contract::Identity(Identity {
            id: Some(id.clone()),
            name: name.unwrap_or("Player").to_owned(),
            description: None,
        }),
        Contract::Mobility(Mobility {
            position: pos,
            velocity: Some(Vec3::ZERO),
            max_speed: None,
            acceleration: None,
        }),
        Contract::Shape(Shape::centered_box(Vec3::new(0.3, 0.9, 0.3))),
        Contract::Visual(Visual::default()),
        Contract::Inventory(Inventory {
            items: Vec::new(),
            capacity: Some(10),
        }),
        Contract::Durability(Durability {
            health: 100.0,
            max_health: 100.0,
            armor: None,
        }),
        Contract::MovementRules(MovementRules {
            step_distance: 1.0,
            allow_diagonal: true,
            diagonal_normalized: true,
        }),
        Contract::CommandAccess(CommandAccess {
            commands: BASE_PLAYER_COMMANDS.iter().map(|s| (*s).to_owned()).collect(),
        }),
        Contract::ContractLimit(ContractLimit { limits }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_shared::contract::Solidity;

    fn tree_archetype() -> Archetype {
        Archetype {
            id: "tree".to_owned(),
            name: "Tree".to_owned(),
            tags: vec!["flora".to_owned()],
            contracts: vec![
                Contract::Identity(Identity {
                    id: None,
                    name: "Tree".to_owned(),
                    description: None,
                }),
                Contract::Mobility(Mobility::default()),
                Contract::Solidity(Solidity {
                    solid: true,
                    collision_groups: None,
                }),
            ],
        }
    }

    #[test]
    fn test_define_overwrites() {
        let mut catalog = ArchetypeCatalog::new();
        catalog.define(tree_archetype());
        let mut replacement = tree_archetype();
        replacement.name = "Oak".to_owned();
        catalog.define(replacement);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("tree").unwrap().name, "Oak");
    }

    #[test]
    fn test_instantiate_rewrites_identity_and_position() {
        let mut catalog = ArchetypeCatalog::new();
        catalog.define(tree_archetype());

        let pos = Vec3::new(4.0, 0.0, -2.0);
        let (id, contracts) = catalog
            .instantiate("tree", pos, &SpawnOverrides::new())
            .unwrap();
        assert!(id.as_str().starts_with("tree-"));

        let identity = contracts
            .iter()
            .find_map(|c| match c {
                Contract::Identity(i) => Some(i),
                _ => None,
            })
            .unwrap();
        assert_eq!(identity.id.as_ref(), Some(&id));

        let mobility = contracts
            .iter()
            .find_map(|c| c.as_mobility())
            .unwrap();
        assert_eq!(mobility.position, pos);
    }

    #[test]
    fn test_override_shallow_merge() {
        let mut catalog = ArchetypeCatalog::new();
        catalog.define(tree_archetype());

        let mut overrides = SpawnOverrides::new();
        overrides.insert(
            ContractKind::Identity,
            serde_json::json!({"name": "Elder Tree", "kind": "solidity"}),
        );
        let (id, contracts) = catalog
            .instantiate("tree", Vec3::ZERO, &overrides)
            .unwrap();

        let identity = contracts
            .iter()
            .find_map(|c| match c {
                Contract::Identity(i) => Some(i),
                _ => None,
            })
            .unwrap();
        // The name merged in; the kind tag and spawn-time id rewrite held.
        assert_eq!(identity.name, "Elder Tree");
        assert_eq!(identity.id.as_ref(), Some(&id));
    }

    #[test]
    fn test_unknown_archetype() {
        let catalog = ArchetypeCatalog::new();
        let err = catalog
            .instantiate("ghost", Vec3::ZERO, &SpawnOverrides::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownArchetype(_)));
    }

    #[test]
    fn test_player_factory_contract_set() {
        let id = EntityId::new("player-1-abc");
        let contracts = player_contracts(&id, Some("Ada"), Vec3::new(0.0, 10.0, 0.0));

        let kinds: Vec<ContractKind> = contracts.iter().map(Contract::kind).collect();
        for expected in [
            ContractKind::Identity,
            ContractKind::Mobility,
            ContractKind::Shape,
            ContractKind::Visual,
            ContractKind::Inventory,
            ContractKind::Durability,
            ContractKind::MovementRules,
            ContractKind::CommandAccess,
            ContractKind::ContractLimit,
        ] {
            assert!(kinds.contains(&expected), "missing {expected}");
        }

        let shape = contracts.iter().find_map(Contract::as_shape).unwrap();
        let size = shape.bounds.max - shape.bounds.min;
        assert!((size.x - 0.6).abs() < 1e-9);
        assert!((size.y - 1.8).abs() < 1e-9);
        assert!((size.z - 0.6).abs() < 1e-9);

        let Contract::ContractLimit(limit) = contracts
            .iter()
            .find(|c| c.kind() == ContractKind::ContractLimit)
            .unwrap()
        else {
            panic!("wrong kind");
        };
        assert_eq!(limit.limits.get(&ContractKind::Entrance), Some(&5));
        assert_eq!(limit.limits.get(&ContractKind::Portable), Some(&3));
    }

    #[test]
    fn test_spawn_into_store() {
        let mut catalog = ArchetypeCatalog::new();
        catalog.define(tree_archetype());
        let mut store = EntityStore::new();

        let id = catalog
            .spawn_into(&mut store, "tree", Vec3::ZERO, &SpawnOverrides::new())
            .unwrap();
        assert!(store.contains(&id));
        assert!(store.get(&id, ContractKind::Solidity).is_some());
    }
}
