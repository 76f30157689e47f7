//! # Reference Chunk Generation
//!
//! Ground-level chunks on a sparse 4x4 lattice each receive one solid
//! marker entity at the chunk center, with a matching voxel in the static
//! occupancy grid. Generation is keyed on the chunk, so re-loading a chunk
//! never duplicates its entity.

use crate::spatial::chunk_center;
use meridian_shared::contract::{Contract, Identity, Mobility, Shape, Solidity, Visual};
use meridian_shared::{ChunkKey, EntityId, Vec3};

/// Whether the reference policy generates anything for this chunk.
#[must_use]
pub fn should_generate(key: &ChunkKey) -> bool {
    key.cy == 0 && key.cx.rem_euclid(4) == 0 && key.cz.rem_euclid(4) == 0
}

/// Deterministic id of the generated entity for a chunk.
#[must_use]
pub fn terrain_entity_id(key: &ChunkKey) -> EntityId {
    EntityId::new(format!(
        "terrain-{}-{}-{}-{}",
        key.layer_id, key.cx, key.cy, key.cz
    ))
}

/// The generated entity: center position plus its contract set.
#[must_use]
pub fn terrain_entity(key: &ChunkKey, chunk_size: f64) -> (Vec3, Vec<Contract>) {
    let center = chunk_center(key.cx, key.cy, key.cz, chunk_size);
    let id = terrain_entity_id(key);
    let contracts = vec![
        Contract::Identity(Identity {
            id: Some(id),
            name: "Terrain Block".to_owned(),
            description: None,
        }),
        Contract::Mobility(Mobility {
            position: center,
            velocity: None,
            max_speed: None,
            acceleration: None,
        }),
        Contract::Shape(Shape::centered_box(Vec3::new(0.5, 0.5, 0.5))),
        Contract::Visual(Visual {
            color: Some("#6b7f5a".to_owned()),
            texture: None,
            material: Some("stone".to_owned()),
            visible: true,
        }),
        Contract::Solidity(Solidity {
            solid: true,
            collision_groups: None,
        }),
    ];
    (center, contracts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_shared::contract::ContractKind;

    #[test]
    fn test_lattice_selection() {
        assert!(should_generate(&ChunkKey::new("default", 0, 0, 0)));
        assert!(should_generate(&ChunkKey::new("default", 4, 0, -4)));
        assert!(should_generate(&ChunkKey::new("default", -8, 0, 0)));
        assert!(!should_generate(&ChunkKey::new("default", 1, 0, 0)));
        assert!(!should_generate(&ChunkKey::new("default", 0, 1, 0)));
        assert!(!should_generate(&ChunkKey::new("default", 0, 0, 2)));
    }

    #[test]
    fn test_terrain_entity_is_deterministic() {
        let key = ChunkKey::new("default", 4, 0, 8);
        assert_eq!(terrain_entity_id(&key), terrain_entity_id(&key));

        let (center, contracts) = terrain_entity(&key, 32.0);
        assert_eq!(center, Vec3::new(4.0 * 32.0 + 16.0, 128.0, 8.0 * 32.0 + 16.0));

        let kinds: Vec<ContractKind> = contracts.iter().map(Contract::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ContractKind::Identity,
                ContractKind::Mobility,
                ContractKind::Shape,
                ContractKind::Visual,
                ContractKind::Solidity,
            ]
        );
        assert!(contracts
            .iter()
            .find_map(Contract::as_solidity)
            .unwrap()
            .solid);
    }
}
