//! # Contracts
//!
//! A contract is a tagged record attached to an entity; it governs one facet
//! of the entity's behavior. The union is closed: the server dispatches on
//! the `kind` tag at validation time and at hook lookup.
//!
//! Contracts are wire-visible (they travel inside snapshots, deltas and
//! `add_contract` requests), so the canonical JSON shape lives here with the
//! rest of the protocol vocabulary. Validation rules live in
//! `meridian_core`, which is the only writer allowed to admit a contract
//! into a store.

use crate::chunk_key::LayerId;
use crate::id::EntityId;
use crate::math::{Aabb, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Discriminator for the closed set of contract kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    /// Stable name and description.
    Identity,
    /// Position, velocity, speed limits.
    Mobility,
    /// Collision bounds.
    Shape,
    /// Whether the entity blocks movement.
    Solidity,
    /// Presentation hints.
    Visual,
    /// Portal to another layer.
    Entrance,
    /// Can be picked up.
    Portable,
    /// Ordered list of carried entities.
    Inventory,
    /// Health and armor.
    Durability,
    /// Per-entity cardinality overrides.
    ContractLimit,
    /// Discrete-movement parameters.
    MovementRules,
    /// World-level environment settings.
    WorldConditions,
    /// Commands the world advertises.
    WorldCommands,
    /// Commands granted to this entity.
    CommandAccess,
}

impl ContractKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 14] = [
        Self::Identity,
        Self::Mobility,
        Self::Shape,
        Self::Solidity,
        Self::Visual,
        Self::Entrance,
        Self::Portable,
        Self::Inventory,
        Self::Durability,
        Self::ContractLimit,
        Self::MovementRules,
        Self::WorldConditions,
        Self::WorldCommands,
        Self::CommandAccess,
    ];

    /// The wire tag for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Mobility => "mobility",
            Self::Shape => "shape",
            Self::Solidity => "solidity",
            Self::Visual => "visual",
            Self::Entrance => "entrance",
            Self::Portable => "portable",
            Self::Inventory => "inventory",
            Self::Durability => "durability",
            Self::ContractLimit => "contract_limit",
            Self::MovementRules => "movement_rules",
            Self::WorldConditions => "world_conditions",
            Self::WorldCommands => "world_commands",
            Self::CommandAccess => "command_access",
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geometry tag of a shape. Only `Box` participates in collision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Geometry {
    /// Axis-aligned box (the collision geometry).
    #[default]
    Box,
    /// Sphere (presentation only).
    Sphere,
    /// Cylinder (presentation only).
    Cylinder,
    /// Arbitrary mesh (presentation only).
    Mesh,
}

/// Weather state of a layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weather {
    /// No precipitation.
    #[default]
    Clear,
    /// Rain.
    Rain,
    /// Storm.
    Storm,
    /// Snow.
    Snow,
    /// Fog.
    Fog,
}

/// Coarse time-of-day phase of a layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    /// Sunrise.
    Dawn,
    /// Daytime.
    #[default]
    Day,
    /// Sunset.
    Dusk,
    /// Nighttime.
    Night,
}

/// Stable name and description of an entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Mirror of the entity id; the spawner overwrites it at clone time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    /// Display name.
    pub name: String,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Position and motion state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mobility {
    /// World position.
    pub position: Vec3,
    /// Current velocity, if moving.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Vec3>,
    /// Maximum horizontal speed; must be positive when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_speed: Option<f64>,
    /// Acceleration; must be positive when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<f64>,
}

/// Collision bounds in entity-local coordinates.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shape {
    /// Local-space bounding box; `min <= max` component-wise.
    pub bounds: Aabb,
    /// Geometry tag; only `box` collides.
    #[serde(default)]
    pub geometry: Geometry,
}

impl Shape {
    /// Convenience constructor for a box centered on the entity origin.
    #[must_use]
    pub fn centered_box(half: Vec3) -> Self {
        Self {
            bounds: Aabb::new(-half, half),
            geometry: Geometry::Box,
        }
    }
}

/// Whether the entity blocks movement.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Solidity {
    /// Solid entities participate in collision.
    pub solid: bool,
    /// Optional collision-group names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision_groups: Option<Vec<String>>,
}

/// Presentation hints; never consulted by the simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visual {
    /// Color, as a client-interpreted string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Texture name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture: Option<String>,
    /// Material name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
    /// Whether the entity is rendered at all.
    #[serde(default = "default_true")]
    pub visible: bool,
}

impl Default for Visual {
    fn default() -> Self {
        Self {
            color: None,
            texture: None,
            material: None,
            visible: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Portal to a position in another layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entrance {
    /// Destination layer.
    pub target_layer: LayerId,
    /// Destination position within that layer.
    pub target_position: Vec3,
    /// Disabled entrances are inert.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Can be picked up and carried.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Portable {
    /// Whether pickup is currently allowed.
    pub can_pickup: bool,
    /// Non-negative weight.
    #[serde(default)]
    pub weight: f64,
}

/// Ordered list of carried entity ids.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    /// Carried entities, in pickup order.
    #[serde(default)]
    pub items: Vec<EntityId>,
    /// Optional slot cap; must be positive when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
}

/// Health pool with optional armor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Durability {
    /// Current health; `0 <= health <= max_health`.
    pub health: f64,
    /// Health ceiling; must be positive.
    pub max_health: f64,
    /// Non-negative armor rating; each point shaves 1% off incoming damage,
    /// capped at 75%.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub armor: Option<f64>,
}

impl Default for Durability {
    fn default() -> Self {
        Self {
            health: 1.0,
            max_health: 1.0,
            armor: None,
        }
    }
}

/// Per-entity cardinality overrides, keyed by contract kind.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractLimit {
    /// kind -> positive max count.
    #[serde(default)]
    pub limits: BTreeMap<ContractKind, u32>,
}

/// Parameters for discrete (`move_dir`) movement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementRules {
    /// Distance of one cardinal step; must be positive.
    pub step_distance: f64,
    /// Whether two-direction (diagonal) steps are allowed.
    #[serde(default)]
    pub allow_diagonal: bool,
    /// Whether diagonal steps are normalized to `step_distance` total length.
    #[serde(default)]
    pub diagonal_normalized: bool,
}

impl Default for MovementRules {
    fn default() -> Self {
        Self {
            step_distance: 1.0,
            allow_diagonal: true,
            diagonal_normalized: true,
        }
    }
}

/// World-level environment settings, carried by a layer's world entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldConditions {
    /// Gravity acceleration (negative = down).
    pub gravity: f64,
    /// Current weather.
    #[serde(default)]
    pub weather: Weather,
    /// Current time-of-day phase.
    #[serde(default)]
    pub time_of_day: TimeOfDay,
    /// Seed for terrain generation.
    #[serde(default)]
    pub terrain_seed: u64,
    /// Free-form extra properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// Commands the world advertises; sessions may only issue these.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldCommands {
    /// Allowed command names.
    pub commands: Vec<String>,
}

/// Commands granted to an entity (a subset of the world commands).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAccess {
    /// Granted command names.
    pub commands: Vec<String>,
}

/// The closed tagged union of every contract record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Contract {
    /// Stable name/description.
    Identity(Identity),
    /// Position and motion.
    Mobility(Mobility),
    /// Collision bounds.
    Shape(Shape),
    /// Solidity flag.
    Solidity(Solidity),
    /// Presentation hints.
    Visual(Visual),
    /// Layer portal.
    Entrance(Entrance),
    /// Pickup rules.
    Portable(Portable),
    /// Carried entities.
    Inventory(Inventory),
    /// Health pool.
    Durability(Durability),
    /// Cardinality overrides.
    ContractLimit(ContractLimit),
    /// Discrete-movement parameters.
    MovementRules(MovementRules),
    /// Environment settings.
    WorldConditions(WorldConditions),
    /// World command allow-list.
    WorldCommands(WorldCommands),
    /// Entity command allow-list.
    CommandAccess(CommandAccess),
}

impl Contract {
    /// The kind tag of this record.
    #[must_use]
    pub const fn kind(&self) -> ContractKind {
        match self {
            Self::Identity(_) => ContractKind::Identity,
            Self::Mobility(_) => ContractKind::Mobility,
            Self::Shape(_) => ContractKind::Shape,
            Self::Solidity(_) => ContractKind::Solidity,
            Self::Visual(_) => ContractKind::Visual,
            Self::Entrance(_) => ContractKind::Entrance,
            Self::Portable(_) => ContractKind::Portable,
            Self::Inventory(_) => ContractKind::Inventory,
            Self::Durability(_) => ContractKind::Durability,
            Self::ContractLimit(_) => ContractKind::ContractLimit,
            Self::MovementRules(_) => ContractKind::MovementRules,
            Self::WorldConditions(_) => ContractKind::WorldConditions,
            Self::WorldCommands(_) => ContractKind::WorldCommands,
            Self::CommandAccess(_) => ContractKind::CommandAccess,
        }
    }

    /// Borrows the mobility record if this is one.
    #[must_use]
    pub fn as_mobility(&self) -> Option<&Mobility> {
        match self {
            Self::Mobility(m) => Some(m),
            _ => None,
        }
    }

    /// Borrows the shape record if this is one.
    #[must_use]
    pub fn as_shape(&self) -> Option<&Shape> {
        match self {
            Self::Shape(s) => Some(s),
            _ => None,
        }
    }

    /// Borrows the solidity record if this is one.
    #[must_use]
    pub fn as_solidity(&self) -> Option<&Solidity> {
        match self {
            Self::Solidity(s) => Some(s),
            _ => None,
        }
    }

    /// Borrows the durability record if this is one.
    #[must_use]
    pub fn as_durability(&self) -> Option<&Durability> {
        match self {
            Self::Durability(d) => Some(d),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tag_round_trip() {
        let c = Contract::Mobility(Mobility {
            position: Vec3::new(1.0, 2.0, 3.0),
            velocity: None,
            max_speed: Some(5.0),
            acceleration: None,
        });
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["kind"], "mobility");
        assert_eq!(json["maxSpeed"], 5.0);
        let back: Contract = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let json = r#"{"kind":"solidity","solid":true,"extraneous":42}"#;
        let c: Contract = serde_json::from_str(json).unwrap();
        assert_eq!(c.kind(), ContractKind::Solidity);
    }

    #[test]
    fn test_contract_limit_map_keys() {
        let mut limits = BTreeMap::new();
        limits.insert(ContractKind::Entrance, 5);
        limits.insert(ContractKind::Portable, 3);
        let c = Contract::ContractLimit(ContractLimit { limits });
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("\"entrance\":5"));
        assert!(json.contains("\"portable\":3"));
    }

    #[test]
    fn test_kind_strings_cover_all() {
        for kind in ContractKind::ALL {
            let tag = serde_json::to_value(kind).unwrap();
            assert_eq!(tag, kind.as_str());
        }
    }
}
