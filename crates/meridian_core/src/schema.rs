//! # Contract Schema Registry
//!
//! One validator per contract kind, consulted before any record becomes
//! observable in a store. The registry is immutable after startup except
//! for test-time registration of extra validators, which lets tests probe
//! open-world extension without loosening the production set.
//!
//! Validation failure is a client-visible `InvalidComponent` error; it is
//! never downgraded to a warning.

use crate::error::ValidationError;
use meridian_shared::contract::{Contract, ContractKind};
use std::collections::HashMap;

/// A validator for one contract kind.
pub type Validator = Box<dyn Fn(&Contract) -> Result<(), ValidationError> + Send + Sync>;

/// Default cardinality ceiling for a kind (see the data-model table).
#[must_use]
pub const fn default_limit(kind: ContractKind) -> u32 {
    match kind {
        ContractKind::Portable => 3,
        _ => 1,
    }
}

/// Registry of per-kind validators.
pub struct SchemaRegistry {
    validators: HashMap<ContractKind, Validator>,
}

impl SchemaRegistry {
    /// Creates the registry with the built-in validator set.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            validators: HashMap::new(),
        };
        registry.install_builtins();
        registry
    }

    /// Registers (or replaces) the validator for a kind.
    ///
    /// Production code installs validators once at startup; tests may use
    /// this to tighten or relax a single kind.
    pub fn register(&mut self, kind: ContractKind, validator: Validator) {
        self.validators.insert(kind, validator);
    }

    /// Validates one record against its kind's schema.
    ///
    /// # Errors
    ///
    /// Returns the violation with the offending field path.
    pub fn validate(&self, record: &Contract) -> Result<(), ValidationError> {
        match self.validators.get(&record.kind()) {
            Some(validator) => validator(record),
            None => Ok(()),
        }
    }

    fn install_builtins(&mut self) {
        self.register(
            ContractKind::Identity,
            Box::new(|c| {
                let Contract::Identity(identity) = c else {
                    return Ok(());
                };
                if identity.name.is_empty() {
                    return Err(ValidationError::new("identity.name", "must not be empty"));
                }
                Ok(())
            }),
        );

        self.register(
            ContractKind::Mobility,
            Box::new(|c| {
                let Contract::Mobility(mobility) = c else {
                    return Ok(());
                };
                require_finite_vec("mobility.position", mobility.position)?;
                if let Some(v) = mobility.velocity {
                    require_finite_vec("mobility.velocity", v)?;
                }
                if let Some(max_speed) = mobility.max_speed {
                    if !(max_speed > 0.0) {
                        return Err(ValidationError::new(
                            "mobility.maxSpeed",
                            "must be positive",
                        ));
                    }
                }
                if let Some(acceleration) = mobility.acceleration {
                    if !(acceleration > 0.0) {
                        return Err(ValidationError::new(
                            "mobility.acceleration",
                            "must be positive",
                        ));
                    }
                }
                Ok(())
            }),
        );

        self.register(
            ContractKind::Shape,
            Box::new(|c| {
                let Contract::Shape(shape) = c else {
                    return Ok(());
                };
                let (min, max) = (shape.bounds.min, shape.bounds.max);
                if min.x > max.x || min.y > max.y || min.z > max.z {
                    return Err(ValidationError::new(
                        "shape.bounds",
                        "min must be <= max on every axis",
                    ));
                }
                Ok(())
            }),
        );

        self.register(
            ContractKind::Portable,
            Box::new(|c| {
                let Contract::Portable(portable) = c else {
                    return Ok(());
                };
                if portable.weight < 0.0 {
                    return Err(ValidationError::new(
                        "portable.weight",
                        "must be non-negative",
                    ));
                }
                Ok(())
            }),
        );

        self.register(
            ContractKind::Inventory,
            Box::new(|c| {
                let Contract::Inventory(inventory) = c else {
                    return Ok(());
                };
                if let Some(capacity) = inventory.capacity {
                    if capacity == 0 {
                        return Err(ValidationError::new(
                            "inventory.capacity",
                            "must be positive when present",
                        ));
                    }
                    if inventory.items.len() > capacity as usize {
                        return Err(ValidationError::new(
                            "inventory.items",
                            "exceeds capacity",
                        ));
                    }
                }
                Ok(())
            }),
        );

        self.register(
            ContractKind::Durability,
            Box::new(|c| {
                let Contract::Durability(durability) = c else {
                    return Ok(());
                };
                if !(durability.max_health > 0.0) {
                    return Err(ValidationError::new(
                        "durability.maxHealth",
                        "must be positive",
                    ));
                }
                if durability.health < 0.0 {
                    return Err(ValidationError::new(
                        "durability.health",
                        "must be non-negative",
                    ));
                }
                if durability.health > durability.max_health {
                    return Err(ValidationError::new(
                        "durability.health",
                        "must not exceed maxHealth",
                    ));
                }
                if let Some(armor) = durability.armor {
                    if armor < 0.0 {
                        return Err(ValidationError::new(
                            "durability.armor",
                            "must be non-negative",
                        ));
                    }
                }
                Ok(())
            }),
        );

        self.register(
            ContractKind::ContractLimit,
            Box::new(|c| {
                let Contract::ContractLimit(limit) = c else {
                    return Ok(());
                };
                for (kind, max) in &limit.limits {
                    if *max == 0 {
                        return Err(ValidationError::new(
                            format!("contract_limit.limits.{kind}"),
                            "must be positive",
                        ));
                    }
                }
                Ok(())
            }),
        );

        self.register(
            ContractKind::MovementRules,
            Box::new(|c| {
                let Contract::MovementRules(rules) = c else {
                    return Ok(());
                };
                if !(rules.step_distance > 0.0) {
                    return Err(ValidationError::new(
                        "movement_rules.stepDistance",
                        "must be positive",
                    ));
                }
                Ok(())
            }),
        );

        self.register(
            ContractKind::WorldConditions,
            Box::new(|c| {
                let Contract::WorldConditions(conditions) = c else {
                    return Ok(());
                };
                if !conditions.gravity.is_finite() {
                    return Err(ValidationError::new(
                        "world_conditions.gravity",
                        "must be finite",
                    ));
                }
                Ok(())
            }),
        );
        // Solidity, Visual, Entrance, WorldCommands and CommandAccess are
        // structurally valid whenever they deserialize.
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn require_finite_vec(
    path: &str,
    v: meridian_shared::Vec3,
) -> Result<(), ValidationError> {
    if v.x.is_finite() && v.y.is_finite() && v.z.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::new(path, "components must be finite"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_shared::contract::{Durability, Mobility, Shape};
    use meridian_shared::Vec3;

    #[test]
    fn test_default_limits() {
        assert_eq!(default_limit(ContractKind::Portable), 3);
        assert_eq!(default_limit(ContractKind::Identity), 1);
        assert_eq!(default_limit(ContractKind::Entrance), 1);
    }

    #[test]
    fn test_mobility_max_speed_must_be_positive() {
        let registry = SchemaRegistry::new();
        let bad = Contract::Mobility(Mobility {
            position: Vec3::ZERO,
            velocity: None,
            max_speed: Some(0.0),
            acceleration: None,
        });
        let err = registry.validate(&bad).unwrap_err();
        assert_eq!(err.path, "mobility.maxSpeed");

        let good = Contract::Mobility(Mobility {
            position: Vec3::ZERO,
            velocity: None,
            max_speed: Some(4.0),
            acceleration: None,
        });
        assert!(registry.validate(&good).is_ok());
    }

    #[test]
    fn test_shape_min_le_max() {
        let registry = SchemaRegistry::new();
        let bad = Contract::Shape(Shape {
            bounds: meridian_shared::Aabb::new(
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(-1.0, 1.0, 1.0),
            ),
            geometry: Default::default(),
        });
        assert!(registry.validate(&bad).is_err());
    }

    #[test]
    fn test_durability_bounds() {
        let registry = SchemaRegistry::new();
        let over = Contract::Durability(Durability {
            health: 12.0,
            max_health: 10.0,
            armor: None,
        });
        let err = registry.validate(&over).unwrap_err();
        assert_eq!(err.path, "durability.health");

        let negative_armor = Contract::Durability(Durability {
            health: 5.0,
            max_health: 10.0,
            armor: Some(-1.0),
        });
        assert_eq!(
            registry.validate(&negative_armor).unwrap_err().path,
            "durability.armor"
        );
    }

    #[test]
    fn test_test_time_registration_overrides() {
        let mut registry = SchemaRegistry::new();
        registry.register(
            ContractKind::Visual,
            Box::new(|_| Err(ValidationError::new("visual", "banned in this test"))),
        );
        let visual = Contract::Visual(Default::default());
        assert!(registry.validate(&visual).is_err());
    }
}
