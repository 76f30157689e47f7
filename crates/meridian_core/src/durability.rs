//! # Durability System
//!
//! Damage, healing and auto-destruction.
//!
//! ## Design
//!
//! - Every entity that gains an `identity` is guaranteed a `durability`
//!   record by the next tick (default 1/1). The guarantee rides on a store
//!   hook that only queues the entity id; the queue drains inside `tick`,
//!   after the triggering operation has fully completed.
//! - `damage` applies armor reduction, writes back clamped health, and
//!   destroys the entity at zero. Destruction removes it from the store;
//!   spatial cleanup belongs to the caller, which receives the report.
//! - The tick also sweeps entities whose health dropped to zero through an
//!   external write.
//! - Event logs keep the last 100 records per kind.

use crate::store::{EntityStore, HookEvent};
use meridian_shared::contract::{Contract, ContractKind, Durability};
use meridian_shared::EntityId;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum retained events per log kind.
pub const EVENT_LOG_CAP: usize = 100;

/// Armor cap: no more than 75% of incoming damage can be absorbed.
const MAX_ARMOR_REDUCTION: f64 = 0.75;

/// A recorded damage application.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DamageEvent {
    /// Damaged entity.
    pub entity: EntityId,
    /// Requested amount before armor.
    pub amount: f64,
    /// Amount actually applied.
    pub actual: f64,
    /// Health remaining afterward.
    pub remaining: f64,
    /// Attacker, when known.
    pub source: Option<EntityId>,
    /// Milliseconds since the epoch.
    pub at: u128,
}

/// A recorded heal application.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealEvent {
    /// Healed entity.
    pub entity: EntityId,
    /// Health gained.
    pub gained: f64,
    /// Health afterward.
    pub health: f64,
    /// Milliseconds since the epoch.
    pub at: u128,
}

/// A recorded destruction.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestroyEvent {
    /// Destroyed entity.
    pub entity: EntityId,
    /// What killed it, when known.
    pub source: Option<EntityId>,
    /// Milliseconds since the epoch.
    pub at: u128,
}

/// Outcome of one `damage` call.
#[derive(Clone, Debug, PartialEq)]
pub struct DamageOutcome {
    /// Whether any damage landed (armor can absorb everything).
    pub applied: bool,
    /// Damage after armor.
    pub actual: f64,
    /// Health remaining.
    pub remaining: f64,
    /// Whether the entity was destroyed by this hit.
    pub destroyed: bool,
}

/// The durability system.
pub struct DurabilitySystem {
    damage_log: VecDeque<DamageEvent>,
    heal_log: VecDeque<HealEvent>,
    destroy_log: VecDeque<DestroyEvent>,
    /// Entities that gained an identity and await the durability guarantee.
    pending_ensure: Arc<Mutex<Vec<EntityId>>>,
}

impl DurabilitySystem {
    /// Creates the system and wires its identity hook into the store.
    #[must_use]
    pub fn attach(store: &mut EntityStore) -> Self {
        let pending_ensure: Arc<Mutex<Vec<EntityId>>> = Arc::default();
        let queue = Arc::clone(&pending_ensure);
        store.on_contract_added(
            ContractKind::Identity,
            Box::new(move |_, event| {
                if let HookEvent::ContractAdded { id, .. } = event {
                    queue.lock().push(id.clone());
                }
            }),
        );
        Self {
            damage_log: VecDeque::new(),
            heal_log: VecDeque::new(),
            destroy_log: VecDeque::new(),
            pending_ensure,
        }
    }

    /// Applies damage to an entity.
    ///
    /// Armor shaves `1%` per point off the amount, capped at 75%. A hit
    /// whose effective amount is not positive does nothing and reports
    /// `applied = false`. At zero health the entity is destroyed and
    /// removed from the store; the caller handles spatial fan-out.
    ///
    /// Returns `None` when the entity is missing or carries no durability.
    pub fn damage(
        &mut self,
        store: &mut EntityStore,
        id: &EntityId,
        amount: f64,
        source: Option<EntityId>,
    ) -> Option<DamageOutcome> {
        let durability = match store.get(id, ContractKind::Durability)? {
            Contract::Durability(d) => d.clone(),
            _ => return None,
        };

        let reduction = (0.01 * durability.armor.unwrap_or(0.0)).min(MAX_ARMOR_REDUCTION);
        let actual = amount * (1.0 - reduction);
        if actual <= 0.0 {
            return Some(DamageOutcome {
                applied: false,
                actual: 0.0,
                remaining: durability.health,
                destroyed: false,
            });
        }

        let remaining = (durability.health - actual).max(0.0);
        if let Some(record) = store.durability_mut(id) {
            record.health = remaining;
        }

        push_capped(
            &mut self.damage_log,
            DamageEvent {
                entity: id.clone(),
                amount,
                actual,
                remaining,
                source: source.clone(),
                at: now_millis(),
            },
        );

        let destroyed = remaining <= 0.0;
        if destroyed {
            self.destroy(store, id, source);
        }

        Some(DamageOutcome {
            applied: true,
            actual,
            remaining,
            destroyed,
        })
    }

    /// Heals an entity, capped at its max health. Requires a strictly
    /// positive gain; healing a full entity reports `false`.
    pub fn heal(&mut self, store: &mut EntityStore, id: &EntityId, amount: f64) -> bool {
        if amount <= 0.0 {
            return false;
        }
        let Some(Contract::Durability(durability)) = store.get(id, ContractKind::Durability)
        else {
            return false;
        };
        let healed = (durability.health + amount).min(durability.max_health);
        let gained = healed - durability.health;
        if gained <= 0.0 {
            return false;
        }
        if let Some(record) = store.durability_mut(id) {
            record.health = healed;
        }
        push_capped(
            &mut self.heal_log,
            HealEvent {
                entity: id.clone(),
                gained,
                health: healed,
                at: now_millis(),
            },
        );
        true
    }

    /// Heals an entity back to full.
    pub fn repair(&mut self, store: &mut EntityStore, id: &EntityId) -> bool {
        let Some(Contract::Durability(durability)) = store.get(id, ContractKind::Durability)
        else {
            return false;
        };
        let missing = durability.max_health - durability.health;
        self.heal(store, id, missing)
    }

    /// One durability tick:
    ///
    /// 1. Grants the default durability to entities that gained an identity
    ///    since the last tick and still lack one.
    /// 2. Sweeps entities whose health is at or below zero but are still
    ///    present (external writes), destroying them.
    ///
    /// Returns the entities destroyed by the sweep.
    pub fn tick(&mut self, store: &mut EntityStore) -> Vec<EntityId> {
        let pending: Vec<EntityId> = std::mem::take(&mut *self.pending_ensure.lock());
        for id in pending {
            if store.contains(&id) && store.get(&id, ContractKind::Durability).is_none() {
                // Validated default; failure would mean a zero limit, which
                // the schema forbids.
                if let Err(err) = store.add(&id, Contract::Durability(Durability::default())) {
                    tracing::warn!(entity = %id, %err, "durability guarantee failed");
                }
            }
        }

        let doomed: Vec<EntityId> = store
            .list_with(ContractKind::Durability)
            .into_iter()
            .filter(|id| {
                store
                    .get(id, ContractKind::Durability)
                    .and_then(Contract::as_durability)
                    .is_some_and(|d| d.health <= 0.0)
            })
            .collect();

        for id in &doomed {
            self.destroy(store, id, None);
        }
        doomed
    }

    /// Records the destruction and removes the entity. The destroy event is
    /// logged before removal, so observers of the log see the entity while
    /// it still exists.
    fn destroy(&mut self, store: &mut EntityStore, id: &EntityId, source: Option<EntityId>) {
        push_capped(
            &mut self.destroy_log,
            DestroyEvent {
                entity: id.clone(),
                source,
                at: now_millis(),
            },
        );
        tracing::debug!(entity = %id, "destroyed");
        store.remove(id);
    }

    /// Damage events, oldest first, optionally filtered by entity.
    #[must_use]
    pub fn damage_events(&self, entity: Option<&EntityId>) -> Vec<&DamageEvent> {
        self.damage_log
            .iter()
            .filter(|e| entity.is_none_or(|id| &e.entity == id))
            .collect()
    }

    /// Heal events, oldest first, optionally filtered by entity.
    #[must_use]
    pub fn heal_events(&self, entity: Option<&EntityId>) -> Vec<&HealEvent> {
        self.heal_log
            .iter()
            .filter(|e| entity.is_none_or(|id| &e.entity == id))
            .collect()
    }

    /// Destroy events, oldest first, optionally filtered by entity.
    #[must_use]
    pub fn destroy_events(&self, entity: Option<&EntityId>) -> Vec<&DestroyEvent> {
        self.destroy_log
            .iter()
            .filter(|e| entity.is_none_or(|id| &e.entity == id))
            .collect()
    }
}

fn push_capped<T>(log: &mut VecDeque<T>, event: T) {
    if log.len() == EVENT_LOG_CAP {
        log.pop_front();
    }
    log.push_back(event);
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_shared::contract::Identity;

    fn store_with(id: &str, contracts: Vec<Contract>) -> (EntityStore, DurabilitySystem, EntityId) {
        let mut store = EntityStore::new();
        let system = DurabilitySystem::attach(&mut store);
        let entity = EntityId::new(id);
        store.create(entity.clone(), contracts).unwrap();
        (store, system, entity)
    }

    fn durability(health: f64, max: f64, armor: Option<f64>) -> Contract {
        Contract::Durability(Durability {
            health,
            max_health: max,
            armor,
        })
    }

    #[test]
    fn test_damage_with_armor() {
        let (mut store, mut system, id) =
            store_with("tank", vec![durability(100.0, 100.0, Some(50.0))]);

        let outcome = system.damage(&mut store, &id, 10.0, None).unwrap();
        assert!(outcome.applied);
        assert!((outcome.actual - 5.0).abs() < 1e-9); // 50 armor = 50% off
        assert!((outcome.remaining - 95.0).abs() < 1e-9);
        assert!(!outcome.destroyed);
    }

    #[test]
    fn test_armor_reduction_caps_at_75_percent() {
        let (mut store, mut system, id) =
            store_with("fortress", vec![durability(100.0, 100.0, Some(500.0))]);

        let outcome = system.damage(&mut store, &id, 40.0, None).unwrap();
        assert!((outcome.actual - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_effective_damage_is_refused() {
        let (mut store, mut system, id) = store_with("e", vec![durability(5.0, 5.0, None)]);
        let outcome = system.damage(&mut store, &id, 0.0, None).unwrap();
        assert!(!outcome.applied);
        assert!(system.damage_events(None).is_empty());
    }

    #[test]
    fn test_damage_to_destruction() {
        let (mut store, mut system, id) = store_with("frail", vec![durability(5.0, 5.0, None)]);

        let outcome = system.damage(&mut store, &id, 10.0, None).unwrap();
        assert!(outcome.destroyed);
        assert_eq!(outcome.remaining, 0.0);
        assert!(!store.contains(&id));
        assert_eq!(system.destroy_events(Some(&id)).len(), 1);
    }

    #[test]
    fn test_heal_caps_and_requires_gain() {
        let (mut store, mut system, id) = store_with("e", vec![durability(4.0, 10.0, None)]);

        assert!(system.heal(&mut store, &id, 20.0));
        let Contract::Durability(d) = store.get(&id, ContractKind::Durability).unwrap() else {
            panic!("wrong kind");
        };
        assert_eq!(d.health, 10.0);

        // Already full: no gain, not recorded.
        assert!(!system.heal(&mut store, &id, 1.0));
        assert!(!system.heal(&mut store, &id, 0.0));
        assert_eq!(system.heal_events(Some(&id)).len(), 1);
    }

    #[test]
    fn test_repair_heals_to_full() {
        let (mut store, mut system, id) = store_with("e", vec![durability(1.0, 50.0, None)]);
        assert!(system.repair(&mut store, &id));
        let Contract::Durability(d) = store.get(&id, ContractKind::Durability).unwrap() else {
            panic!("wrong kind");
        };
        assert_eq!(d.health, 50.0);
    }

    #[test]
    fn test_identity_grants_default_durability_next_tick() {
        let mut store = EntityStore::new();
        let mut system = DurabilitySystem::attach(&mut store);
        let id = EntityId::new("named");
        store
            .create(
                id.clone(),
                vec![Contract::Identity(Identity {
                    id: None,
                    name: "Named".to_owned(),
                    description: None,
                })],
            )
            .unwrap();

        assert!(store.get(&id, ContractKind::Durability).is_none());
        system.tick(&mut store);

        let Contract::Durability(d) = store.get(&id, ContractKind::Durability).unwrap() else {
            panic!("wrong kind");
        };
        assert_eq!((d.health, d.max_health), (1.0, 1.0));
    }

    #[test]
    fn test_tick_sweeps_externally_zeroed_health() {
        let (mut store, mut system, id) = store_with("e", vec![durability(5.0, 5.0, None)]);

        store.durability_mut(&id).unwrap().health = 0.0;
        let destroyed = system.tick(&mut store);
        assert_eq!(destroyed, vec![id.clone()]);
        assert!(!store.contains(&id));
    }

    #[test]
    fn test_event_log_is_capped() {
        let (mut store, mut system, id) =
            store_with("e", vec![durability(1e9, 1e9, None)]);
        for _ in 0..(EVENT_LOG_CAP + 20) {
            system.damage(&mut store, &id, 1.0, None);
        }
        assert_eq!(system.damage_events(None).len(), EVENT_LOG_CAP);
    }
}
