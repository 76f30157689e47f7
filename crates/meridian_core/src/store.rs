//! # Entity Store
//!
//! The central container for all entities and their contracts.
//!
//! ## Design
//!
//! - One map entity -> ordered contract list (insertion order is what
//!   "oldest" means for cardinality eviction).
//! - One inverted index contract-kind -> entity set, updated in the same
//!   critical section as the owning entity's list. `insert_record` is the
//!   single mutating primitive that validates and indexes, so the two can
//!   never diverge.
//! - Lifecycle hooks run synchronously in registration order. Hooks receive
//!   a shared borrow of the store, which structurally rules out reentrant
//!   mutation; hooks that need to mutate queue work through captured state
//!   and run it after the current operation returns.

use crate::error::{StoreError, StoreResult};
use crate::schema::{default_limit, SchemaRegistry};
use meridian_shared::contract::{Contract, ContractKind, Mobility};
use meridian_shared::EntityId;
use std::collections::{HashMap, HashSet};

/// A lifecycle notification fired by the store.
#[derive(Clone, Debug)]
pub enum HookEvent {
    /// An entity was created (fires before its initial contracts land).
    EntityAdded {
        /// The new entity.
        id: EntityId,
    },
    /// An entity was removed (fires after its contracts are gone).
    EntityRemoved {
        /// The removed entity.
        id: EntityId,
    },
    /// A contract was attached.
    ContractAdded {
        /// Owning entity.
        id: EntityId,
        /// The record that landed.
        contract: Contract,
    },
    /// A contract was detached (explicitly, by eviction, or by entity
    /// removal; in the last case the entity is still present in the store).
    ContractRemoved {
        /// Owning entity.
        id: EntityId,
        /// The record that was detached.
        contract: Contract,
    },
}

/// An ordered hook callback.
pub type HookFn = Box<dyn FnMut(&EntityStore, &HookEvent) + Send>;

#[derive(Default)]
struct Hooks {
    entity_added: Vec<HookFn>,
    entity_removed: Vec<HookFn>,
    contract_added: HashMap<ContractKind, Vec<HookFn>>,
    contract_removed: HashMap<ContractKind, Vec<HookFn>>,
}

/// The entity store.
pub struct EntityStore {
    entities: HashMap<EntityId, Vec<Contract>>,
    index: HashMap<ContractKind, HashSet<EntityId>>,
    schemas: SchemaRegistry,
    hooks: Hooks,
}

impl EntityStore {
    /// Creates an empty store with the built-in schema set.
    #[must_use]
    pub fn new() -> Self {
        Self::with_schemas(SchemaRegistry::new())
    }

    /// Creates an empty store with a caller-provided schema registry.
    #[must_use]
    pub fn with_schemas(schemas: SchemaRegistry) -> Self {
        Self {
            entities: HashMap::new(),
            index: HashMap::new(),
            schemas,
            hooks: Hooks::default(),
        }
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the store holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Whether the entity exists.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// Iterates over all entity ids.
    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.entities.keys()
    }

    // =========================================================================
    // Hook registration
    // =========================================================================

    /// Registers an entity-created hook.
    pub fn on_entity_added(&mut self, hook: HookFn) {
        self.hooks.entity_added.push(hook);
    }

    /// Registers an entity-removed hook.
    pub fn on_entity_removed(&mut self, hook: HookFn) {
        self.hooks.entity_removed.push(hook);
    }

    /// Registers a per-kind contract-added hook.
    pub fn on_contract_added(&mut self, kind: ContractKind, hook: HookFn) {
        self.hooks.contract_added.entry(kind).or_default().push(hook);
    }

    /// Registers a per-kind contract-removed hook.
    pub fn on_contract_removed(&mut self, kind: ContractKind, hook: HookFn) {
        self.hooks.contract_removed.entry(kind).or_default().push(hook);
    }

    fn fire(&mut self, event: HookEvent) {
        // Hooks are lifted out for the duration of the dispatch; they see
        // the store read-only and cannot re-enter mutation.
        let mut hooks = std::mem::take(&mut self.hooks);
        {
            let list = match &event {
                HookEvent::EntityAdded { .. } => Some(&mut hooks.entity_added),
                HookEvent::EntityRemoved { .. } => Some(&mut hooks.entity_removed),
                HookEvent::ContractAdded { contract, .. } => {
                    hooks.contract_added.get_mut(&contract.kind())
                }
                HookEvent::ContractRemoved { contract, .. } => {
                    hooks.contract_removed.get_mut(&contract.kind())
                }
            };
            if let Some(list) = list {
                for hook in list.iter_mut() {
                    hook(&*self, &event);
                }
            }
        }
        self.hooks = hooks;
    }

    // =========================================================================
    // Entity lifecycle
    // =========================================================================

    /// Creates an entity with an initial contract set.
    ///
    /// Every contract is validated before anything becomes observable; the
    /// cardinality rules then apply to each in order.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the id is taken; `InvalidComponent` if any record
    /// fails its schema.
    pub fn create(&mut self, id: EntityId, contracts: Vec<Contract>) -> StoreResult<()> {
        if self.entities.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        for contract in &contracts {
            self.schemas
                .validate(contract)
                .map_err(|source| StoreError::InvalidComponent {
                    kind: contract.kind(),
                    source,
                })?;
        }

        self.entities.insert(id.clone(), Vec::new());
        self.fire(HookEvent::EntityAdded { id: id.clone() });

        for contract in contracts {
            // Validated above; cardinality still applies per record.
            self.insert_record(&id, contract)?;
        }
        Ok(())
    }

    /// Removes an entity and every contract it owns.
    ///
    /// Contract-removed hooks fire while the entity is still present (with
    /// its remaining contracts); the entity-removed hook fires after it is
    /// gone. Returns `false` if the id was unknown.
    pub fn remove(&mut self, id: &EntityId) -> bool {
        if !self.entities.contains_key(id) {
            return false;
        }

        // Peel contracts newest-first; the order is unspecified, this one
        // keeps index rebuilds cheap.
        while let Some(contract) = self
            .entities
            .get_mut(id)
            .and_then(|list| list.pop())
        {
            self.unindex_if_last(id, contract.kind());
            self.fire(HookEvent::ContractRemoved {
                id: id.clone(),
                contract,
            });
        }

        self.entities.remove(id);
        self.fire(HookEvent::EntityRemoved { id: id.clone() });
        true
    }

    // =========================================================================
    // Contract operations
    // =========================================================================

    /// Attaches a contract to an entity, enforcing cardinality resolution:
    /// while the entity already holds `max_for` records of the kind, the
    /// oldest is evicted (its removed hook fires) before the new one lands.
    ///
    /// # Errors
    ///
    /// `UnknownEntity`, `InvalidComponent`, or `LimitExceeded` when the
    /// resolved limit is zero.
    pub fn add(&mut self, id: &EntityId, contract: Contract) -> StoreResult<()> {
        if !self.entities.contains_key(id) {
            return Err(StoreError::UnknownEntity(id.clone()));
        }
        self.schemas
            .validate(&contract)
            .map_err(|source| StoreError::InvalidComponent {
                kind: contract.kind(),
                source,
            })?;
        self.insert_record(id, contract)
    }

    /// The single mutating primitive: applies cardinality, stores the
    /// record, and updates the inverted index in one critical section.
    fn insert_record(&mut self, id: &EntityId, contract: Contract) -> StoreResult<()> {
        let kind = contract.kind();
        let max = self.max_for(id, kind);
        if max == 0 {
            return Err(StoreError::LimitExceeded {
                entity: id.clone(),
                kind,
                max,
            });
        }

        while self.count_of(id, kind) >= max as usize {
            let Some(evicted) = self.take_oldest(id, kind) else {
                break;
            };
            self.unindex_if_last(id, kind);
            self.fire(HookEvent::ContractRemoved {
                id: id.clone(),
                contract: evicted,
            });
        }

        if self.count_of(id, kind) >= max as usize {
            return Err(StoreError::LimitExceeded {
                entity: id.clone(),
                kind,
                max,
            });
        }

        if let Some(list) = self.entities.get_mut(id) {
            list.push(contract.clone());
        }
        self.index.entry(kind).or_default().insert(id.clone());
        self.fire(HookEvent::ContractAdded {
            id: id.clone(),
            contract,
        });
        Ok(())
    }

    /// Detaches every record of a kind from an entity. Returns whether any
    /// record was removed.
    pub fn remove_contract(&mut self, id: &EntityId, kind: ContractKind) -> bool {
        if !self.entities.contains_key(id) {
            return false;
        }
        let mut removed_any = false;
        while let Some(record) = self.take_oldest(id, kind) {
            removed_any = true;
            self.unindex_if_last(id, kind);
            self.fire(HookEvent::ContractRemoved {
                id: id.clone(),
                contract: record,
            });
        }
        removed_any
    }

    /// The newest record of a kind on an entity, if any.
    #[must_use]
    pub fn get(&self, id: &EntityId, kind: ContractKind) -> Option<&Contract> {
        self.entities
            .get(id)?
            .iter()
            .rev()
            .find(|c| c.kind() == kind)
    }

    /// Every record of a kind on an entity, oldest first.
    #[must_use]
    pub fn get_all(&self, id: &EntityId, kind: ContractKind) -> Vec<&Contract> {
        self.entities
            .get(id)
            .map(|list| list.iter().filter(|c| c.kind() == kind).collect())
            .unwrap_or_default()
    }

    /// The full contract list of an entity, insertion-ordered.
    #[must_use]
    pub fn contracts(&self, id: &EntityId) -> Option<&[Contract]> {
        self.entities.get(id).map(Vec::as_slice)
    }

    /// Entities carrying at least one record of the kind.
    #[must_use]
    pub fn list_with(&self, kind: ContractKind) -> Vec<EntityId> {
        self.index
            .get(&kind)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Entities carrying every one of the kinds (index intersection).
    #[must_use]
    pub fn list_with_all(&self, kinds: &[ContractKind]) -> Vec<EntityId> {
        let Some((first, rest)) = kinds.split_first() else {
            return Vec::new();
        };
        let Some(base) = self.index.get(first) else {
            return Vec::new();
        };
        base.iter()
            .filter(|id| {
                rest.iter().all(|kind| {
                    self.index
                        .get(kind)
                        .is_some_and(|set| set.contains(*id))
                })
            })
            .cloned()
            .collect()
    }

    /// Entities carrying any of the kinds (index union).
    #[must_use]
    pub fn list_with_any(&self, kinds: &[ContractKind]) -> Vec<EntityId> {
        let mut out: HashSet<&EntityId> = HashSet::new();
        for kind in kinds {
            if let Some(set) = self.index.get(kind) {
                out.extend(set.iter());
            }
        }
        out.into_iter().cloned().collect()
    }

    /// Resolved cardinality ceiling for a kind on an entity: the entity's
    /// `contract_limit` override when present, else the global default.
    #[must_use]
    pub fn max_for(&self, id: &EntityId, kind: ContractKind) -> u32 {
        if let Some(Contract::ContractLimit(limit)) =
            self.get(id, ContractKind::ContractLimit)
        {
            if let Some(max) = limit.limits.get(&kind) {
                return *max;
            }
        }
        default_limit(kind)
    }

    // =========================================================================
    // Hot-path mutators
    //
    // Position and velocity churn every tick; these skip hook dispatch and
    // revalidation (the touched fields carry no schema constraints). Callers
    // own the resulting delta emission.
    // =========================================================================

    /// Mutable access to an entity's mobility record.
    pub fn mobility_mut(&mut self, id: &EntityId) -> Option<&mut Mobility> {
        self.entities.get_mut(id)?.iter_mut().rev().find_map(|c| {
            if let Contract::Mobility(m) = c {
                Some(m)
            } else {
                None
            }
        })
    }

    /// Mutable access to an entity's durability record.
    pub fn durability_mut(
        &mut self,
        id: &EntityId,
    ) -> Option<&mut meridian_shared::contract::Durability> {
        self.entities.get_mut(id)?.iter_mut().rev().find_map(|c| {
            if let Contract::Durability(d) = c {
                Some(d)
            } else {
                None
            }
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn count_of(&self, id: &EntityId, kind: ContractKind) -> usize {
        self.entities
            .get(id)
            .map(|list| list.iter().filter(|c| c.kind() == kind).count())
            .unwrap_or(0)
    }

    fn take_oldest(&mut self, id: &EntityId, kind: ContractKind) -> Option<Contract> {
        let list = self.entities.get_mut(id)?;
        let pos = list.iter().position(|c| c.kind() == kind)?;
        Some(list.remove(pos))
    }

    /// Drops the entity from `index[kind]` when its last record of the kind
    /// is gone.
    fn unindex_if_last(&mut self, id: &EntityId, kind: ContractKind) {
        if self.count_of(id, kind) == 0 {
            if let Some(set) = self.index.get_mut(&kind) {
                set.remove(id);
                if set.is_empty() {
                    self.index.remove(&kind);
                }
            }
        }
    }

    /// Checks the store/index coherence invariant; test support.
    #[must_use]
    pub fn index_is_consistent(&self) -> bool {
        for (id, list) in &self.entities {
            for contract in list {
                let indexed = self
                    .index
                    .get(&contract.kind())
                    .is_some_and(|set| set.contains(id));
                if !indexed {
                    return false;
                }
            }
        }
        for (kind, set) in &self.index {
            for id in set {
                if self.count_of(id, *kind) == 0 {
                    return false;
                }
            }
        }
        true
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_shared::contract::{
        ContractLimit, Entrance, Identity, Portable, Visual,
    };
    use meridian_shared::{LayerId, Vec3};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn identity(name: &str) -> Contract {
        Contract::Identity(Identity {
            id: None,
            name: name.to_owned(),
            description: None,
        })
    }

    fn entrance(target: &str, enabled: bool) -> Contract {
        Contract::Entrance(Entrance {
            target_layer: LayerId::new(target),
            target_position: Vec3::ZERO,
            enabled,
        })
    }

    #[test]
    fn test_create_and_duplicate() {
        let mut store = EntityStore::new();
        let id = EntityId::new("e1");
        store.create(id.clone(), vec![identity("one")]).unwrap();
        assert!(store.contains(&id));
        assert!(matches!(
            store.create(id.clone(), vec![]),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_unknown_entity_add() {
        let mut store = EntityStore::new();
        let err = store
            .add(&EntityId::new("nope"), identity("x"))
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownEntity(_)));
    }

    #[test]
    fn test_index_matches_store() {
        let mut store = EntityStore::new();
        let id = EntityId::new("e1");
        store
            .create(id.clone(), vec![identity("one"), entrance("overworld", true)])
            .unwrap();

        assert!(store.index_is_consistent());
        assert_eq!(store.list_with(ContractKind::Identity), vec![id.clone()]);
        assert!(store.get(&id, ContractKind::Entrance).is_some());

        store.remove_contract(&id, ContractKind::Entrance);
        assert!(store.index_is_consistent());
        assert!(store.list_with(ContractKind::Entrance).is_empty());

        store.remove(&id);
        assert!(store.index_is_consistent());
        assert!(store.is_empty());
    }

    #[test]
    fn test_cardinality_replacement_keeps_newest() {
        // identity, then two entrances: the second replaces the first.
        let mut store = EntityStore::new();
        let id = EntityId::new("door");
        store.create(id.clone(), vec![identity("door")]).unwrap();

        store.add(&id, entrance("overworld", true)).unwrap();
        store.add(&id, entrance("nether", false)).unwrap();

        let records = store.get_all(&id, ContractKind::Entrance);
        assert_eq!(records.len(), 1);
        let Contract::Entrance(e) = store.get(&id, ContractKind::Entrance).unwrap() else {
            panic!("wrong kind");
        };
        assert_eq!(e.target_layer, LayerId::new("nether"));
        assert!(!e.enabled);
    }

    #[test]
    fn test_contract_limit_override_never_exceeded() {
        let mut store = EntityStore::new();
        let id = EntityId::new("bag");
        let mut limits = std::collections::BTreeMap::new();
        limits.insert(ContractKind::Portable, 2);
        store
            .create(
                id.clone(),
                vec![Contract::ContractLimit(ContractLimit { limits })],
            )
            .unwrap();

        for weight in 0..5 {
            store
                .add(
                    &id,
                    Contract::Portable(Portable {
                        can_pickup: true,
                        weight: f64::from(weight),
                    }),
                )
                .unwrap();
            assert!(store.get_all(&id, ContractKind::Portable).len() <= 2);
        }
        // Oldest evicted: weights 3 and 4 remain.
        let weights: Vec<f64> = store
            .get_all(&id, ContractKind::Portable)
            .iter()
            .map(|c| match c {
                Contract::Portable(p) => p.weight,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(weights, vec![3.0, 4.0]);
    }

    #[test]
    fn test_invalid_component_is_rejected_with_path() {
        let mut store = EntityStore::new();
        let id = EntityId::new("e");
        store.create(id.clone(), vec![]).unwrap();
        let err = store
            .add(
                &id,
                Contract::Durability(meridian_shared::contract::Durability {
                    health: 5.0,
                    max_health: 0.0,
                    armor: None,
                }),
            )
            .unwrap_err();
        let StoreError::InvalidComponent { kind, source } = err else {
            panic!("wrong error");
        };
        assert_eq!(kind, ContractKind::Durability);
        assert_eq!(source.path, "durability.maxHealth");
    }

    #[test]
    fn test_eviction_fires_removed_hook() {
        let mut store = EntityStore::new();
        let removed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&removed);
        store.on_contract_removed(
            ContractKind::Entrance,
            Box::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let id = EntityId::new("door");
        store.create(id.clone(), vec![]).unwrap();
        store.add(&id, entrance("a", true)).unwrap();
        store.add(&id, entrance("b", true)).unwrap();
        store.add(&id, entrance("c", true)).unwrap();

        assert_eq!(removed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove_hook_ordering() {
        // Contract-removed hooks still see the entity; the entity-removed
        // hook does not.
        let mut store = EntityStore::new();
        let present_during_contract = Arc::new(AtomicUsize::new(0));
        let absent_during_entity = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&present_during_contract);
        store.on_contract_removed(
            ContractKind::Visual,
            Box::new(move |store, event| {
                if let HookEvent::ContractRemoved { id, .. } = event {
                    if store.contains(id) {
                        c1.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }),
        );
        let c2 = Arc::clone(&absent_during_entity);
        store.on_entity_removed(Box::new(move |store, event| {
            if let HookEvent::EntityRemoved { id } = event {
                if !store.contains(id) {
                    c2.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));

        let id = EntityId::new("e");
        store
            .create(id.clone(), vec![Contract::Visual(Visual::default())])
            .unwrap();
        assert!(store.remove(&id));

        assert_eq!(present_during_contract.load(Ordering::SeqCst), 1);
        assert_eq!(absent_during_entity.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_list_with_all_and_any() {
        let mut store = EntityStore::new();
        let a = EntityId::new("a");
        let b = EntityId::new("b");
        store
            .create(a.clone(), vec![identity("a"), Contract::Visual(Visual::default())])
            .unwrap();
        store.create(b.clone(), vec![identity("b")]).unwrap();

        let both = store.list_with_all(&[ContractKind::Identity, ContractKind::Visual]);
        assert_eq!(both, vec![a.clone()]);

        let mut any = store.list_with_any(&[ContractKind::Identity, ContractKind::Visual]);
        any.sort();
        assert_eq!(any, vec![a, b]);
    }
}
