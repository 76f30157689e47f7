//! End-to-end scenarios: full session flows over in-memory outboxes,
//! checking the streaming contract a real client would observe.

use crossbeam_channel::{unbounded, Receiver};
use meridian_server::{DevEventHub, RuntimeConfig, SessionManager, Simulation};
use meridian_shared::contract::{
    Contract, ContractKind, Durability, Entrance, Identity, Mobility,
};
use meridian_shared::protocol::{ChunkDelta, ClientMessage, ServerMessage};
use meridian_shared::{ChunkKey, EntityId, LayerId, SessionId, Vec3};
use std::collections::HashMap;
use std::sync::Arc;

fn setup() -> (Simulation, SessionManager) {
    let config = RuntimeConfig::default();
    let sim = Simulation::new(&config, Arc::new(DevEventHub::new()));
    (sim, SessionManager::new(config))
}

fn connect(sim: &mut Simulation, sessions: &mut SessionManager) -> (SessionId, Receiver<ServerMessage>) {
    let (tx, rx) = unbounded();
    let id = sessions.connect(sim, tx).unwrap();
    assert!(matches!(rx.recv().unwrap(), ServerMessage::HelloOk { .. }));
    (id, rx)
}

fn drain(rx: &Receiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}

fn login(
    sim: &mut Simulation,
    sessions: &mut SessionManager,
    id: SessionId,
    rx: &Receiver<ServerMessage>,
) -> EntityId {
    sessions.dispatch(
        sim,
        id,
        ClientMessage::Login {
            layer_id: None,
            player_name: None,
        },
    );
    drain(rx)
        .iter()
        .find_map(|m| match m {
            ServerMessage::LoginOk { player_id, .. } => Some(player_id.clone()),
            _ => None,
        })
        .expect("login_ok")
}

/// Damage to destruction fans out to every subscriber of the chunk, with a
/// version above everything previously seen on that chunk.
#[test]
fn damage_to_destroy_fans_out_to_subscribers() {
    let (mut sim, _) = setup();
    let chunk = ChunkKey::new("default", 0, 0, 0);

    let victim = EntityId::new("victim");
    sim.store
        .create(
            victim.clone(),
            vec![
                Contract::Identity(Identity {
                    id: Some(victim.clone()),
                    name: "Victim".to_owned(),
                    description: None,
                }),
                Contract::Durability(Durability {
                    health: 5.0,
                    max_health: 5.0,
                    armor: None,
                }),
                Contract::Mobility(Mobility {
                    position: Vec3::new(5.0, 1.0, 5.0),
                    velocity: None,
                    max_speed: None,
                    acceleration: None,
                }),
            ],
        )
        .unwrap();
    sim.layers
        .bind_entity(victim.clone(), LayerId::new("default"));
    sim.chunks.add_entity(&sim.store, &victim, &chunk);

    let mut receivers = Vec::new();
    for n in [1u64, 2u64] {
        let (tx, rx) = unbounded();
        let session = SessionId(n);
        sim.chunks.register_session(session, tx);
        sim.chunks.subscribe(&sim.store, session, &chunk);
        receivers.push(rx);
    }

    let outcome = sim.damage(&victim, 10.0, None).unwrap();
    assert!(outcome.destroyed);
    assert!(!sim.store.contains(&victim));
    assert!(sim.chunks.entities_in(&chunk).is_empty());

    for rx in &receivers {
        let messages = drain(rx);

        let snapshot_version = messages
            .iter()
            .find_map(|m| match m {
                ServerMessage::ChunkSnapshot { version, .. } => Some(*version),
                _ => None,
            })
            .expect("snapshot on subscribe");

        let remove_version = messages
            .iter()
            .find_map(|m| match m {
                ServerMessage::ChunkDelta {
                    delta: ChunkDelta::EntityRemove { entity_id },
                    version,
                    ..
                } if *entity_id == victim => Some(*version),
                _ => None,
            })
            .expect("entity_remove delta");
        assert!(remove_version > snapshot_version);

        assert!(
            messages.iter().any(|m| matches!(
                m,
                ServerMessage::EntityDespawn { entity_id, chunk_key }
                    if *entity_id == victim && *chunk_key == chunk
            )),
            "expected entity_despawn referencing the chunk"
        );
    }
}

/// View-radius auto-subscription: a 64-unit view over 32-unit chunks is a
/// 5x5x5 neighborhood; moving one chunk east re-centers it, dropping the
/// trailing face and snapshotting the leading one.
#[test]
fn view_radius_subscription_follows_movement() {
    let (mut sim, mut sessions) = setup();
    let (id, rx) = connect(&mut sim, &mut sessions);
    let player = login(&mut sim, &mut sessions, id, &rx);
    drain(&rx);

    sessions.dispatch(&mut sim, id, ClientMessage::SetView { radius: 64.0 });
    let messages = drain(&rx);
    assert!(messages
        .iter()
        .any(|m| matches!(m, ServerMessage::SetViewOk { radius } if *radius == 64.0)));

    let subs = sessions.get(id).unwrap().subscriptions();
    assert_eq!(subs.len(), 125);
    for key in &subs {
        assert!((-2..=2).contains(&key.cx));
        assert!((-2..=2).contains(&key.cy));
        assert!((-2..=2).contains(&key.cz));
    }

    sessions.dispatch(
        &mut sim,
        id,
        ClientMessage::Move {
            want: Vec3::new(40.0, 0.0, 0.0),
        },
    );
    let messages = drain(&rx);

    let (success, position) = messages
        .iter()
        .find_map(|m| match m {
            ServerMessage::MoveResult {
                success, position, ..
            } => Some((*success, *position)),
            _ => None,
        })
        .expect("move_result");
    assert!(success);
    assert!((position.x - 40.0).abs() < 1e-9);

    // The player's chunk is now (1,0,0); the window re-centers.
    let subs = sessions.get(id).unwrap().subscriptions();
    assert_eq!(subs.len(), 125);
    for key in &subs {
        assert!((-1..=3).contains(&key.cx), "stale cx {}", key.cx);
    }
    assert!(!subs.iter().any(|k| k.cx == -2));

    // Exactly the 25 leading-face chunks were snapshotted.
    let snapshot_keys: Vec<ChunkKey> = messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::ChunkSnapshot { chunk_key, .. } => Some(chunk_key.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(snapshot_keys.len(), 25);
    assert!(snapshot_keys.iter().all(|k| k.cx == 3));

    // The movement itself streamed on the old and new chunks.
    assert!(messages.iter().any(|m| matches!(
        m,
        ServerMessage::ChunkDelta {
            delta: ChunkDelta::EntityRemove { entity_id },
            chunk_key,
            ..
        } if *entity_id == player && chunk_key.cx == 0
    )));
    assert!(messages.iter().any(|m| matches!(
        m,
        ServerMessage::ChunkDelta {
            delta: ChunkDelta::EntityAdd { entity_id, .. },
            chunk_key,
            ..
        } if *entity_id == player && chunk_key.cx == 1
    )));
}

/// Versions observed on the wire are strictly increasing per chunk across
/// an entire session flow.
#[test]
fn wire_versions_strictly_increase_per_chunk() {
    let (mut sim, mut sessions) = setup();
    let (id, rx) = connect(&mut sim, &mut sessions);
    login(&mut sim, &mut sessions, id, &rx);
    sessions.dispatch(&mut sim, id, ClientMessage::SetView { radius: 32.0 });
    for step in 1..=6 {
        sessions.dispatch(
            &mut sim,
            id,
            ClientMessage::Move {
                want: Vec3::new(f64::from(step) * 6.0, 0.0, 0.0),
            },
        );
    }

    let mut last_seen: HashMap<ChunkKey, u64> = HashMap::new();
    for message in drain(&rx) {
        let (key, version) = match message {
            ServerMessage::ChunkSnapshot {
                chunk_key, version, ..
            }
            | ServerMessage::ChunkDelta {
                chunk_key, version, ..
            } => (chunk_key, version),
            _ => continue,
        };
        if let Some(previous) = last_seen.get(&key) {
            assert!(
                version > *previous,
                "chunk {key}: version {version} after {previous}"
            );
        }
        last_seen.insert(key, version);
    }
    assert!(!last_seen.is_empty());
}

/// Cardinality replacement through the wire path: a second entrance
/// replaces the first, and the update is streamed to subscribers.
#[test]
fn add_contract_replaces_oldest_at_limit() {
    let (mut sim, mut sessions) = setup();
    let (id, rx) = connect(&mut sim, &mut sessions);
    let player = login(&mut sim, &mut sessions, id, &rx);
    drain(&rx);

    let entrance = |target: &str, enabled: bool| {
        Contract::Entrance(Entrance {
            target_layer: LayerId::new(target),
            target_position: Vec3::ZERO,
            enabled,
        })
    };

    sessions.dispatch(
        &mut sim,
        id,
        ClientMessage::AddContract {
            entity_id: player.clone(),
            contract: entrance("overworld", true),
        },
    );
    sessions.dispatch(
        &mut sim,
        id,
        ClientMessage::AddContract {
            entity_id: player.clone(),
            contract: entrance("nether", false),
        },
    );

    let records = sim.store.get_all(&player, ContractKind::Entrance);
    // The player archetype widens the entrance limit to 5, so both stack.
    assert_eq!(records.len(), 2);

    // Push past the override: three more entrances evict the oldest.
    for target in ["a", "b", "c", "d"] {
        sessions.dispatch(
            &mut sim,
            id,
            ClientMessage::AddContract {
                entity_id: player.clone(),
                contract: entrance(target, true),
            },
        );
    }
    let records = sim.store.get_all(&player, ContractKind::Entrance);
    assert_eq!(records.len(), 5);
    let Contract::Entrance(first) = records[0] else {
        panic!("wrong kind")
    };
    assert_eq!(first.target_layer, LayerId::new("nether"));

    // Subscribers saw entity_update deltas for the contract changes.
    let messages = drain(&rx);
    assert!(messages.iter().any(|m| matches!(
        m,
        ServerMessage::ChunkDelta {
            delta: ChunkDelta::EntityUpdate { entity_id, .. },
            ..
        } if *entity_id == player
    )));
}

/// The strict single-entrance replacement of the data model, observed on a
/// plain entity (default limit 1) driven through the simulation.
#[test]
fn default_entrance_limit_keeps_newest() {
    let (mut sim, _) = setup();
    let door = EntityId::new("door");
    sim.store
        .create(
            door.clone(),
            vec![Contract::Identity(Identity {
                id: None,
                name: "Door".to_owned(),
                description: None,
            })],
        )
        .unwrap();

    for (target, enabled) in [("overworld", true), ("nether", false)] {
        sim.store
            .add(
                &door,
                Contract::Entrance(Entrance {
                    target_layer: LayerId::new(target),
                    target_position: Vec3::ZERO,
                    enabled,
                }),
            )
            .unwrap();
    }

    let records = sim.store.get_all(&door, ContractKind::Entrance);
    assert_eq!(records.len(), 1);
    let Contract::Entrance(only) = records[0] else {
        panic!("wrong kind")
    };
    assert_eq!(only.target_layer, LayerId::new("nether"));
    assert!(!only.enabled);
}

/// Generated terrain is streamed in view subscriptions and survives
/// resubscription without duplication.
#[test]
fn generated_terrain_appears_in_snapshots() {
    let (mut sim, mut sessions) = setup();
    let (id, rx) = connect(&mut sim, &mut sessions);
    // Login auto-subscribes the player's own chunk, which is loaded (and
    // generated) before its snapshot goes out.
    sessions.dispatch(
        &mut sim,
        id,
        ClientMessage::Login {
            layer_id: None,
            player_name: None,
        },
    );
    let messages = drain(&rx);

    let origin = ChunkKey::new("default", 0, 0, 0);
    let snapshot_entities: Vec<EntityId> = messages
        .iter()
        .find_map(|m| match m {
            ServerMessage::ChunkSnapshot {
                chunk_key,
                entities,
                ..
            } if *chunk_key == origin => {
                Some(entities.iter().map(|e| e.id.clone()).collect())
            }
            _ => None,
        })
        .unwrap_or_default();

    // The origin chunk sits on the generation lattice.
    assert!(snapshot_entities
        .iter()
        .any(|e| e.as_str().starts_with("terrain-")));
}
