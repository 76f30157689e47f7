//! # Session Manager
//!
//! Binds transport connections to player entities, translates protocol
//! messages into simulation operations, and keeps each session's chunk
//! subscriptions in step with its view radius.
//!
//! ## Dispatch contract
//!
//! Per inbound frame: size guard, rate limit, parse, capability check,
//! handler. Validation failures answer the originating session only and
//! never roll back prior state; parse failures and limit violations
//! terminate the session (transport family).

use crate::config::RuntimeConfig;
use crate::events::DevEvent;
use crate::simulation::Simulation;
use meridian_shared::constants::{DEFAULT_MAX_SPEED, SERVER_ID, SERVER_VERSION};
use meridian_shared::contract::{Contract, ContractKind, MovementRules};
use meridian_shared::protocol::{ClientMessage, Direction, ErrorCode, ServerMessage};
use meridian_shared::{ChunkKey, EntityId, LayerId, SessionId, Vec3};
use meridian_world::spatial::{chunk_key_at, neighbors};
use crossbeam_channel::Sender;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

/// What the transport should do with the connection after a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Keep the connection.
    Continue,
    /// Close the connection for the given reason.
    Terminate(String),
}

/// Wire `type` tags the server recognizes; anything else is
/// `UNKNOWN_MESSAGE_TYPE`.
const KNOWN_MESSAGE_TYPES: [&str; 11] = [
    "hello",
    "login",
    "logout",
    "set_view",
    "subscribe_chunks",
    "unsubscribe_chunks",
    "move",
    "move_dir",
    "add_contract",
    "remove_contract",
    "interact",
];

/// Server-side state of one connected client.
pub struct Session {
    /// Session handle.
    pub id: SessionId,
    /// Client id announced in `hello_ok`.
    pub client_id: String,
    /// Bound player entity, after login.
    pub player: Option<EntityId>,
    /// The player's layer.
    pub layer: Option<LayerId>,
    /// View radius in world units.
    pub view_radius: f64,
    /// Last inbound activity.
    pub last_activity: Instant,
    explicit_subs: HashSet<ChunkKey>,
    auto_subs: HashSet<ChunkKey>,
    window: VecDeque<Instant>,
}

impl Session {
    fn new(id: SessionId, client_id: String) -> Self {
        Self {
            id,
            client_id,
            player: None,
            layer: None,
            view_radius: 0.0,
            last_activity: Instant::now(),
            explicit_subs: HashSet::new(),
            auto_subs: HashSet::new(),
            window: VecDeque::new(),
        }
    }

    /// Every chunk this session is subscribed to.
    #[must_use]
    pub fn subscriptions(&self) -> HashSet<ChunkKey> {
        self.explicit_subs.union(&self.auto_subs).cloned().collect()
    }
}

/// The session manager.
pub struct SessionManager {
    config: RuntimeConfig,
    sessions: HashMap<SessionId, Session>,
    next_session: u64,
    next_client: u64,
}

impl SessionManager {
    /// Creates the manager.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            next_session: 1,
            next_client: 1,
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Session handles currently alive.
    #[must_use]
    pub fn live_sessions(&self) -> HashSet<SessionId> {
        self.sessions.keys().copied().collect()
    }

    /// Borrow a session.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Accepts a connection: allocates ids, registers the outbox, and sends
    /// `hello_ok`. Returns `None` when the connection cap is reached.
    pub fn connect(
        &mut self,
        sim: &mut Simulation,
        outbox: Sender<ServerMessage>,
    ) -> Option<SessionId> {
        if self.sessions.len() >= self.config.max_concurrent_connections {
            tracing::warn!("connection refused: at capacity");
            return None;
        }
        let id = SessionId(self.next_session);
        self.next_session += 1;
        let tag: u32 = rand::random::<u32>() & 0xFFFF;
        let client_id = format!("client-{}-{tag:04x}", self.next_client);
        self.next_client += 1;

        sim.chunks.register_session(id, outbox);
        self.sessions.insert(id, Session::new(id, client_id.clone()));
        sim.chunks.send_to(
            id,
            ServerMessage::HelloOk {
                client_id,
                server_id: SERVER_ID.to_owned(),
                server_version: SERVER_VERSION.to_owned(),
            },
        );
        sim.events.publish(DevEvent::SessionConnected { session: id });
        tracing::info!(session = %id, "session connected");
        Some(id)
    }

    /// Tears a session down: despawn any bound player, drop every
    /// subscription, forget the state.
    pub fn disconnect(&mut self, sim: &mut Simulation, id: SessionId, reason: &str) {
        let Some(session) = self.sessions.remove(&id) else {
            return;
        };
        if let Some(player) = session.player {
            sim.despawn(&player);
        }
        sim.chunks.unregister_session(id);
        sim.events.publish(DevEvent::SessionClosed {
            session: id,
            reason: reason.to_owned(),
        });
        tracing::info!(session = %id, reason, "session closed");
    }

    /// Disconnects sessions that have been silent past the dead-connection
    /// timeout. Returns the handles that were dropped.
    pub fn sweep_timeouts(&mut self, sim: &mut Simulation) -> Vec<SessionId> {
        let timeout = self.config.connection_timeout();
        let dead: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.last_activity.elapsed() > timeout)
            .map(|s| s.id)
            .collect();
        for id in &dead {
            self.disconnect(sim, *id, "liveness timeout");
        }
        dead
    }

    // =========================================================================
    // Frame intake
    // =========================================================================

    /// Processes one raw inbound frame.
    pub fn handle_frame(
        &mut self,
        sim: &mut Simulation,
        id: SessionId,
        raw: &str,
    ) -> Disposition {
        if !self.sessions.contains_key(&id) {
            return Disposition::Terminate("unknown session".to_owned());
        }

        if raw.len() > self.config.max_message_size {
            self.send_error(sim, id, ErrorCode::InvalidMessage, "frame too large");
            return Disposition::Terminate("oversized frame".to_owned());
        }

        if !self.admit_frame(id) {
            return Disposition::Terminate("message rate limit exceeded".to_owned());
        }

        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                self.send_error(sim, id, ErrorCode::InvalidMessage, "malformed frame");
                return Disposition::Terminate(format!("parse failure: {err}"));
            }
        };

        let Some(message_type) = value
            .get("type")
            .and_then(|t| t.as_str())
            .map(|s| s.to_owned())
        else {
            self.send_error(sim, id, ErrorCode::InvalidMessage, "missing type field");
            return Disposition::Continue;
        };
        if !KNOWN_MESSAGE_TYPES.contains(&message_type.as_str()) {
            self.send_error(
                sim,
                id,
                ErrorCode::UnknownMessageType,
                format!("unknown message type {message_type:?}"),
            );
            return Disposition::Continue;
        }

        let message: ClientMessage = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(err) => {
                self.send_error(
                    sim,
                    id,
                    ErrorCode::InvalidMessage,
                    format!("invalid {message_type}: {err}"),
                );
                return Disposition::Continue;
            }
        };

        self.dispatch(sim, id, message);
        Disposition::Continue
    }

    /// Sliding-window message admission; also stamps activity.
    fn admit_frame(&mut self, id: SessionId) -> bool {
        let window = self.config.rate_limit_window();
        let limit = self.config.messages_per_window() as usize;
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        let now = Instant::now();
        session.last_activity = now;
        while session
            .window
            .front()
            .is_some_and(|t| now.duration_since(*t) > window)
        {
            session.window.pop_front();
        }
        if session.window.len() >= limit {
            tracing::warn!(session = %id, "rate limit exceeded");
            return false;
        }
        session.window.push_back(now);
        true
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Capability gate plus per-command routing.
    pub fn dispatch(&mut self, sim: &mut Simulation, id: SessionId, message: ClientMessage) {
        let command = message.command_name();
        if matches!(message, ClientMessage::Hello { .. }) {
            // Greeting; hello_ok already went out at connect time.
            return;
        }

        if !world_allows(sim, command) {
            self.send_error(
                sim,
                id,
                ErrorCode::Forbidden,
                format!("command {command:?} is not advertised by this world"),
            );
            return;
        }

        let player = self.sessions.get(&id).and_then(|s| s.player.clone());
        match &player {
            None if command != "login" => {
                self.send_error(
                    sim,
                    id,
                    ErrorCode::NotAuthenticated,
                    format!("{command:?} requires login"),
                );
                return;
            }
            Some(player) if !player_allows(sim, player, command) => {
                self.send_error(
                    sim,
                    id,
                    ErrorCode::PermissionDenied,
                    format!("command {command:?} is not granted to this player"),
                );
                return;
            }
            _ => {}
        }

        match message {
            ClientMessage::Hello { .. } => {}
            ClientMessage::Login {
                layer_id,
                player_name,
            } => self.handle_login(sim, id, layer_id, player_name),
            ClientMessage::Logout {} => self.handle_logout(sim, id),
            ClientMessage::SetView { radius } => self.handle_set_view(sim, id, radius),
            ClientMessage::SubscribeChunks { chunk_keys } => {
                self.handle_subscribe(sim, id, chunk_keys);
            }
            ClientMessage::UnsubscribeChunks { chunk_keys } => {
                self.handle_unsubscribe(sim, id, chunk_keys);
            }
            ClientMessage::Move { want } => self.handle_move(sim, id, want),
            ClientMessage::MoveDir { directions } => self.handle_move_dir(sim, id, &directions),
            ClientMessage::AddContract {
                entity_id,
                contract,
            } => self.handle_add_contract(sim, id, &entity_id, contract),
            ClientMessage::RemoveContract {
                entity_id,
                contract_type,
            } => self.handle_remove_contract(sim, id, &entity_id, contract_type),
            ClientMessage::Interact { action, .. } => {
                self.send_error(
                    sim,
                    id,
                    ErrorCode::NotImplemented,
                    format!("interact {action:?} is not implemented"),
                );
            }
        }
    }

    fn handle_login(
        &mut self,
        sim: &mut Simulation,
        id: SessionId,
        layer_id: Option<LayerId>,
        player_name: Option<String>,
    ) {
        if let Some(session) = self.sessions.get(&id) {
            if let (Some(player), Some(layer)) = (&session.player, &session.layer) {
                // Idempotent: a second login re-acknowledges the binding.
                let reply = ServerMessage::LoginOk {
                    player_id: player.clone(),
                    layer_id: layer.clone(),
                };
                sim.chunks.send_to(id, reply);
                return;
            }
        }

        match sim.spawn_player(layer_id.as_ref(), player_name.as_deref()) {
            Ok((player, layer)) => {
                if let Some(session) = self.sessions.get_mut(&id) {
                    session.player = Some(player.clone());
                    session.layer = Some(layer.clone());
                }
                sim.chunks.send_to(
                    id,
                    ServerMessage::LoginOk {
                        player_id: player,
                        layer_id: layer,
                    },
                );
                self.refresh_auto_subs(sim, id);
            }
            Err(err) => {
                self.send_error(sim, id, ErrorCode::JoinFailed, err.to_string());
            }
        }
    }

    fn handle_logout(&mut self, sim: &mut Simulation, id: SessionId) {
        if let Some(session) = self.sessions.get_mut(&id) {
            if let Some(player) = session.player.take() {
                session.layer = None;
                session.explicit_subs.clear();
                session.auto_subs.clear();
                sim.despawn(&player);
            }
        }
        sim.chunks.unsubscribe_all(id);
        sim.chunks.send_to(id, ServerMessage::LogoutOk {});
    }

    fn handle_set_view(&mut self, sim: &mut Simulation, id: SessionId, radius: f64) {
        if !radius.is_finite() || radius < 0.0 {
            self.send_error(
                sim,
                id,
                ErrorCode::InvalidMessage,
                "radius must be a non-negative number",
            );
            return;
        }
        if let Some(session) = self.sessions.get_mut(&id) {
            session.view_radius = radius;
        }
        self.refresh_auto_subs(sim, id);
        sim.chunks.send_to(id, ServerMessage::SetViewOk { radius });
    }

    fn handle_subscribe(&mut self, sim: &mut Simulation, id: SessionId, keys: Vec<ChunkKey>) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let fresh: Vec<ChunkKey> = keys
            .into_iter()
            .filter(|k| !session.explicit_subs.contains(k))
            .collect();
        if session.explicit_subs.len() + fresh.len() > self.config.max_subs_per_client {
            self.send_error(
                sim,
                id,
                ErrorCode::Forbidden,
                format!(
                    "subscription limit is {} chunks",
                    self.config.max_subs_per_client
                ),
            );
            return;
        }

        for key in fresh {
            sim.chunks.load(&key, &mut sim.store, &mut sim.layers);
            let already_streaming = self
                .sessions
                .get(&id)
                .is_some_and(|s| s.auto_subs.contains(&key));
            if already_streaming {
                // Already a subscriber through the view radius; just
                // re-snapshot as the explicit subscribe promises.
                sim.chunks.emit_snapshot(&sim.store, &key, id);
            } else {
                sim.chunks.subscribe(&sim.store, id, &key);
            }
            if let Some(session) = self.sessions.get_mut(&id) {
                session.explicit_subs.insert(key);
            }
        }
    }

    fn handle_unsubscribe(&mut self, sim: &mut Simulation, id: SessionId, keys: Vec<ChunkKey>) {
        for key in keys {
            let Some(session) = self.sessions.get_mut(&id) else {
                return;
            };
            if session.explicit_subs.remove(&key) && !session.auto_subs.contains(&key) {
                sim.chunks.unsubscribe(id, &key);
            }
        }
    }

    fn handle_move(&mut self, sim: &mut Simulation, id: SessionId, want: Vec3) {
        let Some(player) = self.sessions.get(&id).and_then(|s| s.player.clone()) else {
            return;
        };

        let mobility = sim
            .store
            .get(&player, ContractKind::Mobility)
            .and_then(Contract::as_mobility)
            .cloned();
        // The intent surface is speed-permissive: the dt handed to the
        // sweep exactly covers the request, so collision geometry, not
        // client pacing, is what the server arbitrates here.
        let dt = match &mobility {
            Some(m) => {
                let speed = m.max_speed.unwrap_or(DEFAULT_MAX_SPEED);
                (want - m.position).length() / speed.max(f64::EPSILON)
            }
            None => 0.0,
        };

        let outcome = sim
            .movement
            .attempt_move(&sim.store, &sim.chunks, &sim.layers, &player, want, dt);

        if let Some(mobility) = mobility {
            let old_pos = mobility.position;
            if let Some(record) = sim.store.mobility_mut(&player) {
                record.position = outcome.position;
            }
            let layer_id = self
                .sessions
                .get(&id)
                .and_then(|s| s.layer.clone())
                .unwrap_or_else(|| sim.layers.default_layer().id.clone());
            let chunk_size = sim
                .layers
                .chunk_size_of(&layer_id)
                .unwrap_or(meridian_shared::constants::DEFAULT_CHUNK_SIZE);
            sim.movement.sync_chunk(
                &sim.store,
                &mut sim.chunks,
                &layer_id,
                chunk_size,
                &player,
                old_pos,
                outcome.position,
            );
            self.refresh_auto_subs(sim, id);
        }

        sim.chunks.send_to(
            id,
            ServerMessage::MoveResult {
                success: outcome.ok,
                position: outcome.position,
                reason: outcome.reason,
            },
        );
    }

    fn handle_move_dir(&mut self, sim: &mut Simulation, id: SessionId, directions: &[Direction]) {
        let Some(player) = self.sessions.get(&id).and_then(|s| s.player.clone()) else {
            return;
        };
        let distinct: Vec<Direction> = {
            let mut seen = Vec::new();
            for d in directions {
                if !seen.contains(d) {
                    seen.push(*d);
                }
            }
            seen
        };
        if distinct.is_empty() || distinct.len() > 2 {
            self.send_error(
                sim,
                id,
                ErrorCode::InvalidMessage,
                "move_dir takes one or two distinct directions",
            );
            return;
        }

        let rules = sim
            .store
            .get(&player, ContractKind::MovementRules)
            .and_then(|c| match c {
                Contract::MovementRules(r) => Some(r.clone()),
                _ => None,
            })
            .unwrap_or(MovementRules {
                step_distance: 1.0,
                allow_diagonal: true,
                diagonal_normalized: true,
            });

        let step = rules.step_distance;
        let displacement = if distinct.len() == 2 && rules.allow_diagonal {
            let combined = distinct[0].unit() + distinct[1].unit();
            if rules.diagonal_normalized {
                combined.normalized() * step
            } else {
                combined * step
            }
        } else {
            // Diagonal disallowed: the first direction wins.
            distinct[0].unit() * step
        };

        let Some(current) = sim
            .store
            .get(&player, ContractKind::Mobility)
            .and_then(Contract::as_mobility)
            .map(|m| m.position)
        else {
            sim.chunks.send_to(
                id,
                ServerMessage::MoveResult {
                    success: false,
                    position: Vec3::ZERO,
                    reason: Some("no mobility".to_owned()),
                },
            );
            return;
        };
        self.handle_move(sim, id, current + displacement);
    }

    fn handle_add_contract(
        &mut self,
        sim: &mut Simulation,
        id: SessionId,
        entity_id: &EntityId,
        contract: Contract,
    ) {
        let player = self.sessions.get(&id).and_then(|s| s.player.clone());
        if player.as_ref() != Some(entity_id) {
            self.send_error(
                sim,
                id,
                ErrorCode::PermissionDenied,
                "sessions may only mutate their own player entity",
            );
            return;
        }
        match sim.store.add(entity_id, contract) {
            Ok(()) => self.broadcast_entity_update(sim, entity_id),
            Err(err) => {
                self.send_error(sim, id, ErrorCode::AddContractFailed, err.to_string());
            }
        }
    }

    fn handle_remove_contract(
        &mut self,
        sim: &mut Simulation,
        id: SessionId,
        entity_id: &EntityId,
        kind: ContractKind,
    ) {
        let player = self.sessions.get(&id).and_then(|s| s.player.clone());
        if player.as_ref() != Some(entity_id) {
            self.send_error(
                sim,
                id,
                ErrorCode::PermissionDenied,
                "sessions may only mutate their own player entity",
            );
            return;
        }
        if !sim.store.contains(entity_id) {
            self.send_error(sim, id, ErrorCode::RemoveContractFailed, "no such entity");
            return;
        }
        if sim.store.get(entity_id, kind).is_none() {
            self.send_error(
                sim,
                id,
                ErrorCode::ContractNotFound,
                format!("entity has no {kind} contract"),
            );
            return;
        }
        sim.store.remove_contract(entity_id, kind);
        self.broadcast_entity_update(sim, entity_id);
    }

    /// Streams an `entity_update` delta on the entity's chunk.
    fn broadcast_entity_update(&mut self, sim: &mut Simulation, entity_id: &EntityId) {
        if let Some(key) = sim.entity_chunk_key(entity_id) {
            sim.chunks.note_entity_update(&sim.store, entity_id, &key);
        }
    }

    // =========================================================================
    // View-based auto-subscription
    // =========================================================================

    /// Recomputes the desired chunk neighborhood from the player's position
    /// and view radius, then applies the set difference: unsubscribe what
    /// fell out, subscribe (with snapshot) what came in.
    pub fn refresh_auto_subs(&mut self, sim: &mut Simulation, id: SessionId) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let Some(player) = session.player.clone() else {
            return;
        };
        let Some(position) = sim
            .store
            .get(&player, ContractKind::Mobility)
            .and_then(Contract::as_mobility)
            .map(|m| m.position)
        else {
            return;
        };
        let layer_id = session
            .layer
            .clone()
            .unwrap_or_else(|| sim.layers.default_layer().id.clone());
        let chunk_size = sim
            .layers
            .chunk_size_of(&layer_id)
            .unwrap_or(meridian_shared::constants::DEFAULT_CHUNK_SIZE);
        let radius = session.view_radius;

        let center = chunk_key_at(&layer_id, position, chunk_size);
        let r = ((radius.max(0.0) / chunk_size).ceil() as i64).max(0);
        let desired: HashSet<ChunkKey> = neighbors(&center, r).into_iter().collect();

        let current = session.auto_subs.clone();
        let explicit = session.explicit_subs.clone();

        for key in current.difference(&desired) {
            if !explicit.contains(key) {
                sim.chunks.unsubscribe(id, key);
            }
        }
        for key in desired.difference(&current) {
            sim.chunks.load(key, &mut sim.store, &mut sim.layers);
            if explicit.contains(key) {
                continue; // already streaming through the explicit set
            }
            sim.chunks.subscribe(&sim.store, id, key);
        }

        if let Some(session) = self.sessions.get_mut(&id) {
            session.auto_subs = desired;
        }
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn send_error(
        &self,
        sim: &mut Simulation,
        id: SessionId,
        code: ErrorCode,
        message: impl Into<String>,
    ) {
        sim.chunks.send_to(id, ServerMessage::error(code, message));
    }
}

/// Whether the world's advertised command set (if any entity declares one)
/// covers a command.
fn world_allows(sim: &Simulation, command: &str) -> bool {
    let advertisers = sim.store.list_with(ContractKind::WorldCommands);
    if advertisers.is_empty() {
        return true;
    }
    advertisers.iter().any(|id| {
        sim.store
            .get(id, ContractKind::WorldCommands)
            .and_then(|c| match c {
                Contract::WorldCommands(w) => Some(w.commands.iter().any(|c| c == command)),
                _ => None,
            })
            .unwrap_or(false)
    })
}

/// Whether a player's `command_access` grant covers a command. A player
/// without the contract has no grants beyond `login`.
fn player_allows(sim: &Simulation, player: &EntityId, command: &str) -> bool {
    if command == "login" {
        return true;
    }
    match sim.store.get(player, ContractKind::CommandAccess) {
        Some(Contract::CommandAccess(access)) => access.commands.iter().any(|c| c == command),
        _ => false,
    }
}
