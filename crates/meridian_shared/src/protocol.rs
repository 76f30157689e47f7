//! # Wire Protocol
//!
//! Every frame crossing the transport is exactly one JSON object with a
//! `type` field. This module owns both directions of the contract:
//! client intents in, state streams out.
//!
//! ## Design rules
//!
//! 1. Every message is `Serialize + Deserialize` with a snake_case `type`
//!    tag and camelCase fields.
//! 2. Unknown fields on inbound messages are ignored; unknown `type` values
//!    are an `UNKNOWN_MESSAGE_TYPE` error, never a disconnect.
//! 3. Chunk-scoped streams carry the chunk's post-mutation version so
//!    clients can detect drop or replay.

use crate::chunk_key::{ChunkKey, LayerId};
use crate::contract::{Contract, ContractKind};
use crate::id::EntityId;
use crate::math::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A cardinal direction for discrete movement.
///
/// North is -Z, south is +Z, west is -X, east is +X.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// -Z
    North,
    /// +Z
    South,
    /// +X
    East,
    /// -X
    West,
}

impl Direction {
    /// Unit displacement of this direction on the horizontal plane.
    #[must_use]
    pub const fn unit(self) -> Vec3 {
        match self {
            Self::North => Vec3::new(0.0, 0.0, -1.0),
            Self::South => Vec3::new(0.0, 0.0, 1.0),
            Self::East => Vec3::new(1.0, 0.0, 0.0),
            Self::West => Vec3::new(-1.0, 0.0, 0.0),
        }
    }
}

/// Client-visible error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The frame was not a well-formed message object.
    InvalidMessage,
    /// The `type` tag named no known message.
    UnknownMessageType,
    /// The command is not in the world allow-list.
    Forbidden,
    /// The command requires a bound player.
    NotAuthenticated,
    /// The player's command access does not cover the command, or the
    /// session targeted an entity it does not own.
    PermissionDenied,
    /// `add_contract` was rejected by validation or cardinality.
    AddContractFailed,
    /// `remove_contract` failed.
    RemoveContractFailed,
    /// The referenced contract does not exist on the entity.
    ContractNotFound,
    /// Login could not produce a player.
    JoinFailed,
    /// The command is recognized but not implemented.
    NotImplemented,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The wire form is the display form.
        let s = serde_json::to_value(self).map_err(|_| fmt::Error)?;
        f.write_str(s.as_str().ok_or(fmt::Error)?)
    }
}

/// Messages a client may send.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Optional greeting; `hello_ok` is sent on connect regardless.
    Hello {
        /// Client build identifier.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_version: Option<String>,
    },
    /// Bind a player entity to this session.
    Login {
        /// Target layer; defaults to the default layer.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        layer_id: Option<LayerId>,
        /// Display name for the player.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_name: Option<String>,
    },
    /// Remove the bound player and all subscriptions.
    Logout {},
    /// Set the view radius in world units.
    SetView {
        /// Non-negative radius.
        radius: f64,
    },
    /// Explicitly subscribe to chunks.
    SubscribeChunks {
        /// Chunks to add.
        chunk_keys: Vec<ChunkKey>,
    },
    /// Explicitly unsubscribe from chunks.
    UnsubscribeChunks {
        /// Chunks to drop.
        chunk_keys: Vec<ChunkKey>,
    },
    /// Ask to move the player toward a position.
    Move {
        /// Desired destination.
        want: Vec3,
    },
    /// Step the player in up to two cardinal directions.
    MoveDir {
        /// At most two distinct directions.
        directions: Vec<Direction>,
    },
    /// Attach a contract to an entity.
    AddContract {
        /// Target entity.
        entity_id: EntityId,
        /// The record to attach.
        contract: Contract,
    },
    /// Detach a contract kind from an entity.
    RemoveContract {
        /// Target entity.
        entity_id: EntityId,
        /// Kind to detach.
        contract_type: ContractKind,
    },
    /// Reserved interaction verb.
    Interact {
        /// Action name.
        action: String,
        /// Optional target entity.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<EntityId>,
        /// Optional free-form payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
}

impl ClientMessage {
    /// The command name used for capability checks; identical to the wire
    /// `type` tag.
    #[must_use]
    pub const fn command_name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Login { .. } => "login",
            Self::Logout {} => "logout",
            Self::SetView { .. } => "set_view",
            Self::SubscribeChunks { .. } => "subscribe_chunks",
            Self::UnsubscribeChunks { .. } => "unsubscribe_chunks",
            Self::Move { .. } => "move",
            Self::MoveDir { .. } => "move_dir",
            Self::AddContract { .. } => "add_contract",
            Self::RemoveContract { .. } => "remove_contract",
            Self::Interact { .. } => "interact",
        }
    }
}

/// One entity's public state inside a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityState {
    /// Entity id.
    pub id: EntityId,
    /// All contracts on the entity.
    pub contracts: Vec<Contract>,
}

/// Incremental change to a chunk's membership or a member's contracts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkDelta {
    /// An entity entered the chunk.
    EntityAdd {
        /// The entity.
        entity_id: EntityId,
        /// Its contracts at entry.
        contracts: Vec<Contract>,
    },
    /// An entity left the chunk (moved away or was destroyed).
    EntityRemove {
        /// The entity.
        entity_id: EntityId,
    },
    /// A member's contract set changed.
    EntityUpdate {
        /// The entity.
        entity_id: EntityId,
        /// Its contracts after the change.
        contracts: Vec<Contract>,
    },
}

/// Messages the server may send.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once on connect.
    HelloOk {
        /// Assigned client id.
        client_id: String,
        /// Server identity.
        server_id: String,
        /// Server version string.
        server_version: String,
    },
    /// Login succeeded.
    LoginOk {
        /// The bound player entity.
        player_id: EntityId,
        /// The layer the player spawned in.
        layer_id: LayerId,
    },
    /// Logout succeeded.
    LogoutOk {},
    /// View radius applied.
    SetViewOk {
        /// The radius now in effect.
        radius: f64,
    },
    /// Full state of one chunk.
    ChunkSnapshot {
        /// The chunk.
        chunk_key: ChunkKey,
        /// Every member entity with its contracts.
        entities: Vec<EntityState>,
        /// Chunk version at snapshot time.
        version: u64,
    },
    /// Incremental chunk change.
    ChunkDelta {
        /// The chunk.
        chunk_key: ChunkKey,
        /// The change.
        delta: ChunkDelta,
        /// Post-mutation version.
        version: u64,
    },
    /// An entity appeared.
    EntitySpawn {
        /// The entity.
        entity_id: EntityId,
        /// Its contracts.
        contracts: Vec<Contract>,
        /// The chunk it appeared in.
        chunk_key: ChunkKey,
    },
    /// An entity's contracts changed.
    EntityUpdate {
        /// The entity.
        entity_id: EntityId,
        /// Its contracts after the change.
        contracts: Vec<Contract>,
        /// The chunk it occupies, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_key: Option<ChunkKey>,
    },
    /// An entity disappeared.
    EntityDespawn {
        /// The entity.
        entity_id: EntityId,
        /// The chunk it disappeared from.
        chunk_key: ChunkKey,
    },
    /// Outcome of a `move` or `move_dir`.
    MoveResult {
        /// Whether the full displacement was applied.
        success: bool,
        /// The authoritative position after the attempt.
        position: Vec3,
        /// Why movement stopped short, when it did.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// A request failed.
    Error {
        /// Machine-readable code.
        code: ErrorCode,
        /// Human-readable explanation.
        message: String,
    },
}

impl ServerMessage {
    /// Convenience constructor for error replies.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}
