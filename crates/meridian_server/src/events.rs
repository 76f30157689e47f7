//! # Dev Event Hub
//!
//! Explicit publish/subscribe for development tooling (visualizers, test
//! probes). The hub is created at startup and injected into the simulation
//! rather than living as a process global; it is closed after the last
//! session disconnects at shutdown.
//!
//! Subscribers get bounded channels; a full subscriber loses events rather
//! than ever stalling the simulation.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use meridian_shared::{EntityId, LayerId, SessionId};
use parking_lot::Mutex;

/// Capacity of each subscriber channel.
const SUBSCRIBER_CAPACITY: usize = 1024;

/// Simulation lifecycle events for tooling.
#[derive(Clone, Debug)]
pub enum DevEvent {
    /// An entity was created.
    EntitySpawned {
        /// The entity.
        entity: EntityId,
        /// Layer it spawned into.
        layer: LayerId,
    },
    /// An entity was destroyed or removed.
    EntityDestroyed {
        /// The entity.
        entity: EntityId,
    },
    /// Damage landed.
    DamageApplied {
        /// The damaged entity.
        entity: EntityId,
        /// Damage after armor.
        actual: f64,
        /// Whether the hit destroyed the entity.
        destroyed: bool,
    },
    /// A session connected.
    SessionConnected {
        /// The session.
        session: SessionId,
    },
    /// A session closed.
    SessionClosed {
        /// The session.
        session: SessionId,
        /// Why it closed.
        reason: String,
    },
    /// A layer was created.
    LayerCreated {
        /// The layer.
        layer: LayerId,
    },
}

/// The hub.
#[derive(Default)]
pub struct DevEventHub {
    subscribers: Mutex<Vec<Sender<DevEvent>>>,
}

impl DevEventHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new subscription.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<DevEvent> {
        let (tx, rx) = bounded(SUBSCRIBER_CAPACITY);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Publishes an event to every live subscriber. Full subscribers drop
    /// the event; disconnected subscribers are pruned.
    pub fn publish(&self, event: DevEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Drops every subscription (shutdown).
    pub fn close(&self) {
        self.subscribers.lock().clear();
    }
}
