//! # Meridian Server
//!
//! The outer shell of the world server: runtime configuration, the
//! single-threaded simulation executor, the session/capability layer, the
//! tick scheduler, JSON snapshot persistence and the WebSocket transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      MERIDIAN SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ops    ┌──────────────┐                 │
//! │  │ Connection   │ ───────> │  Executor    │  ticks          │
//! │  │ threads (WS) │ <─────── │  (1 thread)  │ ───────┐        │
//! │  └──────────────┘ outboxes └──────┬───────┘        │        │
//! │                                   │                ▼        │
//! │                        ┌──────────▼─────────┐  movement,    │
//! │                        │ Simulation state   │  durability   │
//! │                        │ store·layers·chunks│               │
//! │                        └────────────────────┘               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Simulation state is owned by exactly one thread; connection threads and
//! the persistence writer only ever see channels.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod events;
pub mod harness;
pub mod persistence;
pub mod session;
pub mod simulation;
pub mod tick;
pub mod transport;

pub use config::{ConfigError, RuntimeConfig};
pub use events::{DevEvent, DevEventHub};
pub use harness::ServerHarness;
pub use session::{Disposition, Session, SessionManager};
pub use simulation::{SimError, SimStats, Simulation};
pub use tick::{TickScheduler, TickStats};
pub use transport::ServerOp;
