//! # Server Harness
//!
//! Wires the pieces together and runs the single-threaded simulation
//! executor: posted operations from the transport, the fixed-rate tick,
//! periodic maintenance, heartbeat sweeps, and auto-save.
//!
//! All simulation mutation happens on the thread running [`ServerHarness::run`];
//! the listener and connection threads only ever touch channels.

use crate::config::RuntimeConfig;
use crate::events::DevEventHub;
use crate::persistence;
use crate::session::{Disposition, SessionManager};
use crate::simulation::Simulation;
use crate::tick::TickScheduler;
use crate::transport::{run_listener, ServerOp};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cadence of the maintenance pass (eviction, subscriber pruning).
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

/// The assembled server.
pub struct ServerHarness {
    config: RuntimeConfig,
    /// The simulation state (public for embedding and tests).
    pub sim: Simulation,
    /// The session layer.
    pub sessions: SessionManager,
    /// Timing of the most recent run's ticks, for the stats surface.
    pub tick_stats: crate::tick::TickStats,
    events: Arc<DevEventHub>,
    ops_tx: Sender<ServerOp>,
    ops_rx: Receiver<ServerOp>,
}

impl ServerHarness {
    /// Builds the harness from configuration.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let events = Arc::new(DevEventHub::new());
        let sim = Simulation::new(&config, Arc::clone(&events));
        let sessions = SessionManager::new(config.clone());
        let (ops_tx, ops_rx) = unbounded();
        Self {
            config,
            sim,
            sessions,
            tick_stats: crate::tick::TickStats::default(),
            events,
            ops_tx,
            ops_rx,
        }
    }

    /// The op channel the transport posts into.
    #[must_use]
    pub fn ops_sender(&self) -> Sender<ServerOp> {
        self.ops_tx.clone()
    }

    /// Loads the snapshot from the data directory, when one exists.
    pub fn restore(&mut self) {
        let Some(path) = self.snapshot_path() else {
            return;
        };
        if !path.exists() {
            return;
        }
        match persistence::read_from_file(&path) {
            Ok(document) => {
                if let Err(err) = persistence::load(&mut self.sim, &document) {
                    tracing::error!(%err, "snapshot restore failed");
                }
            }
            Err(err) => tracing::error!(%err, "snapshot unreadable"),
        }
    }

    fn snapshot_path(&self) -> Option<std::path::PathBuf> {
        self.config
            .data_directory
            .as_ref()
            .map(|dir| dir.join("world.json"))
    }

    /// Spawns the WebSocket listener thread.
    pub fn start_listener(&self) {
        let bind_address = self.config.bind_address.clone();
        let ops = self.ops_sender();
        std::thread::spawn(move || {
            if let Err(err) = run_listener(&bind_address, ops) {
                tracing::error!(%err, "listener failed");
            }
        });
    }

    /// Runs the executor until `shutdown` flips. This is the simulation
    /// thread: every operation, tick and maintenance pass runs here, one
    /// at a time.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        let mut scheduler =
            TickScheduler::new(self.config.target_fps, self.config.max_delta_time());
        let mut last_maintenance = Instant::now();
        let mut last_heartbeat_sweep = Instant::now();
        let mut last_autosave = Instant::now();
        let heartbeat = Duration::from_millis(self.config.ws_heartbeat_ms);
        let autosave = Duration::from_millis(self.config.auto_save_interval_ms);

        tracing::info!(
            tick_rate_disabled = self.config.tick_rate_disabled,
            target_fps = self.config.target_fps,
            "executor running"
        );

        while !shutdown.load(Ordering::Relaxed) {
            // Drain posted operations.
            match self.ops_rx.recv_timeout(Duration::from_millis(1)) {
                Ok(op) => {
                    self.handle_op(op);
                    while let Ok(op) = self.ops_rx.try_recv() {
                        self.handle_op(op);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            // Tick (unless the world is purely event-driven). A tick that
            // panics is logged and counted; the executor survives.
            if !self.config.tick_rate_disabled && scheduler.should_tick() {
                let (started, dt) = scheduler.begin_tick();
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    self.sim.tick(dt);
                }));
                if outcome.is_err() {
                    self.sim.note_tick_error();
                    tracing::error!(dt, "tick panicked; state may be partially advanced");
                }
                scheduler.end_tick(started);
                self.tick_stats = *scheduler.stats();
            }

            if last_heartbeat_sweep.elapsed() >= heartbeat {
                last_heartbeat_sweep = Instant::now();
                self.sessions.sweep_timeouts(&mut self.sim);
            }

            if last_maintenance.elapsed() >= MAINTENANCE_INTERVAL {
                last_maintenance = Instant::now();
                self.sim.maintenance(&self.sessions.live_sessions());
            }

            if last_autosave.elapsed() >= autosave {
                last_autosave = Instant::now();
                self.autosave();
            }
        }

        self.autosave();
        self.events.close();
        tracing::info!("executor stopped");
    }

    fn handle_op(&mut self, op: ServerOp) {
        match op {
            ServerOp::Connect { outbox, reply } => {
                let assigned = self.sessions.connect(&mut self.sim, outbox);
                let _ = reply.send(assigned);
            }
            ServerOp::Frame { session, text } => {
                match self.sessions.handle_frame(&mut self.sim, session, &text) {
                    Disposition::Continue => {}
                    Disposition::Terminate(reason) => {
                        self.sessions.disconnect(&mut self.sim, session, &reason);
                    }
                }
            }
            ServerOp::Disconnect { session, reason } => {
                self.sessions.disconnect(&mut self.sim, session, &reason);
            }
        }
    }

    /// Snapshot on the executor, file write off it.
    fn autosave(&mut self) {
        let Some(path) = self.snapshot_path() else {
            return;
        };
        let document = persistence::save(&self.sim);
        std::thread::spawn(move || {
            if let Err(err) = persistence::write_to_file(&document, &path) {
                tracing::error!(%err, "auto-save failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use meridian_shared::protocol::ServerMessage;

    #[test]
    fn test_connect_and_frame_ops() {
        let mut harness = ServerHarness::new(RuntimeConfig::default());
        let (outbox_tx, outbox_rx) = bounded(64);
        let (reply_tx, reply_rx) = bounded(1);

        harness.handle_op(ServerOp::Connect {
            outbox: outbox_tx,
            reply: reply_tx,
        });
        let session = reply_rx.try_recv().unwrap().unwrap();
        assert!(matches!(
            outbox_rx.try_recv().unwrap(),
            ServerMessage::HelloOk { .. }
        ));

        harness.handle_op(ServerOp::Frame {
            session,
            text: r#"{"type":"login"}"#.to_owned(),
        });
        assert!(matches!(
            outbox_rx.try_recv().unwrap(),
            ServerMessage::LoginOk { .. }
        ));

        harness.handle_op(ServerOp::Disconnect {
            session,
            reason: "test over".to_owned(),
        });
        assert!(harness.sessions.is_empty());
    }

    #[test]
    fn test_run_stops_on_shutdown_flag() {
        let mut harness = ServerHarness::new(RuntimeConfig::default());
        let shutdown = AtomicBool::new(true);
        // Flag already set: run returns after one pass.
        harness.run(&shutdown);
    }
}
