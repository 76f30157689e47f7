//! Meridian world server entry point.
//!
//! Usage: `meridian-server [config.toml]`

use meridian_server::{RuntimeConfig, ServerHarness};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => match RuntimeConfig::from_toml_file(Path::new(&path)) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(%err, path, "cannot load configuration");
                std::process::exit(1);
            }
        },
        None => RuntimeConfig::default(),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        // Best-effort Ctrl-C handling without a signal crate: the executor
        // also flushes a snapshot when the flag flips.
        let _ = std::thread::Builder::new()
            .name("shutdown-watch".to_owned())
            .spawn(move || {
                let mut line = String::new();
                // EOF on stdin (service managers close it) triggers shutdown.
                let _ = std::io::stdin().read_line(&mut line);
                shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
            });
    }

    let mut harness = ServerHarness::new(config);
    harness.restore();
    harness.start_listener();
    harness.run(&shutdown);
}
