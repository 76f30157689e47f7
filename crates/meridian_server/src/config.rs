//! # Runtime Configuration
//!
//! One immutable record, read once at startup. Every recognized option has
//! a serde default, so a config file only needs to state what it changes;
//! nothing here is mutable at runtime.

use meridian_world::{ChunkConfig, MovementConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Failure to load the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The file was not valid TOML for this schema.
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// The server's runtime configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Address the WebSocket listener binds.
    pub bind_address: String,

    // --- world ---
    /// Default horizontal chunk size for new layers.
    pub chunk_size: f64,
    /// Cap on simultaneously loaded chunks.
    pub max_loaded_chunks: usize,
    /// Cap on retained chunk metadata entries.
    pub max_retained_chunks: usize,
    /// Base chunk unload delay in milliseconds.
    pub chunk_unload_delay_ms: u64,

    // --- tick ---
    /// Target simulation rate in ticks per second.
    pub target_fps: u32,
    /// Clamp on the per-tick delta time, in milliseconds.
    pub max_delta_time_ms: u64,
    /// Disables the tick loop entirely (event-driven mode).
    pub tick_rate_disabled: bool,

    // --- sessions ---
    /// Heartbeat interval in milliseconds.
    pub ws_heartbeat_ms: u64,
    /// Dead-connection timeout in milliseconds (two missed heartbeats).
    pub ws_connection_timeout_ms: u64,
    /// Cap on explicit chunk subscriptions per client.
    pub max_subs_per_client: usize,
    /// Cap on one inbound frame's size in bytes.
    pub max_message_size: usize,
    /// Cap on inbound messages per second per session.
    pub max_messages_per_second: u32,
    /// Cap on concurrent connections.
    pub max_concurrent_connections: usize,
    /// Rate-limit window in milliseconds.
    pub rate_limit_window_ms: u64,
    /// Overrides `max_messages_per_second` per window when set.
    pub rate_limit_max_requests: Option<u32>,

    // --- physics ---
    /// Gravity for the default layer.
    pub gravity: f64,
    /// Terminal fall speed.
    pub terminal_velocity: f64,
    /// Grounded friction multiplier per second.
    pub ground_friction: f64,
    /// Airborne friction multiplier per second.
    pub air_friction: f64,
    /// Collision back-off epsilon.
    pub collision_epsilon: f64,

    // --- persistence ---
    /// Directory for snapshots; persistence is disabled when unset.
    pub data_directory: Option<PathBuf>,
    /// Auto-save interval in milliseconds.
    pub auto_save_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7777".to_owned(),
            chunk_size: 32.0,
            max_loaded_chunks: 1000,
            max_retained_chunks: 20000,
            chunk_unload_delay_ms: 60_000,
            target_fps: 60,
            max_delta_time_ms: 100,
            tick_rate_disabled: false,
            ws_heartbeat_ms: 30_000,
            ws_connection_timeout_ms: 60_000,
            max_subs_per_client: 100,
            max_message_size: 65_536,
            max_messages_per_second: 60,
            max_concurrent_connections: 500,
            rate_limit_window_ms: 1_000,
            rate_limit_max_requests: None,
            gravity: -9.81,
            terminal_velocity: -53.0,
            ground_friction: 0.8,
            air_friction: 0.98,
            collision_epsilon: 0.001,
            data_directory: None,
            auto_save_interval_ms: 300_000,
        }
    }
}

impl RuntimeConfig {
    /// Loads the configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] on I/O or parse failure.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Tick interval implied by `target_fps`.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.target_fps.max(1)))
    }

    /// Delta-time clamp as a duration.
    #[must_use]
    pub fn max_delta_time(&self) -> Duration {
        Duration::from_millis(self.max_delta_time_ms)
    }

    /// Dead-connection timeout.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.ws_connection_timeout_ms)
    }

    /// Messages allowed per rate-limit window.
    #[must_use]
    pub fn messages_per_window(&self) -> u32 {
        self.rate_limit_max_requests
            .unwrap_or(self.max_messages_per_second)
    }

    /// Rate-limit window length.
    #[must_use]
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    /// The chunk manager tuning implied by this configuration.
    #[must_use]
    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            max_loaded: self.max_loaded_chunks,
            max_retained: self.max_retained_chunks,
            unload_delay: Duration::from_millis(self.chunk_unload_delay_ms),
        }
    }

    /// The movement tuning implied by this configuration.
    #[must_use]
    pub fn movement_config(&self) -> MovementConfig {
        MovementConfig {
            terminal_velocity: self.terminal_velocity,
            ground_friction: self.ground_friction,
            air_friction: self.air_friction,
            collision_epsilon: self.collision_epsilon,
            ..MovementConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.chunk_size, 32.0);
        assert_eq!(config.target_fps, 60);
        assert_eq!(config.max_loaded_chunks, 1000);
        assert_eq!(config.max_message_size, 65_536);
        assert!(!config.tick_rate_disabled);
        assert_eq!(config.tick_interval(), Duration::from_micros(16_666));
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: RuntimeConfig =
            toml::from_str("target_fps = 30\nmax_subs_per_client = 10\n").unwrap();
        assert_eq!(config.target_fps, 30);
        assert_eq!(config.max_subs_per_client, 10);
        // Untouched options keep their defaults.
        assert_eq!(config.gravity, -9.81);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let parsed: Result<RuntimeConfig, _> = toml::from_str("no_such_option = 1\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_rate_limit_override() {
        let config: RuntimeConfig = toml::from_str("rate_limit_max_requests = 10\n").unwrap();
        assert_eq!(config.messages_per_window(), 10);
        let default = RuntimeConfig::default();
        assert_eq!(default.messages_per_window(), 60);
    }
}
