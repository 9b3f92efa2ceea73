//! Server configuration.

use comet_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the comet gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// How often the scheduler runs expiry/reap processing, in seconds.
    pub tick_interval_secs: u64,
    /// Delivery engine tunables.
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 256,
            max_message_size: 1024 * 1024, // 1 MB
            tick_interval_secs: 1,
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Scheduler cadence.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}
