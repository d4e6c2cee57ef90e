//! Environment-driven configuration for the node agent.

use std::time::Duration;

use anyhow::Result;
use keel_api::Resources;

#[derive(Debug, Clone)]
pub struct Config {
    /// Name this agent registers and heartbeats under.
    pub node_name: String,
    pub control_plane_url: String,
    pub log_level: String,
    /// Total resources this node offers.
    pub capacity: Resources,
    /// Held back from capacity for the host itself; the difference is
    /// what the agent reports as allocatable.
    pub reserved: Resources,
    pub heartbeat_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let node_name = match std::env::var("KEEL_NODE_NAME") {
            Ok(name) => name,
            Err(_) => std::env::var("HOSTNAME").unwrap_or_else(|_| "node-local".to_string()),
        };

        let control_plane_url = std::env::var("KEEL_CONTROL_PLANE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());

        let log_level = std::env::var("KEEL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let capacity = Resources::new(
            env_i64("KEEL_NODE_CPU_MILLIS", 4000)?,
            env_i64("KEEL_NODE_MEMORY_BYTES", 8 << 30)?,
        );
        let reserved = Resources::new(
            env_i64("KEEL_RESERVED_CPU_MILLIS", 0)?,
            env_i64("KEEL_RESERVED_MEMORY_BYTES", 0)?,
        );

        let heartbeat_interval =
            Duration::from_secs(env_i64("KEEL_HEARTBEAT_INTERVAL_SECS", 10)? as u64);

        Ok(Self {
            node_name,
            control_plane_url,
            log_level,
            capacity,
            reserved,
            heartbeat_interval,
        })
    }

    /// What the scheduler may place against.
    pub fn allocatable(&self) -> Resources {
        self.capacity.minus(&self.reserved)
    }
}

fn env_i64(var: &str, default: i64) -> Result<i64> {
    match std::env::var(var) {
        Ok(v) => Ok(v.parse()?),
        Err(_) => Ok(default),
    }
}
