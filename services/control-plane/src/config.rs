//! Environment-driven configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    /// Append-only store log; None runs the store in memory.
    pub store_path: Option<PathBuf>,
    /// Identity this replica campaigns with for leader election.
    pub identity: String,
    pub lease_duration: Duration,
    pub scheduler_interval: Duration,
    pub controller_resync_interval: Duration,
    /// Missed heartbeats past this mark a node NotReady.
    pub node_not_ready_grace: Duration,
    /// Missed heartbeats past this trigger eviction of bound workloads.
    pub node_eviction_grace: Duration,
    pub bookmark_interval: Duration,
    /// How often the append-only store log is rewritten down to one
    /// record per live object.
    pub compact_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("KEEL_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()?;

        let log_level = std::env::var("KEEL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let store_path = std::env::var("KEEL_STORE_PATH").ok().map(PathBuf::from);

        let identity = std::env::var("KEEL_IDENTITY").unwrap_or_else(|_| {
            let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "control-plane".to_string());
            format!("{host}-{}", keel_id::RequestId::new())
        });

        Ok(Self {
            listen_addr,
            log_level,
            store_path,
            identity,
            lease_duration: env_secs("KEEL_LEASE_DURATION_SECS", 15)?,
            scheduler_interval: env_secs("KEEL_SCHEDULER_INTERVAL_SECS", 5)?,
            controller_resync_interval: env_secs("KEEL_CONTROLLER_RESYNC_SECS", 30)?,
            node_not_ready_grace: env_secs("KEEL_NODE_NOT_READY_GRACE_SECS", 40)?,
            node_eviction_grace: env_secs("KEEL_NODE_EVICTION_GRACE_SECS", 120)?,
            bookmark_interval: env_secs("KEEL_BOOKMARK_INTERVAL_SECS", 60)?,
            compact_interval: env_secs("KEEL_COMPACT_INTERVAL_SECS", 300)?,
        })
    }
}

fn env_secs(var: &str, default: u64) -> Result<Duration> {
    let secs = match std::env::var(var) {
        Ok(v) => v.parse()?,
        Err(_) => default,
    };
    Ok(Duration::from_secs(secs))
}
