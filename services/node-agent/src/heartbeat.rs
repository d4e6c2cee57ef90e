//! Heartbeat loop for reporting node status to the control plane.
//!
//! Each beat rewrites this node's status: a fresh `lastHeartbeat`, a
//! Ready condition, and the allocatable resources. The control plane's
//! node controller judges freshness; the agent just keeps writing.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use keel_api::{NodeCondition, NodeReadiness};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::client::ControlPlaneClient;
use crate::config::Config;

/// Run the heartbeat loop until shutdown.
pub async fn run_heartbeat_loop(
    config: Config,
    client: Arc<ControlPlaneClient>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!(
        node = %config.node_name,
        interval = ?config.heartbeat_interval,
        "Starting heartbeat loop"
    );

    let mut consecutive_failures = 0u32;
    let mut interval_timer = tokio::time::interval(config.heartbeat_interval);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                match beat(&config, &client).await {
                    Ok(resource_version) => {
                        consecutive_failures = 0;
                        debug!(resource_version, "Heartbeat acknowledged");
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        if consecutive_failures <= 3 {
                            warn!(error = %e, consecutive_failures, "Heartbeat failed");
                        } else {
                            error!(error = %e, consecutive_failures, "Heartbeat failed repeatedly");
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Heartbeat loop shutting down");
                    break;
                }
            }
        }
    }

    Ok(())
}

/// One heartbeat: fetch-modify-update against the current version. A
/// CAS conflict surfaces as an error and the next beat retries against
/// a fresh read.
async fn beat(config: &Config, client: &ControlPlaneClient) -> Result<u64> {
    let mut node = client.get_node().await?;
    let now = Utc::now();

    if let Some((_, status)) = node.as_node_mut() {
        status.allocatable = config.allocatable();
        status.last_heartbeat = Some(now);
        // Only a readiness change moves the transition timestamp.
        if status.condition.readiness != NodeReadiness::Ready {
            status.condition = NodeCondition::new(NodeReadiness::Ready, now);
        }
    }

    let updated = client.update_node(&node).await?;
    Ok(updated.metadata.resource_version)
}
