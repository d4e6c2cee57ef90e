//! keel Node Agent
//!
//! The node agent runs on each worker host. It registers the node with
//! the control plane, heartbeats its status, and converges the host to
//! the set of workloads the scheduler has bound here.
//!
//! ## Architecture
//!
//! - **Heartbeat Loop**: Renews node status so the node controller
//!   keeps the node schedulable
//! - **Workload Syncer**: List-then-watch over bound workloads, driving
//!   phase transitions through the runtime
//! - **Runtime**: Abstracts workload execution (null runtime until a
//!   real executor is wired in)

use std::sync::Arc;

use anyhow::Result;
use keel_api::NodeSpec;
use keel_node_agent::{
    client::ControlPlaneClient,
    config,
    heartbeat,
    runtime::NullRuntime,
    sync::WorkloadSyncer,
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting keel node agent");

    // Load configuration
    let config = config::Config::from_env()?;
    info!(
        node = %config.node_name,
        control_plane_url = %config.control_plane_url,
        capacity = ?config.capacity,
        "Configuration loaded"
    );

    let client = Arc::new(ControlPlaneClient::new(&config));

    // Register (or re-adopt) this node before anything else runs.
    let node = client
        .register_node(NodeSpec {
            capacity: config.capacity,
            ..Default::default()
        })
        .await?;
    info!(
        node = %node.metadata.name,
        resource_version = node.metadata.resource_version,
        "Node registered"
    );

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start the heartbeat loop
    let heartbeat_handle = tokio::spawn({
        let config = config.clone();
        let client = Arc::clone(&client);
        let shutdown_rx = shutdown_rx.clone();
        async move { heartbeat::run_heartbeat_loop(config, client, shutdown_rx).await }
    });

    // Start the workload sync loop
    let syncer = WorkloadSyncer::new(Arc::clone(&client), Arc::new(NullRuntime));
    let syncer_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { syncer.run(shutdown_rx).await }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = heartbeat_handle => {
            match result {
                Ok(Ok(())) => info!("Heartbeat loop exited normally"),
                Ok(Err(e)) => error!(error = %e, "Heartbeat loop error"),
                Err(e) => error!(error = %e, "Heartbeat task panicked"),
            }
        }
        _ = syncer_handle => {
            info!("Workload syncer exited");
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    // Give workers time to shut down gracefully
    info!("Waiting for workers to shut down...");
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    info!("Node agent shutdown complete");
    Ok(())
}
