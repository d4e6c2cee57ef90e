//! keel Control Plane
//!
//! The control plane is the central coordination service for the
//! cluster. It serves the object API, runs the scheduler, and drives
//! the controllers that reconcile desired vs observed state.

use std::sync::Arc;

use anyhow::Result;
use keel_control_plane::{
    api, config,
    controllers::{ControllerManager, JobController, NodeController, ReplicaSetController},
    elect::LeaderElector,
    scheduler::{Scheduler, SchedulerWorker},
    state::AppState,
};
use keel_store::Store;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to KEEL_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting keel control plane");
    info!(listen_addr = %config.listen_addr, identity = %config.identity, "Configuration loaded");

    // Open the object store, replaying the append-only log if one is
    // configured.
    let store = match &config.store_path {
        Some(path) => {
            let store = Store::open(path)?;
            info!(path = %path.display(), version = store.latest_version(), "Store log replayed");
            Arc::new(store)
        }
        None => {
            warn!("No KEEL_STORE_PATH set, running with an in-memory store");
            Arc::new(Store::new())
        }
    };

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Leader electors: the scheduler and the controller manager hold
    // separate leases so they can fail over independently.
    let scheduler_elector = Arc::new(LeaderElector::new(
        store.clone(),
        "scheduler",
        config.identity.clone(),
        config.lease_duration,
    ));
    let controller_elector = Arc::new(LeaderElector::new(
        store.clone(),
        "controller-manager",
        config.identity.clone(),
        config.lease_duration,
    ));

    let scheduler_elect_handle = tokio::spawn({
        let elector = scheduler_elector.clone();
        let shutdown_rx = shutdown_rx.clone();
        async move { elector.run(shutdown_rx).await }
    });
    let controller_elect_handle = tokio::spawn({
        let elector = controller_elector.clone();
        let shutdown_rx = shutdown_rx.clone();
        async move { elector.run(shutdown_rx).await }
    });

    // Start scheduler worker in background
    let scheduler_worker = SchedulerWorker::new(
        Scheduler::new(store.clone()),
        store.clone(),
        scheduler_elector,
        config.scheduler_interval,
    );
    let scheduler_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { scheduler_worker.run(shutdown_rx).await }
    });

    // Start controller manager in background
    let manager = ControllerManager::new(
        store.clone(),
        controller_elector,
        config.controller_resync_interval,
    )
    .register(Arc::new(ReplicaSetController::new(store.clone())))
    .register(Arc::new(JobController::new(store.clone())))
    .register(Arc::new(NodeController::new(
        store.clone(),
        config.node_not_ready_grace,
        config.node_eviction_grace,
    )));
    let manager_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { manager.run(shutdown_rx).await }
    });

    // Periodic bookmarks keep idle watch clients' resume points fresh.
    let bookmark_handle = tokio::spawn({
        let store = store.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        let mut interval = tokio::time::interval(config.bookmark_interval);
        async move {
            loop {
                tokio::select! {
                    _ = interval.tick() => store.broadcast_bookmark(),
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }
    });

    // Periodic log compaction bounds replay time after a restart.
    let compact_handle = tokio::spawn({
        let store = store.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        let mut interval = tokio::time::interval(config.compact_interval);
        async move {
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = store.compact_log() {
                            warn!(error = %e, "Log compaction failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }
    });

    // Build and run the server
    let state = AppState::new(store);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    // Wait for workers to finish
    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    for (name, handle) in [
        ("Scheduler worker", scheduler_handle),
        ("Controller manager", manager_handle),
        ("Bookmark task", bookmark_handle),
        ("Compaction task", compact_handle),
        ("Scheduler elector", scheduler_elect_handle),
        ("Controller elector", controller_elect_handle),
    ] {
        if let Err(e) = tokio::time::timeout(shutdown_timeout, handle).await {
            warn!(worker = name, error = %e, "Worker did not shut down in time");
        }
    }

    info!("Control plane shutdown complete");
    Ok(())
}
