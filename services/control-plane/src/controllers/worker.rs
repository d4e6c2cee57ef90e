//! Controller manager: drives every controller's reconcile loop.
//!
//! Each controller gets its own task with a resync timer and a change
//! trigger fed by watches on its kinds. Triggers coalesce through a
//! one-slot channel, so a burst of changes costs one extra pass, not
//! one pass per event. Passes run only while this replica holds the
//! controller-manager lease.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use keel_api::Kind;
use keel_store::Store;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{Backoff, Controller};
use crate::elect::LeaderElector;

pub struct ControllerManager {
    store: Arc<Store>,
    elector: Arc<LeaderElector>,
    resync_interval: Duration,
    controllers: Vec<Arc<dyn Controller>>,
}

impl ControllerManager {
    pub fn new(store: Arc<Store>, elector: Arc<LeaderElector>, resync_interval: Duration) -> Self {
        Self {
            store,
            elector,
            resync_interval,
            controllers: Vec::new(),
        }
    }

    pub fn register(mut self, controller: Arc<dyn Controller>) -> Self {
        self.controllers.push(controller);
        self
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(
            controllers = self.controllers.len(),
            resync = ?self.resync_interval,
            "Controller manager started"
        );

        let mut tasks = JoinSet::new();
        for controller in self.controllers {
            tasks.spawn(run_controller(
                self.store.clone(),
                self.elector.clone(),
                controller,
                self.resync_interval,
                shutdown.clone(),
            ));
        }
        while tasks.join_next().await.is_some() {}
        info!("Controller manager stopped");
    }
}

async fn run_controller(
    store: Arc<Store>,
    elector: Arc<LeaderElector>,
    controller: Arc<dyn Controller>,
    resync_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = controller.name();
    info!(controller = name, "Controller loop started");

    // Capacity 1: concurrent changes fold into a single pending pass.
    let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);
    let mut pumps = JoinSet::new();
    for kind in controller.watched_kinds() {
        pumps.spawn(pump_watch(
            store.clone(),
            *kind,
            trigger_tx.clone(),
            shutdown.clone(),
        ));
    }
    drop(trigger_tx);

    let backoff = Backoff::new(Duration::from_millis(200), Duration::from_secs(30));
    let mut interval = tokio::time::interval(resync_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            received = trigger_rx.recv() => {
                if received.is_none() {
                    break;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        if !elector.is_leader() {
            continue;
        }

        let stats = controller.reconcile_all(Utc::now());
        if stats.errors > 0 {
            let delay = backoff.next_delay(name);
            warn!(
                controller = name,
                errors = stats.errors,
                ?delay,
                "Reconcile pass had errors, backing off"
            );
            tokio::time::sleep(delay).await;
        } else {
            backoff.reset(name);
            if stats.writes > 0 || stats.conflicts > 0 {
                info!(
                    controller = name,
                    writes = stats.writes,
                    conflicts = stats.conflicts,
                    "Reconcile pass complete"
                );
            } else {
                debug!(controller = name, "Reconcile pass converged");
            }
        }
    }

    pumps.shutdown().await;
    info!(controller = name, "Controller loop stopped");
}

/// Forwards watch events for one kind into the trigger channel,
/// reopening the stream whenever it ends.
async fn pump_watch(
    store: Arc<Store>,
    kind: Kind,
    trigger: mpsc::Sender<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let mut stream = match store.watch(kind, None, store.latest_version()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%kind, error = %e, "Failed to open watch, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        loop {
            tokio::select! {
                event = stream.recv() => {
                    match event {
                        // A full channel already has a pass pending.
                        Some(_) => { let _ = trigger.try_send(()); }
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
