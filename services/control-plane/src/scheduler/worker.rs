//! Background loop that drives scheduling passes.
//!
//! Passes run on a timer and on every workload or node change, but
//! only while this replica holds the scheduler lease. Watch streams
//! that fall behind are simply reopened at the latest version; the
//! next pass re-lists everything anyway.

use std::sync::Arc;
use std::time::Duration;

use keel_api::Kind;
use keel_store::{Store, WatchStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::Scheduler;
use crate::elect::LeaderElector;

pub struct SchedulerWorker {
    scheduler: Scheduler,
    store: Arc<Store>,
    elector: Arc<LeaderElector>,
    interval: Duration,
}

impl SchedulerWorker {
    pub fn new(
        scheduler: Scheduler,
        store: Arc<Store>,
        elector: Arc<LeaderElector>,
        interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            store,
            elector,
            interval,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "Scheduler worker started");

        let mut interval = tokio::time::interval(self.interval);
        let mut workloads = self.subscribe(Kind::Workload).await;
        let mut nodes = self.subscribe(Kind::Node).await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.pass(),
                event = workloads.recv() => match event {
                    Some(_) => self.pass(),
                    None => workloads = self.subscribe(Kind::Workload).await,
                },
                event = nodes.recv() => match event {
                    Some(_) => self.pass(),
                    None => nodes = self.subscribe(Kind::Node).await,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler worker stopping");
                        break;
                    }
                }
            }
        }
    }

    fn pass(&self) {
        if !self.elector.is_leader() {
            return;
        }
        let stats = self.scheduler.schedule_once();
        if stats.writes > 0 || stats.conflicts > 0 {
            info!(
                scheduled = stats.scheduled,
                unschedulable = stats.unschedulable,
                conflicts = stats.conflicts,
                "Scheduling pass complete"
            );
        } else {
            debug!("Scheduling pass converged");
        }
    }

    /// Opens a watch from the latest version. The latest version can
    /// never be compacted away, so failure here means the store itself
    /// is unhealthy; back off and retry.
    async fn subscribe(&self, kind: Kind) -> WatchStream {
        loop {
            match self.store.watch(kind, None, self.store.latest_version()) {
                Ok(stream) => return stream,
                Err(e) => {
                    warn!(%kind, error = %e, "Failed to open watch, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}
