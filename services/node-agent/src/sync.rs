//! Workload sync loop: list-then-watch the workloads bound to this
//! node and drive their lifecycle through the runtime.
//!
//! The loop is level-triggered. Every (re)connect starts from a full
//! list, so a dropped or expired watch costs one relist and nothing
//! else. Phase transitions are CAS writes; a conflict is abandoned and
//! the next event or relist carries the fresh version.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use keel_api::{Object, ObjectKey, WatchEventType, WorkloadPhase};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::ControlPlaneClient;
use crate::runtime::{RuntimeState, WorkloadRuntime};

/// Finalizer this agent holds on workloads it has started, so graceful
/// deletion waits for the runtime to stop them.
pub const RUNTIME_FINALIZER: &str = "keel.dev/runtime";

pub struct WorkloadSyncer {
    client: Arc<ControlPlaneClient>,
    runtime: Arc<dyn WorkloadRuntime>,
    /// Workloads the runtime has been told to start, keyed by object.
    /// The stored copy is what we hand back to `stop` once the object
    /// is gone from the control plane.
    started: HashMap<ObjectKey, Object>,
}

impl WorkloadSyncer {
    pub fn new(client: Arc<ControlPlaneClient>, runtime: Arc<dyn WorkloadRuntime>) -> Self {
        Self {
            client,
            runtime,
            started: HashMap::new(),
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(node = %self.client.node_name(), "Workload sync loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let resume_from = match self.relist().await {
                Ok(version) => version,
                Err(e) => {
                    warn!(error = %e, "Relist failed, retrying");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
            };

            let mut connection = match self.client.watch_bound_workloads(resume_from).await {
                Ok(connection) => connection,
                Err(e) => {
                    warn!(error = %e, "Watch failed to open, retrying");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
            };

            loop {
                tokio::select! {
                    event = connection.next_event() => {
                        match event {
                            Ok(Some(event)) => {
                                if event.event_type == WatchEventType::Bookmark {
                                    continue;
                                }
                                if let Some(object) = event.object {
                                    self.sync_one(object, event.event_type).await;
                                }
                            }
                            Ok(None) => {
                                debug!("Watch stream ended, relisting");
                                break;
                            }
                            Err(e) => {
                                warn!(error = %e, "Watch stream failed, relisting");
                                break;
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("Workload sync loop shutting down");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Full resync: reconcile everything currently bound here and
    /// return the version to watch from.
    async fn relist(&mut self) -> Result<u64> {
        let list = self.client.list_bound_workloads().await?;

        let current: HashSet<ObjectKey> = list.items.iter().map(Object::key).collect();
        self.forget_missing(&current).await;

        for object in list.items {
            self.sync_one(object, WatchEventType::Modified).await;
        }
        Ok(list.resource_version)
    }

    /// Anything we started that is no longer bound here was deleted
    /// while we were away; the runtime must not keep running it.
    async fn forget_missing(&mut self, current: &HashSet<ObjectKey>) {
        let orphaned: Vec<ObjectKey> = self
            .started
            .keys()
            .filter(|k| !current.contains(*k))
            .cloned()
            .collect();
        for key in orphaned {
            if let Some(workload) = self.started.remove(&key) {
                if let Err(e) = self.runtime.stop(&workload).await {
                    warn!(workload = %key, error = %e, "Stop failed for removed workload");
                }
                debug!(workload = %key, "Workload gone, stopped and forgotten");
            }
        }
    }

    /// Reconcile a single workload against what the runtime knows.
    async fn sync_one(&mut self, workload: Object, event_type: WatchEventType) {
        let key = workload.key();
        let Some((_, status)) = workload.as_workload() else {
            return;
        };
        let phase = status.phase;

        if event_type == WatchEventType::Deleted {
            if self.started.remove(&key).is_some() {
                if let Err(e) = self.runtime.stop(&workload).await {
                    warn!(workload = %key, error = %e, "Stop failed for deleted workload");
                }
                info!(workload = %key, "Workload stopped after deletion");
            }
            return;
        }

        if workload.metadata.is_deleting() {
            if let Err(e) = self.stop_and_release(&workload).await {
                warn!(workload = %key, error = %e, "Teardown failed, will retry");
            }
            return;
        }

        match phase {
            WorkloadPhase::Scheduled => {
                if let Err(e) = self.start(&workload).await {
                    warn!(workload = %key, error = %e, "Start failed, will retry");
                }
            }
            WorkloadPhase::Running => {
                // Agent restarted underneath a running workload;
                // re-adopt it.
                self.started
                    .entry(key.clone())
                    .or_insert_with(|| workload.clone());
                if let Err(e) = self.observe(&workload).await {
                    warn!(workload = %key, error = %e, "Poll failed");
                }
            }
            WorkloadPhase::Pending => {}
            WorkloadPhase::Succeeded | WorkloadPhase::Failed => {
                self.started.remove(&key);
            }
        }
    }

    /// Scheduled -> Running: start in the runtime, then publish the
    /// transition along with our finalizer.
    async fn start(&mut self, workload: &Object) -> Result<()> {
        let key = workload.key();
        self.runtime.start(workload).await?;
        self.started.insert(key.clone(), workload.clone());

        let mut updated = workload.clone();
        if !updated
            .metadata
            .finalizers
            .iter()
            .any(|f| f == RUNTIME_FINALIZER)
        {
            updated.metadata.finalizers.push(RUNTIME_FINALIZER.to_string());
        }
        if let Some((_, status)) = updated.as_workload_mut() {
            status.phase = WorkloadPhase::Running;
            status.message = None;
        }
        self.client.update_workload(&updated).await?;
        info!(workload = %key, "Workload started");
        Ok(())
    }

    /// Poll a running workload and publish a terminal phase when the
    /// runtime reports one.
    async fn observe(&mut self, workload: &Object) -> Result<()> {
        let key = workload.key();
        let state = self.runtime.poll(workload).await?;
        let (phase, message) = match state {
            RuntimeState::Running => return Ok(()),
            RuntimeState::Succeeded => (WorkloadPhase::Succeeded, None),
            RuntimeState::Failed(reason) => (WorkloadPhase::Failed, Some(reason)),
        };

        let mut updated = workload.clone();
        if let Some((_, status)) = updated.as_workload_mut() {
            status.phase = phase;
            status.message = message;
        }
        // Terminal workloads no longer need the runtime finalizer.
        updated
            .metadata
            .finalizers
            .retain(|f| f != RUNTIME_FINALIZER);
        self.client.update_workload(&updated).await?;
        self.started.remove(&key);
        info!(workload = %key, %phase, "Workload finished");
        Ok(())
    }

    /// Deletion observed: stop the runtime, then release our finalizer
    /// so the store can remove the object.
    async fn stop_and_release(&mut self, workload: &Object) -> Result<()> {
        let key = workload.key();
        if self.started.remove(&key).is_some() {
            self.runtime.stop(workload).await?;
            info!(workload = %key, "Workload stopped for deletion");
        }

        if workload
            .metadata
            .finalizers
            .iter()
            .any(|f| f == RUNTIME_FINALIZER)
        {
            let mut updated = workload.clone();
            updated
                .metadata
                .finalizers
                .retain(|f| f != RUNTIME_FINALIZER);
            self.client.update_workload(&updated).await?;
            debug!(workload = %key, "Released runtime finalizer");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use keel_api::{Resources, WorkloadSpec};

    use crate::config::Config;

    /// Records which workloads the syncer asks it to stop.
    struct RecordingRuntime {
        stopped: Mutex<Vec<String>>,
    }

    impl RecordingRuntime {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                stopped: Mutex::new(Vec::new()),
            })
        }

        fn stopped(&self) -> Vec<String> {
            self.stopped.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WorkloadRuntime for RecordingRuntime {
        async fn start(&self, _workload: &Object) -> Result<()> {
            Ok(())
        }

        async fn stop(&self, workload: &Object) -> Result<()> {
            self.stopped
                .lock()
                .unwrap()
                .push(workload.metadata.name.clone());
            Ok(())
        }

        async fn poll(&self, _workload: &Object) -> Result<RuntimeState> {
            Ok(RuntimeState::Running)
        }
    }

    fn syncer(runtime: Arc<RecordingRuntime>) -> WorkloadSyncer {
        // The client is never contacted on the paths under test.
        let config = Config {
            node_name: "n1".to_string(),
            control_plane_url: "http://127.0.0.1:0".to_string(),
            log_level: "info".to_string(),
            capacity: Resources::new(4000, 8 << 30),
            reserved: Resources::ZERO,
            heartbeat_interval: Duration::from_secs(10),
        };
        WorkloadSyncer::new(Arc::new(ControlPlaneClient::new(&config)), runtime)
    }

    fn workload(name: &str) -> Object {
        Object::workload("default", name, WorkloadSpec::default())
    }

    #[tokio::test]
    async fn deleted_event_stops_started_workload() {
        let runtime = RecordingRuntime::new();
        let mut syncer = syncer(runtime.clone());

        let w = workload("w-1");
        syncer.started.insert(w.key(), w.clone());

        syncer.sync_one(w, WatchEventType::Deleted).await;

        assert_eq!(runtime.stopped(), vec!["w-1".to_string()]);
        assert!(syncer.started.is_empty());
    }

    #[tokio::test]
    async fn deleted_event_for_unstarted_workload_is_a_noop() {
        let runtime = RecordingRuntime::new();
        let mut syncer = syncer(runtime.clone());

        syncer.sync_one(workload("w-1"), WatchEventType::Deleted).await;

        assert!(runtime.stopped().is_empty());
    }

    #[tokio::test]
    async fn relist_stops_workloads_no_longer_bound_here() {
        let runtime = RecordingRuntime::new();
        let mut syncer = syncer(runtime.clone());

        let gone = workload("w-old");
        let kept = workload("w-new");
        syncer.started.insert(gone.key(), gone.clone());
        syncer.started.insert(kept.key(), kept.clone());

        let current: HashSet<ObjectKey> = [kept.key()].into_iter().collect();
        syncer.forget_missing(&current).await;

        assert_eq!(runtime.stopped(), vec!["w-old".to_string()]);
        assert!(syncer.started.contains_key(&kept.key()));
        assert!(!syncer.started.contains_key(&gone.key()));
    }
}
