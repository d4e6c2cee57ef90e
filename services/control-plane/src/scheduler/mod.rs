//! The scheduler: binds pending workloads to feasible nodes.
//!
//! Each pass works from a point-in-time snapshot of the store. Every
//! bind is a CAS write, so a stale snapshot can never clobber a
//! concurrent change; a conflict just requeues the workload for the
//! next pass. Capacity stays safe within a pass through local
//! accounting: once a workload is bound here, the node's free view
//! shrinks before the next workload is considered.

pub mod filter;
pub mod score;
mod worker;

pub use worker::SchedulerWorker;

use std::collections::BTreeMap;
use std::sync::Arc;

use keel_api::{Kind, Resources, WorkloadPhase};
use keel_store::Store;
use tracing::{debug, info, warn};

use filter::{NodeView, Rejection};
use score::{ScorePolicy, SpreadPolicy};

/// Outcome counters for one scheduling pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub scheduled: usize,
    pub unschedulable: usize,
    pub conflicts: usize,
    /// Store writes issued. A converged pass issues none.
    pub writes: usize,
}

pub struct Scheduler {
    store: Arc<Store>,
    policy: Box<dyn ScorePolicy>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>) -> Self {
        Self::with_policy(store, Box::new(SpreadPolicy))
    }

    pub fn with_policy(store: Arc<Store>, policy: Box<dyn ScorePolicy>) -> Self {
        Self { store, policy }
    }

    /// One full scheduling pass: snapshot, filter, score, bind.
    pub fn schedule_once(&self) -> PassStats {
        let mut stats = PassStats::default();

        let (workloads, _) = self.store.list(Kind::Workload, None, None);
        let (nodes, _) = self.store.list(Kind::Node, None, None);

        // Resources already committed per node, counting everything
        // bound and not yet terminal.
        let mut committed: BTreeMap<String, Resources> = BTreeMap::new();
        for object in &workloads {
            let Some((spec, status)) = object.as_workload() else {
                continue;
            };
            if spec.node_name.is_empty() || status.phase.is_terminal() {
                continue;
            }
            let entry = committed.entry(spec.node_name.clone()).or_default();
            *entry = entry.plus(&spec.resource_requests);
        }

        let mut views: Vec<NodeView> = nodes
            .iter()
            .filter_map(|n| {
                let used = committed.get(&n.metadata.name).copied().unwrap_or_default();
                NodeView::from_object(n, &used)
            })
            .collect();

        // Stable creation order: uids are ULIDs, so sorting by uid is
        // sorting by creation time.
        let mut pending: Vec<_> = workloads
            .into_iter()
            .filter(|o| {
                o.as_workload().is_some_and(|(spec, status)| {
                    status.phase == WorkloadPhase::Pending && spec.node_name.is_empty()
                }) && !o.metadata.is_deleting()
            })
            .collect();
        pending.sort_by(|a, b| a.metadata.uid.cmp(&b.metadata.uid));

        for mut object in pending {
            let Some((spec, _)) = object.as_workload() else {
                continue;
            };
            let request = spec.resource_requests;

            let decision = {
                let (candidates, rejections) = filter::feasible(spec, &views);
                match score::pick(self.policy.as_ref(), &request, &candidates) {
                    Some(winner) => Ok(winner.name.clone()),
                    None => Err(summarize(views.len(), &rejections)),
                }
            };

            match decision {
                Ok(node_name) => {
                    let key = object.key();
                    if let Some((spec, status)) = object.as_workload_mut() {
                        spec.node_name = node_name.clone();
                        status.phase = WorkloadPhase::Scheduled;
                        status.message = None;
                    }
                    match self.store.update(object) {
                        Ok(_) => {
                            stats.scheduled += 1;
                            stats.writes += 1;
                            if let Some(view) = views.iter_mut().find(|v| v.name == node_name) {
                                view.free = view.free.minus(&request);
                            }
                            info!(workload = %key, node = %node_name, "Bound workload");
                        }
                        Err(e) if e.is_retryable() => {
                            // Someone else moved it; next pass sees the
                            // fresh version.
                            stats.conflicts += 1;
                            debug!(workload = %key, error = %e, "Bind conflicted, requeued");
                        }
                        Err(e) => {
                            warn!(workload = %key, error = %e, "Bind failed");
                        }
                    }
                }
                Err(message) => {
                    stats.unschedulable += 1;
                    let key = object.key();
                    let already = object
                        .as_workload()
                        .is_some_and(|(_, status)| status.message.as_deref() == Some(message.as_str()));
                    if already {
                        continue;
                    }
                    if let Some((_, status)) = object.as_workload_mut() {
                        status.message = Some(message.clone());
                    }
                    match self.store.update(object) {
                        Ok(_) => {
                            stats.writes += 1;
                            debug!(workload = %key, %message, "Marked unschedulable");
                        }
                        Err(e) if e.is_retryable() => stats.conflicts += 1,
                        Err(e) => warn!(workload = %key, error = %e, "Status write failed"),
                    }
                }
            }
        }

        stats
    }
}

/// A stable, human-readable reason line, e.g.
/// `0/3 nodes available: insufficient capacity (2), node not ready (1)`.
fn summarize(total: usize, rejections: &[(String, Rejection)]) -> String {
    if total == 0 {
        return "0/0 nodes available: no nodes registered".to_string();
    }
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for (_, reason) in rejections {
        *counts.entry(reason.to_string()).or_default() += 1;
    }
    let reasons: Vec<String> = counts
        .into_iter()
        .map(|(reason, n)| format!("{reason} ({n})"))
        .collect();
    format!("0/{total} nodes available: {}", reasons.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keel_api::{NodeCondition, NodeReadiness, NodeSpec, Object, WorkloadSpec};

    fn ready_node(name: &str, cpu: i64, mem: i64) -> Object {
        let mut node = Object::node(
            name,
            NodeSpec {
                capacity: Resources::new(cpu, mem),
                ..Default::default()
            },
        );
        if let Some((_, status)) = node.as_node_mut() {
            status.allocatable = Resources::new(cpu, mem);
            status.condition = NodeCondition::new(NodeReadiness::Ready, Utc::now());
            status.last_heartbeat = Some(Utc::now());
        }
        node
    }

    fn workload(name: &str, cpu: i64, mem: i64) -> Object {
        Object::workload(
            "default",
            name,
            WorkloadSpec {
                resource_requests: Resources::new(cpu, mem),
                ..Default::default()
            },
        )
    }

    fn bound_node(store: &Store, name: &str) -> String {
        let object = store.get(Kind::Workload, "default", name).unwrap();
        object.as_workload().unwrap().0.node_name.clone()
    }

    #[test]
    fn binds_pending_workload_to_feasible_node() {
        let store = Arc::new(Store::new());
        store.create(ready_node("n1", 4000, 8 << 30)).unwrap();
        store.create(workload("w1", 2000, 1 << 30)).unwrap();

        let scheduler = Scheduler::new(store.clone());
        let stats = scheduler.schedule_once();
        assert_eq!(stats.scheduled, 1);
        assert_eq!(bound_node(&store, "w1"), "n1");

        let object = store.get(Kind::Workload, "default", "w1").unwrap();
        let (_, status) = object.as_workload().unwrap();
        assert_eq!(status.phase, WorkloadPhase::Scheduled);
    }

    #[test]
    fn never_overcommits_within_a_pass() {
        let store = Arc::new(Store::new());
        store.create(ready_node("n1", 2000, 8 << 30)).unwrap();
        store.create(workload("w1", 1500, 1 << 20)).unwrap();
        store.create(workload("w2", 1500, 1 << 20)).unwrap();

        let stats = Scheduler::new(store.clone()).schedule_once();
        assert_eq!(stats.scheduled, 1);
        assert_eq!(stats.unschedulable, 1);

        // The pass-local view absorbed the first bind, so the second
        // workload saw only 500m free.
        let bound = [bound_node(&store, "w1"), bound_node(&store, "w2")];
        assert_eq!(bound.iter().filter(|n| !n.is_empty()).count(), 1);
    }

    #[test]
    fn spreads_across_nodes() {
        let store = Arc::new(Store::new());
        store.create(ready_node("n1", 4000, 8 << 30)).unwrap();
        store.create(ready_node("n2", 4000, 8 << 30)).unwrap();
        store.create(workload("w1", 1000, 1 << 30)).unwrap();
        store.create(workload("w2", 1000, 1 << 30)).unwrap();

        let stats = Scheduler::new(store.clone()).schedule_once();
        assert_eq!(stats.scheduled, 2);
        assert_ne!(bound_node(&store, "w1"), bound_node(&store, "w2"));
    }

    #[test]
    fn unschedulable_status_is_written_once() {
        let store = Arc::new(Store::new());
        store.create(workload("w1", 1000, 1 << 30)).unwrap();

        let scheduler = Scheduler::new(store.clone());
        let first = scheduler.schedule_once();
        assert_eq!(first.unschedulable, 1);
        assert_eq!(first.writes, 1);

        let object = store.get(Kind::Workload, "default", "w1").unwrap();
        let (_, status) = object.as_workload().unwrap();
        assert_eq!(status.phase, WorkloadPhase::Pending);
        assert_eq!(
            status.message.as_deref(),
            Some("0/0 nodes available: no nodes registered")
        );

        // Converged: the same pass again issues no writes.
        let second = scheduler.schedule_once();
        assert_eq!(second.writes, 0);
        assert_eq!(second.unschedulable, 1);
    }

    #[test]
    fn fully_reserved_node_accepts_nothing() {
        // Ready, fresh heartbeat, but the agent reserves the entire
        // host: reported allocatable is zero and binding against the
        // declared capacity would oversubscribe the node.
        let store = Arc::new(Store::new());
        let mut reserved = ready_node("n1", 4000, 8 << 30);
        if let Some((_, status)) = reserved.as_node_mut() {
            status.allocatable = Resources::ZERO;
        }
        store.create(reserved).unwrap();
        store.create(workload("w1", 1000, 1 << 20)).unwrap();

        let stats = Scheduler::new(store.clone()).schedule_once();
        assert_eq!(stats.scheduled, 0);
        assert_eq!(stats.unschedulable, 1);
        assert_eq!(bound_node(&store, "w1"), "");
    }

    #[test]
    fn rejection_summary_names_reasons() {
        let store = Arc::new(Store::new());
        store.create(ready_node("n1", 500, 8 << 30)).unwrap();
        let mut dead = ready_node("n2", 4000, 8 << 30);
        if let Some((_, status)) = dead.as_node_mut() {
            status.condition = NodeCondition::new(NodeReadiness::NotReady, Utc::now());
        }
        store.create(dead).unwrap();
        store.create(workload("w1", 1000, 1 << 20)).unwrap();

        Scheduler::new(store.clone()).schedule_once();
        let object = store.get(Kind::Workload, "default", "w1").unwrap();
        let message = object.as_workload().unwrap().1.message.clone().unwrap();
        assert_eq!(
            message,
            "0/2 nodes available: insufficient capacity (1), node not ready (1)"
        );
    }

    #[test]
    fn skips_deleting_and_bound_workloads() {
        let store = Arc::new(Store::new());
        store.create(ready_node("n1", 4000, 8 << 30)).unwrap();

        let mut manual = workload("w-manual", 100, 100);
        if let Some((spec, status)) = manual.as_workload_mut() {
            spec.node_name = "n1".to_string();
            status.phase = WorkloadPhase::Scheduled;
        }
        store.create(manual).unwrap();

        let stats = Scheduler::new(store.clone()).schedule_once();
        assert_eq!(stats, PassStats::default());
    }

    #[test]
    fn respects_committed_usage_from_prior_passes() {
        let store = Arc::new(Store::new());
        store.create(ready_node("n1", 2000, 8 << 30)).unwrap();
        store.create(workload("w1", 1500, 1 << 20)).unwrap();

        let scheduler = Scheduler::new(store.clone());
        scheduler.schedule_once();
        assert_eq!(bound_node(&store, "w1"), "n1");

        store.create(workload("w2", 1500, 1 << 20)).unwrap();
        let stats = scheduler.schedule_once();
        assert_eq!(stats.unschedulable, 1);
        assert_eq!(bound_node(&store, "w2"), "");
    }

    #[test]
    fn terminal_workloads_release_capacity() {
        let store = Arc::new(Store::new());
        store.create(ready_node("n1", 2000, 8 << 30)).unwrap();

        let mut done = workload("w-done", 2000, 1 << 20);
        if let Some((spec, status)) = done.as_workload_mut() {
            spec.node_name = "n1".to_string();
            status.phase = WorkloadPhase::Succeeded;
        }
        store.create(done).unwrap();
        store.create(workload("w1", 1500, 1 << 20)).unwrap();

        let stats = Scheduler::new(store.clone()).schedule_once();
        assert_eq!(stats.scheduled, 1);
        assert_eq!(bound_node(&store, "w1"), "n1");
    }
}
