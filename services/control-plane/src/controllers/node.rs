//! Node controller: judges heartbeat freshness and evicts workloads
//! from nodes that have gone dark.
//!
//! Two grace periods apply. Past the first the node is marked NotReady
//! and the scheduler stops placing onto it. Past the second its
//! condition degrades to Unknown and every non-terminal workload bound
//! to it is marked Failed, which lets owning controllers stamp out
//! replacements elsewhere.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keel_api::{Kind, NodeCondition, NodeReadiness, Object, WorkloadPhase};
use keel_store::Store;
use tracing::{info, warn};

use super::{Controller, ReconcileStats};

pub struct NodeController {
    store: Arc<Store>,
    not_ready_grace: chrono::Duration,
    eviction_grace: chrono::Duration,
}

impl NodeController {
    pub fn new(store: Arc<Store>, not_ready_grace: Duration, eviction_grace: Duration) -> Self {
        Self {
            store,
            not_ready_grace: chrono::Duration::from_std(not_ready_grace)
                .unwrap_or_else(|_| chrono::Duration::seconds(40)),
            eviction_grace: chrono::Duration::from_std(eviction_grace)
                .unwrap_or_else(|_| chrono::Duration::seconds(120)),
        }
    }

    /// Readiness implied by heartbeat age. `None` means the heartbeat
    /// is fresh and the agent's own report stands.
    fn judge(&self, node: &Object, now: DateTime<Utc>) -> Option<NodeReadiness> {
        let (_, status) = node.as_node()?;
        // A node that has never heartbeated is judged from its
        // registration time.
        let reference = status
            .last_heartbeat
            .or(node.metadata.creation_timestamp)?;
        let age = now - reference;

        if age > self.eviction_grace {
            Some(NodeReadiness::Unknown)
        } else if age > self.not_ready_grace {
            Some(NodeReadiness::NotReady)
        } else {
            None
        }
    }

    fn degrade(&self, node: &Object, readiness: NodeReadiness, now: DateTime<Utc>) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        let mut updated = node.clone();
        if let Some((_, status)) = updated.as_node_mut() {
            status.condition = NodeCondition {
                readiness,
                last_transition: now,
                message: Some("heartbeat overdue".to_string()),
            };
        }
        match self.store.update(updated) {
            Ok(_) => {
                stats.writes += 1;
                warn!(node = %node.metadata.name, %readiness, "Node degraded");
            }
            Err(e) if e.is_retryable() => stats.conflicts += 1,
            Err(e) => {
                warn!(node = %node.metadata.name, error = %e, "Condition write failed");
                stats.errors += 1;
            }
        }
        stats
    }

    fn evict(&self, node_name: &str, workloads: &[Object]) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        for workload in workloads {
            let Some((spec, status)) = workload.as_workload() else {
                continue;
            };
            if spec.node_name != node_name || status.phase.is_terminal() {
                continue;
            }

            let mut updated = workload.clone();
            if let Some((_, status)) = updated.as_workload_mut() {
                status.phase = WorkloadPhase::Failed;
                status.message = Some(format!("evicted: node '{node_name}' is unreachable"));
            }
            match self.store.update(updated) {
                Ok(_) => {
                    stats.writes += 1;
                    info!(workload = %workload.key(), node = %node_name, "Evicted workload");
                }
                Err(e) if e.is_retryable() => stats.conflicts += 1,
                Err(e) => {
                    warn!(workload = %workload.key(), error = %e, "Eviction write failed");
                    stats.errors += 1;
                }
            }
        }
        stats
    }
}

impl Controller for NodeController {
    fn name(&self) -> &'static str {
        "node"
    }

    fn watched_kinds(&self) -> &'static [Kind] {
        &[Kind::Node]
    }

    fn reconcile_all(&self, now: DateTime<Utc>) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        let (nodes, _) = self.store.list(Kind::Node, None, None);
        let (workloads, _) = self.store.list(Kind::Workload, None, None);

        for node in &nodes {
            let Some(judged) = self.judge(node, now) else {
                continue;
            };
            let current = node
                .as_node()
                .map(|(_, s)| s.condition.readiness)
                .unwrap_or_default();

            if judged != current {
                stats.merge(self.degrade(node, judged, now));
            }
            if judged == NodeReadiness::Unknown {
                stats.merge(self.evict(&node.metadata.name, &workloads));
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_api::{NodeSpec, Resources, WorkloadSpec};

    const NOT_READY: Duration = Duration::from_secs(40);
    const EVICT: Duration = Duration::from_secs(120);

    fn heartbeating_node(store: &Store, name: &str, at: DateTime<Utc>) {
        let mut node = Object::node(name, NodeSpec::default());
        store.create(node.clone()).unwrap();

        node = store.get(Kind::Node, "", name).unwrap();
        if let Some((_, status)) = node.as_node_mut() {
            status.allocatable = Resources::new(4000, 8 << 30);
            status.condition = NodeCondition::new(NodeReadiness::Ready, at);
            status.last_heartbeat = Some(at);
        }
        store.update(node).unwrap();
    }

    fn bound_workload(store: &Store, name: &str, node: &str) {
        let mut w = Object::workload(
            "default",
            name,
            WorkloadSpec {
                node_name: node.to_string(),
                ..Default::default()
            },
        );
        if let Some((_, status)) = w.as_workload_mut() {
            status.phase = WorkloadPhase::Running;
        }
        store.create(w).unwrap();
    }

    fn readiness(store: &Store, name: &str) -> NodeReadiness {
        let node = store.get(Kind::Node, "", name).unwrap();
        node.as_node().unwrap().1.condition.readiness
    }

    #[test]
    fn fresh_heartbeat_stays_untouched() {
        let store = Arc::new(Store::new());
        let now = Utc::now();
        heartbeating_node(&store, "n1", now);

        let controller = NodeController::new(store.clone(), NOT_READY, EVICT);
        let stats = controller.reconcile_all(now + chrono::Duration::seconds(10));
        assert_eq!(stats, ReconcileStats::default());
        assert_eq!(readiness(&store, "n1"), NodeReadiness::Ready);
    }

    #[test]
    fn stale_heartbeat_marks_not_ready() {
        let store = Arc::new(Store::new());
        let now = Utc::now();
        heartbeating_node(&store, "n1", now);

        let controller = NodeController::new(store.clone(), NOT_READY, EVICT);
        let stats = controller.reconcile_all(now + chrono::Duration::seconds(60));
        assert_eq!(stats.writes, 1);
        assert_eq!(readiness(&store, "n1"), NodeReadiness::NotReady);

        // Idempotent until the state changes again.
        let stats = controller.reconcile_all(now + chrono::Duration::seconds(61));
        assert_eq!(stats, ReconcileStats::default());
    }

    #[test]
    fn long_silence_evicts_bound_workloads() {
        let store = Arc::new(Store::new());
        let now = Utc::now();
        heartbeating_node(&store, "n1", now);
        heartbeating_node(&store, "n2", now + chrono::Duration::seconds(130));
        bound_workload(&store, "w1", "n1");
        bound_workload(&store, "w2", "n2");

        let controller = NodeController::new(store.clone(), NOT_READY, EVICT);
        controller.reconcile_all(now + chrono::Duration::seconds(130));

        assert_eq!(readiness(&store, "n1"), NodeReadiness::Unknown);
        assert_eq!(readiness(&store, "n2"), NodeReadiness::Ready);

        let w1 = store.get(Kind::Workload, "default", "w1").unwrap();
        let (_, status) = w1.as_workload().unwrap();
        assert_eq!(status.phase, WorkloadPhase::Failed);
        assert!(status.message.as_deref().unwrap().contains("unreachable"));

        // The healthy node's workload is untouched.
        let w2 = store.get(Kind::Workload, "default", "w2").unwrap();
        assert_eq!(w2.as_workload().unwrap().1.phase, WorkloadPhase::Running);
    }

    #[test]
    fn eviction_skips_terminal_workloads() {
        let store = Arc::new(Store::new());
        let now = Utc::now();
        heartbeating_node(&store, "n1", now);
        bound_workload(&store, "w1", "n1");

        let mut w = store.get(Kind::Workload, "default", "w1").unwrap();
        if let Some((_, status)) = w.as_workload_mut() {
            status.phase = WorkloadPhase::Succeeded;
        }
        store.update(w).unwrap();

        let controller = NodeController::new(store.clone(), NOT_READY, EVICT);
        controller.reconcile_all(now + chrono::Duration::seconds(130));

        let w = store.get(Kind::Workload, "default", "w1").unwrap();
        assert_eq!(w.as_workload().unwrap().1.phase, WorkloadPhase::Succeeded);
    }

    #[test]
    fn recovery_is_left_to_the_agent() {
        // Once the agent heartbeats again it writes Ready itself; the
        // controller only ever degrades.
        let store = Arc::new(Store::new());
        let now = Utc::now();
        heartbeating_node(&store, "n1", now);

        let controller = NodeController::new(store.clone(), NOT_READY, EVICT);
        controller.reconcile_all(now + chrono::Duration::seconds(60));
        assert_eq!(readiness(&store, "n1"), NodeReadiness::NotReady);

        heartbeating_node_renew(&store, "n1", now + chrono::Duration::seconds(70));
        let stats = controller.reconcile_all(now + chrono::Duration::seconds(75));
        assert_eq!(stats, ReconcileStats::default());
        assert_eq!(readiness(&store, "n1"), NodeReadiness::Ready);
    }

    fn heartbeating_node_renew(store: &Store, name: &str, at: DateTime<Utc>) {
        let mut node = store.get(Kind::Node, "", name).unwrap();
        if let Some((_, status)) = node.as_node_mut() {
            status.condition = NodeCondition::new(NodeReadiness::Ready, at);
            status.last_heartbeat = Some(at);
        }
        store.update(node).unwrap();
    }
}
