//! ReplicaSet controller: keeps `replicas` live copies of a template.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use keel_api::{labels_match, Kind, Object, OwnerReference, ReplicaSetSpec};
use keel_store::Store;
use tracing::{debug, info, warn};

use super::{child_name, Controller, ReconcileStats};

pub struct ReplicaSetController {
    store: Arc<Store>,
}

impl ReplicaSetController {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    fn reconcile_one(&self, rs: &Object, workloads: &[Object]) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        let Some((spec, status)) = rs.as_replica_set() else {
            return stats;
        };
        let Some(rs_uid) = rs.metadata.uid else {
            return stats;
        };

        // Live children: owned by this lineage, matching the selector,
        // not terminal and not being deleted.
        let mut live: Vec<&Object> = workloads
            .iter()
            .filter(|w| {
                w.metadata.namespace == rs.metadata.namespace
                    && w.metadata
                        .is_controlled_by(Kind::ReplicaSet, &rs.metadata.name, rs_uid)
                    && w.as_workload()
                        .is_some_and(|(_, s)| !s.phase.is_terminal())
                    && labels_match(&spec.selector, &w.metadata.labels)
                    && !w.metadata.is_deleting()
            })
            .collect();

        let desired = spec.replicas as usize;
        if live.len() < desired {
            let missing = desired - live.len();
            for _ in 0..missing {
                match self.store.create(self.child(rs, spec, rs_uid)) {
                    Ok(created) => {
                        stats.writes += 1;
                        debug!(owner = %rs.key(), child = %created.metadata.name, "Created replica");
                    }
                    Err(e) if e.is_retryable() => stats.conflicts += 1,
                    Err(e) => {
                        warn!(owner = %rs.key(), error = %e, "Replica create failed");
                        stats.errors += 1;
                    }
                }
            }
            info!(owner = %rs.key(), live = live.len(), desired, "Scaled up");
        } else if live.len() > desired {
            // Newest first: uids are ULIDs, so the largest uid is the
            // most recently created replica.
            live.sort_by(|a, b| b.metadata.uid.cmp(&a.metadata.uid));
            for victim in live.iter().take(live.len() - desired) {
                let meta = &victim.metadata;
                match self.store.delete(
                    Kind::Workload,
                    &meta.namespace,
                    &meta.name,
                    Some(meta.resource_version),
                ) {
                    Ok(()) => {
                        stats.writes += 1;
                        debug!(owner = %rs.key(), child = %meta.name, "Deleted excess replica");
                    }
                    Err(e) if e.is_retryable() || e.is_not_found() => stats.conflicts += 1,
                    Err(e) => {
                        warn!(owner = %rs.key(), error = %e, "Replica delete failed");
                        stats.errors += 1;
                    }
                }
            }
            info!(owner = %rs.key(), live = live.len(), desired, "Scaled down");
        }

        // Status reflects the live count observed at the start of the
        // pass, written only on change.
        if status.replicas != live.len() as i32 {
            let mut updated = rs.clone();
            let count = live.len() as i32;
            if let Some((_, status)) = updated.as_replica_set_mut() {
                status.replicas = count;
            }
            match self.store.update(updated) {
                Ok(_) => stats.writes += 1,
                Err(e) if e.is_retryable() => stats.conflicts += 1,
                Err(e) => {
                    warn!(owner = %rs.key(), error = %e, "Status write failed");
                    stats.errors += 1;
                }
            }
        }

        stats
    }

    fn child(&self, rs: &Object, spec: &ReplicaSetSpec, rs_uid: keel_id::Uid) -> Object {
        let mut child = Object::workload(
            rs.metadata.namespace.clone(),
            child_name(&rs.metadata.name),
            spec.template.spec.clone(),
        );
        child.metadata.labels = spec.template.labels.clone();
        child.metadata.owner_references.push(OwnerReference {
            kind: Kind::ReplicaSet,
            name: rs.metadata.name.clone(),
            uid: rs_uid,
            controller: true,
        });
        child
    }
}

impl Controller for ReplicaSetController {
    fn name(&self) -> &'static str {
        "replicaset"
    }

    fn watched_kinds(&self) -> &'static [Kind] {
        &[Kind::ReplicaSet, Kind::Workload]
    }

    fn reconcile_all(&self, _now: DateTime<Utc>) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        let (replicasets, _) = self.store.list(Kind::ReplicaSet, None, None);
        let (workloads, _) = self.store.list(Kind::Workload, None, None);

        for rs in &replicasets {
            if rs.metadata.is_deleting() {
                continue;
            }
            stats.merge(self.reconcile_one(rs, &workloads));
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_api::{Resources, WorkloadPhase, WorkloadSpec, WorkloadTemplate};

    fn replica_set(name: &str, replicas: i32) -> Object {
        Object::replica_set(
            "default",
            name,
            ReplicaSetSpec {
                replicas,
                selector: [("app".to_string(), name.to_string())].into(),
                template: WorkloadTemplate {
                    labels: [("app".to_string(), name.to_string())].into(),
                    spec: WorkloadSpec {
                        resource_requests: Resources::new(100, 1 << 20),
                        ..Default::default()
                    },
                },
                ..Default::default()
            },
        )
    }

    fn owned_workloads(store: &Store, rs_name: &str) -> Vec<Object> {
        let (workloads, _) = store.list(Kind::Workload, Some("default"), None);
        workloads
            .into_iter()
            .filter(|w| {
                w.metadata
                    .controller_owner()
                    .is_some_and(|o| o.name == rs_name)
            })
            .collect()
    }

    #[test]
    fn scales_up_to_desired() {
        let store = Arc::new(Store::new());
        store.create(replica_set("web", 3)).unwrap();

        let controller = ReplicaSetController::new(store.clone());
        let stats = controller.reconcile_all(Utc::now());
        assert_eq!(stats.writes, 3);
        assert_eq!(owned_workloads(&store, "web").len(), 3);

        // Children carry the template labels and a controller ref.
        for child in owned_workloads(&store, "web") {
            assert_eq!(child.metadata.labels.get("app").unwrap(), "web");
            assert!(child.metadata.controller_owner().unwrap().controller);
        }
    }

    #[test]
    fn second_pass_converges_without_writes() {
        let store = Arc::new(Store::new());
        store.create(replica_set("web", 2)).unwrap();

        let controller = ReplicaSetController::new(store.clone());
        controller.reconcile_all(Utc::now());
        // Status write happens on the pass after children exist.
        controller.reconcile_all(Utc::now());
        let stats = controller.reconcile_all(Utc::now());
        assert_eq!(stats, ReconcileStats::default());
    }

    #[test]
    fn replaces_deleted_replica() {
        let store = Arc::new(Store::new());
        store.create(replica_set("web", 3)).unwrap();

        let controller = ReplicaSetController::new(store.clone());
        controller.reconcile_all(Utc::now());

        let victim = &owned_workloads(&store, "web")[0];
        store
            .delete(Kind::Workload, "default", &victim.metadata.name, None)
            .unwrap();
        assert_eq!(owned_workloads(&store, "web").len(), 2);

        controller.reconcile_all(Utc::now());
        assert_eq!(owned_workloads(&store, "web").len(), 3);
    }

    #[test]
    fn scales_down_newest_first() {
        let store = Arc::new(Store::new());
        let mut rs = replica_set("web", 3);
        store.create(rs.clone()).unwrap();

        let controller = ReplicaSetController::new(store.clone());
        controller.reconcile_all(Utc::now());

        let mut before = owned_workloads(&store, "web");
        before.sort_by(|a, b| a.metadata.uid.cmp(&b.metadata.uid));
        let oldest: Vec<String> = before
            .iter()
            .take(1)
            .map(|w| w.metadata.name.clone())
            .collect();

        rs = store.get(Kind::ReplicaSet, "default", "web").unwrap();
        if let Some((spec, _)) = rs.as_replica_set_mut() {
            spec.replicas = 1;
        }
        store.update(rs).unwrap();
        controller.reconcile_all(Utc::now());

        let after = owned_workloads(&store, "web");
        assert_eq!(after.len(), 1);
        // The survivor is the oldest replica.
        assert_eq!(after[0].metadata.name, oldest[0]);
    }

    #[test]
    fn failed_replicas_are_replaced() {
        let store = Arc::new(Store::new());
        store.create(replica_set("web", 2)).unwrap();

        let controller = ReplicaSetController::new(store.clone());
        controller.reconcile_all(Utc::now());

        let mut victim = owned_workloads(&store, "web")[0].clone();
        if let Some((_, status)) = victim.as_workload_mut() {
            status.phase = WorkloadPhase::Failed;
        }
        store.update(victim).unwrap();

        controller.reconcile_all(Utc::now());
        let live: Vec<_> = owned_workloads(&store, "web")
            .into_iter()
            .filter(|w| w.as_workload().is_some_and(|(_, s)| !s.phase.is_terminal()))
            .collect();
        assert_eq!(live.len(), 2);
    }

    #[test]
    fn recreated_owner_ignores_old_children() {
        let store = Arc::new(Store::new());
        store.create(replica_set("web", 2)).unwrap();

        let controller = ReplicaSetController::new(store.clone());
        controller.reconcile_all(Utc::now());
        let old_children = owned_workloads(&store, "web");
        assert_eq!(old_children.len(), 2);

        // Delete and recreate under the same name: new uid, new lineage.
        store
            .delete(Kind::ReplicaSet, "default", "web", None)
            .unwrap();
        store.create(replica_set("web", 2)).unwrap();

        controller.reconcile_all(Utc::now());
        let (workloads, _) = store.list(Kind::Workload, Some("default"), None);
        // Old children still exist but the new lineage stamped out its
        // own.
        assert_eq!(workloads.len(), 4);
    }

    #[test]
    fn status_tracks_live_count() {
        let store = Arc::new(Store::new());
        store.create(replica_set("web", 2)).unwrap();

        let controller = ReplicaSetController::new(store.clone());
        controller.reconcile_all(Utc::now());
        controller.reconcile_all(Utc::now());

        let rs = store.get(Kind::ReplicaSet, "default", "web").unwrap();
        assert_eq!(rs.as_replica_set().unwrap().1.replicas, 2);
    }
}
