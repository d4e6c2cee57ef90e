//! End-to-end reconciliation scenarios run against an in-process store,
//! driving the scheduler and controllers pass by pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keel_api::{
    Kind, NodeCondition, NodeReadiness, NodeSpec, Object, ReplicaSetSpec, Resources,
    WorkloadPhase, WorkloadSpec, WorkloadTemplate,
};
use keel_control_plane::controllers::{
    Controller, NodeController, ReplicaSetController,
};
use keel_control_plane::scheduler::Scheduler;
use keel_store::Store;

const NOT_READY_GRACE: Duration = Duration::from_secs(40);
const EVICTION_GRACE: Duration = Duration::from_secs(120);

fn ready_node(store: &Store, name: &str, cpu: i64, mem: i64, at: DateTime<Utc>) {
    let node = Object::node(
        name,
        NodeSpec {
            capacity: Resources::new(cpu, mem),
            ..Default::default()
        },
    );
    store.create(node).unwrap();
    heartbeat(store, name, at);
}

fn heartbeat(store: &Store, name: &str, at: DateTime<Utc>) {
    let mut node = store.get(Kind::Node, "", name).unwrap();
    let capacity = node.as_node().unwrap().0.capacity;
    if let Some((_, status)) = node.as_node_mut() {
        status.allocatable = capacity;
        status.condition = NodeCondition::new(NodeReadiness::Ready, at);
        status.last_heartbeat = Some(at);
    }
    store.update(node).unwrap();
}

fn workload(store: &Store, name: &str, cpu: i64, mem: i64) {
    store
        .create(Object::workload(
            "default",
            name,
            WorkloadSpec {
                resource_requests: Resources::new(cpu, mem),
                ..Default::default()
            },
        ))
        .unwrap();
}

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

fn workload_state(store: &Store, name: &str) -> (String, WorkloadPhase) {
    let object = store.get(Kind::Workload, "default", name).unwrap();
    let (spec, status) = object.as_workload().unwrap();
    (spec.node_name.clone(), status.phase)
}

fn live_workloads(store: &Store) -> Vec<Object> {
    let (workloads, _) = store.list(Kind::Workload, Some("default"), None);
    workloads
        .into_iter()
        .filter(|w| w.as_workload().is_some_and(|(_, s)| !s.phase.is_terminal()))
        .collect()
}

#[test]
fn register_create_schedule() {
    // A node registers, a workload is created, the scheduler binds it.
    let store = Arc::new(Store::new());
    let now = Utc::now();
    ready_node(&store, "n1", 4000, 8 << 30, now);
    workload(&store, "w1", 2000, 1 << 30);

    let stats = Scheduler::new(store.clone()).schedule_once();
    assert_eq!(stats.scheduled, 1);

    let (node, phase) = workload_state(&store, "w1");
    assert_eq!(node, "n1");
    assert_eq!(phase, WorkloadPhase::Scheduled);
}

#[test]
fn replicaset_recovers_deleted_replica() {
    // Three replicas converge; deleting one brings it back.
    let store = Arc::new(Store::new());
    store.create(replica_set("web", 3)).unwrap();

    let controller = ReplicaSetController::new(store.clone());
    controller.reconcile_all(Utc::now());
    assert_eq!(live_workloads(&store).len(), 3);

    let victim = live_workloads(&store)[0].metadata.name.clone();
    store
        .delete(Kind::Workload, "default", &victim, None)
        .unwrap();

    controller.reconcile_all(Utc::now());
    assert_eq!(live_workloads(&store).len(), 3);
    assert!(live_workloads(&store)
        .iter()
        .all(|w| w.metadata.name != victim));
}

#[test]
fn dead_node_failover() {
    // A node goes silent: its workloads fail, their owner replaces
    // them, and the scheduler places the replacements on the healthy
    // node.
    let store = Arc::new(Store::new());
    let t0 = Utc::now();
    ready_node(&store, "n1", 4000, 8 << 30, t0);
    ready_node(&store, "n2", 4000, 8 << 30, t0);
    store.create(replica_set("web", 2)).unwrap();

    let scheduler = Scheduler::new(store.clone());
    let rs_controller = ReplicaSetController::new(store.clone());
    let node_controller =
        NodeController::new(store.clone(), NOT_READY_GRACE, EVICTION_GRACE);

    rs_controller.reconcile_all(t0);
    scheduler.schedule_once();
    assert!(live_workloads(&store)
        .iter()
        .all(|w| !w.as_workload().unwrap().0.node_name.is_empty()));

    // n1 stops heartbeating; n2 stays fresh.
    let t1 = t0 + chrono::Duration::seconds(130);
    heartbeat(&store, "n2", t1);
    node_controller.reconcile_all(t1);

    let node = store.get(Kind::Node, "", "n1").unwrap();
    assert_eq!(
        node.as_node().unwrap().1.condition.readiness,
        NodeReadiness::Unknown
    );

    // Anything that was on n1 is now Failed.
    let (workloads, _) = store.list(Kind::Workload, Some("default"), None);
    for w in &workloads {
        let (spec, status) = w.as_workload().unwrap();
        if spec.node_name == "n1" {
            assert_eq!(status.phase, WorkloadPhase::Failed);
        }
    }

    // The ReplicaSet stamps out replacements; the scheduler can only
    // place them on n2.
    rs_controller.reconcile_all(t1);
    scheduler.schedule_once();

    let live = live_workloads(&store);
    assert_eq!(live.len(), 2);
    for w in &live {
        assert_eq!(w.as_workload().unwrap().0.node_name, "n2");
    }
}

#[test]
fn conflicting_writers_one_wins() {
    let store = Arc::new(Store::new());
    let now = Utc::now();
    ready_node(&store, "n1", 4000, 8 << 30, now);

    let snapshot = store.get(Kind::Node, "", "n1").unwrap();

    let mut first = snapshot.clone();
    first.metadata.labels.insert("zone".into(), "a".into());
    store.update(first).unwrap();

    let mut second = snapshot;
    second.metadata.labels.insert("zone".into(), "b".into());
    let err = store.update(second).unwrap_err();
    assert!(err.is_conflict());

    // The loser re-reads and retries against the fresh version.
    let mut retry = store.get(Kind::Node, "", "n1").unwrap();
    retry.metadata.labels.insert("zone".into(), "b".into());
    store.update(retry).unwrap();
}

#[test]
fn capacity_is_never_oversubscribed() {
    let store = Arc::new(Store::new());
    let now = Utc::now();
    ready_node(&store, "n1", 2000, 4 << 30, now);

    for i in 0..5 {
        workload(&store, &format!("w{i}"), 900, 1 << 30);
    }

    let scheduler = Scheduler::new(store.clone());
    scheduler.schedule_once();
    scheduler.schedule_once();

    let (workloads, _) = store.list(Kind::Workload, Some("default"), None);
    let mut committed = Resources::ZERO;
    for w in &workloads {
        let (spec, _) = w.as_workload().unwrap();
        if spec.node_name == "n1" {
            committed = committed.plus(&spec.resource_requests);
        }
    }
    assert!(committed.fits_within(&Resources::new(2000, 4 << 30)));
    // Exactly two 900m workloads fit on a 2000m node.
    assert_eq!(committed.cpu_millis, 1800);
}

#[test]
fn converged_cluster_issues_no_writes() {
    let store = Arc::new(Store::new());
    let t0 = Utc::now();
    ready_node(&store, "n1", 4000, 8 << 30, t0);
    store.create(replica_set("web", 2)).unwrap();

    let scheduler = Scheduler::new(store.clone());
    let rs_controller = ReplicaSetController::new(store.clone());
    let node_controller =
        NodeController::new(store.clone(), NOT_READY_GRACE, EVICTION_GRACE);

    // Run everything until quiescent.
    for _ in 0..3 {
        rs_controller.reconcile_all(t0);
        scheduler.schedule_once();
        node_controller.reconcile_all(t0);
    }

    let version_before = store.latest_version();
    rs_controller.reconcile_all(t0);
    let sched = scheduler.schedule_once();
    node_controller.reconcile_all(t0);

    assert_eq!(store.latest_version(), version_before);
    assert_eq!(sched.writes, 0);
}

#[test]
fn scheduled_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.log");

    {
        let store = Arc::new(Store::open(&path).unwrap());
        ready_node(&store, "n1", 4000, 8 << 30, Utc::now());
        workload(&store, "w1", 1000, 1 << 30);
        Scheduler::new(store.clone()).schedule_once();
    }

    let store = Arc::new(Store::open(&path).unwrap());
    let (node, phase) = workload_state(&store, "w1");
    assert_eq!(node, "n1");
    assert_eq!(phase, WorkloadPhase::Scheduled);

    // The version sequence continues past the restart.
    let before = store.latest_version();
    workload(&store, "w2", 100, 1 << 20);
    assert!(store.latest_version() > before);

    // And a converged scheduler still issues no writes for w1.
    let stats = Scheduler::new(store.clone()).schedule_once();
    assert_eq!(stats.scheduled, 1);
    assert_eq!(stats.conflicts, 0);
}

#[tokio::test]
async fn watch_sees_the_whole_reconciliation() {
    // A watcher that lists then watches observes every step of a
    // ReplicaSet converging, with strictly increasing versions.
    let store = Arc::new(Store::new());
    let (_, snapshot_version) = store.list(Kind::Workload, None, None);
    let mut stream = store.watch(Kind::Workload, None, snapshot_version).unwrap();

    store.create(replica_set("web", 2)).unwrap();
    ReplicaSetController::new(store.clone()).reconcile_all(Utc::now());

    let mut seen = Vec::new();
    while let Some(event) = stream.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen.len(), 2);
    assert!(seen.windows(2).all(|w| w[0].resource_version < w[1].resource_version));
}
