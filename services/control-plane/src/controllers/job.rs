//! Job controller: run-to-completion workloads with a failure budget.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use keel_api::{JobPhase, Kind, Object, OwnerReference, WorkloadPhase};
use keel_store::Store;
use tracing::{debug, info, warn};

use super::{child_name, Controller, ReconcileStats};

pub struct JobController {
    store: Arc<Store>,
}

impl JobController {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    fn reconcile_one(&self, job: &Object, workloads: &[Object]) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        let Some((spec, status)) = job.as_job() else {
            return stats;
        };
        let Some(job_uid) = job.metadata.uid else {
            return stats;
        };

        let owned: Vec<&Object> = workloads
            .iter()
            .filter(|w| {
                w.metadata.namespace == job.metadata.namespace
                    && w.metadata
                        .is_controlled_by(Kind::Job, &job.metadata.name, job_uid)
            })
            .collect();

        let succeeded = count_phase(&owned, WorkloadPhase::Succeeded);
        let failed = count_phase(&owned, WorkloadPhase::Failed);
        let active = owned
            .iter()
            .filter(|w| {
                w.as_workload()
                    .is_some_and(|(_, s)| !s.phase.is_terminal())
                    && !w.metadata.is_deleting()
            })
            .count() as i32;

        let phase = if succeeded >= spec.completions {
            JobPhase::Succeeded
        } else if failed > spec.backoff_limit {
            JobPhase::Failed
        } else {
            JobPhase::Active
        };

        // While active and within budget, keep enough workloads in
        // flight to cover the remaining completions.
        if phase == JobPhase::Active {
            let missing = (spec.completions - succeeded - active).max(0);
            for _ in 0..missing {
                match self.store.create(self.child(job, job_uid)) {
                    Ok(created) => {
                        stats.writes += 1;
                        debug!(owner = %job.key(), child = %created.metadata.name, "Created job workload");
                    }
                    Err(e) if e.is_retryable() => stats.conflicts += 1,
                    Err(e) => {
                        warn!(owner = %job.key(), error = %e, "Job workload create failed");
                        stats.errors += 1;
                    }
                }
            }
        }

        if status.phase != phase || status.succeeded != succeeded || status.failed != failed {
            let mut updated = job.clone();
            if let Some((_, status)) = updated.as_job_mut() {
                status.phase = phase;
                status.succeeded = succeeded;
                status.failed = failed;
            }
            match self.store.update(updated) {
                Ok(_) => {
                    stats.writes += 1;
                    if phase.is_terminal() {
                        info!(job = %job.key(), ?phase, succeeded, failed, "Job finished");
                    }
                }
                Err(e) if e.is_retryable() => stats.conflicts += 1,
                Err(e) => {
                    warn!(job = %job.key(), error = %e, "Status write failed");
                    stats.errors += 1;
                }
            }
        }

        stats
    }

    fn child(&self, job: &Object, job_uid: keel_id::Uid) -> Object {
        let Some((spec, _)) = job.as_job() else {
            unreachable!("caller checked the kind");
        };
        let mut child = Object::workload(
            job.metadata.namespace.clone(),
            child_name(&job.metadata.name),
            spec.template.spec.clone(),
        );
        child.metadata.labels = spec.template.labels.clone();
        child.metadata.owner_references.push(OwnerReference {
            kind: Kind::Job,
            name: job.metadata.name.clone(),
            uid: job_uid,
            controller: true,
        });
        child
    }
}

fn count_phase(owned: &[&Object], phase: WorkloadPhase) -> i32 {
    owned
        .iter()
        .filter(|w| w.as_workload().is_some_and(|(_, s)| s.phase == phase))
        .count() as i32
}

impl Controller for JobController {
    fn name(&self) -> &'static str {
        "job"
    }

    fn watched_kinds(&self) -> &'static [Kind] {
        &[Kind::Job, Kind::Workload]
    }

    fn reconcile_all(&self, _now: DateTime<Utc>) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        let (jobs, _) = self.store.list(Kind::Job, None, None);
        let (workloads, _) = self.store.list(Kind::Workload, None, None);

        for job in &jobs {
            if job.metadata.is_deleting() {
                continue;
            }
            // Terminal jobs are history; nothing left to manage.
            if job.as_job().is_some_and(|(_, s)| s.phase.is_terminal()) {
                continue;
            }
            stats.merge(self.reconcile_one(job, &workloads));
        }
        stats
    }
}
