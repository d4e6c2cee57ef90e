//! ReplicaSet and Job specs and statuses.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::workload::WorkloadSpec;

/// Template stamped out for each workload a ReplicaSet or Job creates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadTemplate {
    /// Labels applied to created workloads; must satisfy the owner's
    /// selector or the owner would never count its own children.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub spec: WorkloadSpec,
}

/// Desired state of a ReplicaSet: `replicas` live copies of `template`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetSpec {
    #[serde(default)]
    pub replicas: i32,

    /// Labels a workload must carry to be counted as owned.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,

    #[serde(default)]
    pub template: WorkloadTemplate,

    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Observed state of a ReplicaSet.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetStatus {
    /// Count of live (non-terminal, matching, owned) workloads at the
    /// last reconcile.
    #[serde(default)]
    pub replicas: i32,

    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Desired state of a run-to-completion Job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// Number of workloads that must reach Succeeded.
    #[serde(default = "default_completions")]
    pub completions: i32,

    /// Failed workloads the job tolerates (with replacement) before the
    /// job itself is marked Failed.
    #[serde(default = "default_backoff_limit")]
    pub backoff_limit: i32,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,

    #[serde(default)]
    pub template: WorkloadTemplate,

    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_completions() -> i32 {
    1
}

fn default_backoff_limit() -> i32 {
    3
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            completions: default_completions(),
            backoff_limit: default_backoff_limit(),
            selector: BTreeMap::new(),
            template: WorkloadTemplate::default(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Job lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JobPhase {
    #[default]
    Active,
    Succeeded,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Succeeded | JobPhase::Failed)
    }
}

/// Observed state of a Job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub phase: JobPhase,

    /// Workloads that have reached Succeeded.
    #[serde(default)]
    pub succeeded: i32,

    /// Cumulative failed workloads, counted against the backoff limit.
    #[serde(default)]
    pub failed: i32,

    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_spec_defaults() {
        let spec: JobSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.completions, 1);
        assert_eq!(spec.backoff_limit, 3);
    }
}
