//! Workload spec and status.

use serde::{Deserialize, Serialize};

use crate::node::Toleration;
use crate::resources::Resources;

/// Desired state of a schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    /// Resources the workload needs on every dimension.
    #[serde(default)]
    pub resource_requests: Resources,

    /// The node this workload is bound to. Empty until the scheduler
    /// binds it; the assignment is one-way and never rewritten, only
    /// cleared by delete + recreate.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_name: String,

    /// Taints this workload opts in to tolerating.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    /// Unknown fields, preserved for roundtrip fidelity.
    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Workload lifecycle phase.
///
/// Pending → Scheduled → Running → Succeeded | Failed. The scheduler
/// moves Pending to Scheduled; the node agent owns every later
/// transition except eviction, where the node controller writes Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkloadPhase {
    #[default]
    Pending,
    Scheduled,
    Running,
    Succeeded,
    Failed,
}

impl WorkloadPhase {
    /// Terminal phases are never left.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkloadPhase::Succeeded | WorkloadPhase::Failed)
    }
}

impl std::fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkloadPhase::Pending => "Pending",
            WorkloadPhase::Scheduled => "Scheduled",
            WorkloadPhase::Running => "Running",
            WorkloadPhase::Succeeded => "Succeeded",
            WorkloadPhase::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// Observed state of a workload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    #[serde(default)]
    pub phase: WorkloadPhase,

    /// Human-readable explanation of the current phase, e.g. why the
    /// workload is unschedulable. Failure is data, not a side channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases() {
        assert!(WorkloadPhase::Succeeded.is_terminal());
        assert!(WorkloadPhase::Failed.is_terminal());
        assert!(!WorkloadPhase::Pending.is_terminal());
        assert!(!WorkloadPhase::Running.is_terminal());
    }

    #[test]
    fn spec_roundtrips_unknown_fields() {
        let json = serde_json::json!({
            "resourceRequests": {"cpuMillis": 250, "memoryBytes": 1024},
            "futureField": {"nested": true},
        });
        let spec: WorkloadSpec = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(spec.resource_requests.cpu_millis, 250);
        let back = serde_json::to_value(&spec).unwrap();
        assert_eq!(back["futureField"], json["futureField"]);
    }
}
