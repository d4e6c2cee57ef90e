//! Node spec, status, and the taint/toleration model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resources::Resources;

/// A repel marker on a node. Workloads are filtered away from tainted
/// nodes unless they carry a matching toleration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Taint {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// A workload's opt-in to placement on a tainted node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    pub key: String,
    /// None tolerates any value of the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Toleration {
    /// True if this toleration covers the given taint.
    pub fn tolerates(&self, taint: &Taint) -> bool {
        self.key == taint.key && (self.value.is_none() || self.value == taint.value)
    }
}

/// Desired state of a worker node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    /// Total resources on the node.
    #[serde(default)]
    pub capacity: Resources,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,

    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Readiness of a node as observed through its heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeReadiness {
    Ready,
    NotReady,
    /// No heartbeat for long enough that the node's state cannot be
    /// assumed either way.
    #[default]
    Unknown,
}

impl std::fmt::Display for NodeReadiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeReadiness::Ready => "Ready",
            NodeReadiness::NotReady => "NotReady",
            NodeReadiness::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

/// A readiness condition with its last transition time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCondition {
    pub readiness: NodeReadiness,
    pub last_transition: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl NodeCondition {
    pub fn new(readiness: NodeReadiness, now: DateTime<Utc>) -> Self {
        Self {
            readiness,
            last_transition: now,
            message: None,
        }
    }
}

impl Default for NodeCondition {
    fn default() -> Self {
        Self::new(NodeReadiness::Unknown, Utc::now())
    }
}

/// Observed state of a node, written by its agent and by the node
/// controller.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    /// Capacity minus whatever the node reserves for itself. The
    /// scheduler places against this, not raw capacity.
    #[serde(default)]
    pub allocatable: Resources,

    #[serde(default)]
    pub condition: NodeCondition,

    /// Renewed by the node agent on every heartbeat; freshness is
    /// judged by the node controller, not by the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,

    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl NodeStatus {
    pub fn is_ready(&self) -> bool {
        self.condition.readiness == NodeReadiness::Ready
    }
}
