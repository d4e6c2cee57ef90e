//! The universal unit of state: a typed, versioned object.

use serde::{Deserialize, Serialize};

use crate::lease::LeaseSpec;
use crate::meta::{ObjectKey, ObjectMeta};
use crate::node::{NodeSpec, NodeStatus};
use crate::replicaset::{JobSpec, JobStatus, ReplicaSetSpec, ReplicaSetStatus};
use crate::workload::{WorkloadSpec, WorkloadStatus};

/// Wire-format version marker carried on every object.
pub const API_VERSION: &str = "keel/v1";

/// The closed set of object kinds the store knows about.
///
/// Kind dispatch is a tagged enum, not runtime reflection: each kind's
/// spec and status are distinct payload types behind [`Body`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    Workload,
    Node,
    ReplicaSet,
    Job,
    Lease,
}

impl Kind {
    pub const ALL: [Kind; 5] = [
        Kind::Workload,
        Kind::Node,
        Kind::ReplicaSet,
        Kind::Job,
        Kind::Lease,
    ];

    /// URL path segment for this kind (lowercase plural).
    pub fn path_segment(&self) -> &'static str {
        match self {
            Kind::Workload => "workloads",
            Kind::Node => "nodes",
            Kind::ReplicaSet => "replicasets",
            Kind::Job => "jobs",
            Kind::Lease => "leases",
        }
    }

    /// Parses a URL path segment back into a kind.
    pub fn from_path_segment(s: &str) -> Option<Kind> {
        Kind::ALL.into_iter().find(|k| k.path_segment() == s)
    }

    /// Nodes are cluster-scoped; everything else lives in a namespace.
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, Kind::Node)
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Kind::Workload => "workload",
            Kind::Node => "node",
            Kind::ReplicaSet => "replicaset",
            Kind::Job => "job",
            Kind::Lease => "lease",
        };
        write!(f, "{s}")
    }
}

/// Kind-specific payload: desired state (`spec`) plus observed state
/// (`status`). The `kind` field is the serde tag, so the wire form is
/// `{"kind": "Workload", "spec": ..., "status": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Body {
    Workload {
        #[serde(default)]
        spec: WorkloadSpec,
        #[serde(default)]
        status: WorkloadStatus,
    },
    Node {
        #[serde(default)]
        spec: NodeSpec,
        #[serde(default)]
        status: NodeStatus,
    },
    ReplicaSet {
        #[serde(default)]
        spec: ReplicaSetSpec,
        #[serde(default)]
        status: ReplicaSetStatus,
    },
    Job {
        #[serde(default)]
        spec: JobSpec,
        #[serde(default)]
        status: JobStatus,
    },
    Lease {
        #[serde(default)]
        spec: LeaseSpec,
    },
}

impl Body {
    pub fn kind(&self) -> Kind {
        match self {
            Body::Workload { .. } => Kind::Workload,
            Body::Node { .. } => Kind::Node,
            Body::ReplicaSet { .. } => Kind::ReplicaSet,
            Body::Job { .. } => Kind::Job,
            Body::Lease { .. } => Kind::Lease,
        }
    }
}

/// A complete object: version marker, metadata, and kind payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,

    pub metadata: ObjectMeta,

    #[serde(flatten)]
    pub body: Body,
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

impl Object {
    fn new(metadata: ObjectMeta, body: Body) -> Self {
        Self {
            api_version: default_api_version(),
            metadata,
            body,
        }
    }

    pub fn workload(
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: WorkloadSpec,
    ) -> Self {
        Self::new(
            ObjectMeta::namespaced(namespace, name),
            Body::Workload {
                spec,
                status: WorkloadStatus::default(),
            },
        )
    }

    pub fn node(name: impl Into<String>, spec: NodeSpec) -> Self {
        Self::new(
            ObjectMeta::cluster_scoped(name),
            Body::Node {
                spec,
                status: NodeStatus::default(),
            },
        )
    }

    pub fn replica_set(
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: ReplicaSetSpec,
    ) -> Self {
        Self::new(
            ObjectMeta::namespaced(namespace, name),
            Body::ReplicaSet {
                spec,
                status: ReplicaSetStatus::default(),
            },
        )
    }

    pub fn job(namespace: impl Into<String>, name: impl Into<String>, spec: JobSpec) -> Self {
        Self::new(
            ObjectMeta::namespaced(namespace, name),
            Body::Job {
                spec,
                status: JobStatus::default(),
            },
        )
    }

    pub fn lease(namespace: impl Into<String>, name: impl Into<String>, spec: LeaseSpec) -> Self {
        Self::new(ObjectMeta::namespaced(namespace, name), Body::Lease { spec })
    }

    pub fn kind(&self) -> Kind {
        self.body.kind()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(
            self.kind(),
            self.metadata.namespace.clone(),
            self.metadata.name.clone(),
        )
    }

    pub fn as_workload(&self) -> Option<(&WorkloadSpec, &WorkloadStatus)> {
        match &self.body {
            Body::Workload { spec, status } => Some((spec, status)),
            _ => None,
        }
    }

    pub fn as_workload_mut(&mut self) -> Option<(&mut WorkloadSpec, &mut WorkloadStatus)> {
        match &mut self.body {
            Body::Workload { spec, status } => Some((spec, status)),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<(&NodeSpec, &NodeStatus)> {
        match &self.body {
            Body::Node { spec, status } => Some((spec, status)),
            _ => None,
        }
    }

    pub fn as_node_mut(&mut self) -> Option<(&mut NodeSpec, &mut NodeStatus)> {
        match &mut self.body {
            Body::Node { spec, status } => Some((spec, status)),
            _ => None,
        }
    }

    pub fn as_replica_set(&self) -> Option<(&ReplicaSetSpec, &ReplicaSetStatus)> {
        match &self.body {
            Body::ReplicaSet { spec, status } => Some((spec, status)),
            _ => None,
        }
    }

    pub fn as_replica_set_mut(&mut self) -> Option<(&mut ReplicaSetSpec, &mut ReplicaSetStatus)> {
        match &mut self.body {
            Body::ReplicaSet { spec, status } => Some((spec, status)),
            _ => None,
        }
    }

    pub fn as_job(&self) -> Option<(&JobSpec, &JobStatus)> {
        match &self.body {
            Body::Job { spec, status } => Some((spec, status)),
            _ => None,
        }
    }

    pub fn as_job_mut(&mut self) -> Option<(&mut JobSpec, &mut JobStatus)> {
        match &mut self.body {
            Body::Job { spec, status } => Some((spec, status)),
            _ => None,
        }
    }

    pub fn as_lease(&self) -> Option<&LeaseSpec> {
        match &self.body {
            Body::Lease { spec } => Some(spec),
            _ => None,
        }
    }

    pub fn as_lease_mut(&mut self) -> Option<&mut LeaseSpec> {
        match &mut self.body {
            Body::Lease { spec } => Some(spec),
            _ => None,
        }
    }

    /// Structural validation applied by the store on create and update.
    ///
    /// An invalid object is rejected whole; nothing is partially
    /// applied.
    pub fn validate(&self) -> Result<(), String> {
        let name = &self.metadata.name;
        if name.is_empty() {
            return Err("metadata.name must not be empty".to_string());
        }
        if name.len() > 253 {
            return Err("metadata.name must be at most 253 characters".to_string());
        }
        if name.contains('/') || name.chars().any(char::is_whitespace) {
            return Err("metadata.name must not contain '/' or whitespace".to_string());
        }
        if self.kind().is_namespaced() && self.metadata.namespace.is_empty() {
            return Err(format!("{} objects require a namespace", self.kind()));
        }
        if !self.kind().is_namespaced() && !self.metadata.namespace.is_empty() {
            return Err(format!("{} objects are cluster-scoped", self.kind()));
        }

        match &self.body {
            Body::Workload { spec, .. } => {
                if spec.resource_requests.is_negative() {
                    return Err("spec.resourceRequests must be non-negative".to_string());
                }
            }
            Body::Node { spec, .. } => {
                if spec.capacity.is_negative() {
                    return Err("spec.capacity must be non-negative".to_string());
                }
            }
            Body::ReplicaSet { spec, .. } => {
                if spec.replicas < 0 {
                    return Err("spec.replicas must be non-negative".to_string());
                }
                if spec.replicas > 0 && spec.selector.is_empty() {
                    return Err("spec.selector must not be empty".to_string());
                }
                if !crate::selector::labels_match(&spec.selector, &spec.template.labels) {
                    return Err("spec.template.labels must satisfy spec.selector".to_string());
                }
                if spec.template.spec.resource_requests.is_negative() {
                    return Err("template resourceRequests must be non-negative".to_string());
                }
            }
            Body::Job { spec, .. } => {
                if spec.completions < 1 {
                    return Err("spec.completions must be at least 1".to_string());
                }
                if spec.backoff_limit < 0 {
                    return Err("spec.backoffLimit must be non-negative".to_string());
                }
                if spec.selector.is_empty() {
                    return Err("spec.selector must not be empty".to_string());
                }
                if !crate::selector::labels_match(&spec.selector, &spec.template.labels) {
                    return Err("spec.template.labels must satisfy spec.selector".to_string());
                }
            }
            Body::Lease { spec } => {
                if spec.lease_duration_seconds <= 0 {
                    return Err("spec.leaseDurationSeconds must be positive".to_string());
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replicaset::{ReplicaSetSpec, WorkloadTemplate};
    use crate::resources::Resources;

    #[test]
    fn wire_format_shape() {
        let mut obj = Object::workload(
            "default",
            "w-1",
            WorkloadSpec {
                resource_requests: Resources::new(500, 1 << 20),
                ..Default::default()
            },
        );
        obj.metadata.resource_version = 7;

        let json = serde_json::to_value(&obj).unwrap();
        assert_eq!(json["kind"], "Workload");
        assert_eq!(json["apiVersion"], API_VERSION);
        assert_eq!(json["metadata"]["resourceVersion"], 7);
        assert_eq!(json["spec"]["resourceRequests"]["cpuMillis"], 500);
        assert_eq!(json["status"]["phase"], "Pending");

        let back: Object = serde_json::from_value(json).unwrap();
        assert_eq!(back, obj);
    }

    #[test]
    fn kind_path_segments_roundtrip() {
        for kind in Kind::ALL {
            assert_eq!(Kind::from_path_segment(kind.path_segment()), Some(kind));
        }
        assert_eq!(Kind::from_path_segment("widgets"), None);
    }

    #[test]
    fn validate_rejects_bad_names() {
        let obj = Object::workload("default", "", WorkloadSpec::default());
        assert!(obj.validate().is_err());

        let obj = Object::workload("default", "a/b", WorkloadSpec::default());
        assert!(obj.validate().is_err());
    }

    #[test]
    fn validate_rejects_selector_template_mismatch() {
        let spec = ReplicaSetSpec {
            replicas: 2,
            selector: [("app".to_string(), "web".to_string())].into(),
            template: WorkloadTemplate::default(),
            ..Default::default()
        };
        let obj = Object::replica_set("default", "rs-1", spec);
        assert!(obj.validate().is_err());
    }

    #[test]
    fn validate_node_namespace_rules() {
        let mut node = Object::node("n-1", NodeSpec::default());
        assert!(node.validate().is_ok());
        node.metadata.namespace = "default".to_string();
        assert!(node.validate().is_err());
    }
}
