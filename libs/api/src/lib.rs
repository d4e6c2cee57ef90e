//! # keel-api
//!
//! Object model and wire format for the keel control plane.
//!
//! Every piece of state the control plane manages is an [`Object`]: a
//! versioned record with common metadata and a kind-specific spec and
//! status. The `spec` carries desired state and is written by callers;
//! the `status` carries observed state and is written only by
//! controllers and node agents.
//!
//! Objects serialize as JSON with `kind` as the discriminant tag.
//! Unknown fields inside spec and status are preserved across a
//! decode/encode roundtrip so old and new clients can share a store
//! without destroying each other's data.

mod event;
mod lease;
mod meta;
mod node;
mod object;
mod replicaset;
mod resources;
mod selector;
mod workload;

pub use event::{WatchEvent, WatchEventType};
pub use lease::LeaseSpec;
pub use meta::{ObjectKey, ObjectMeta, OwnerReference};
pub use node::{NodeCondition, NodeReadiness, NodeSpec, NodeStatus, Taint, Toleration};
pub use object::{Body, Kind, Object, API_VERSION};
pub use replicaset::{JobPhase, JobSpec, JobStatus, ReplicaSetSpec, ReplicaSetStatus, WorkloadTemplate};
pub use resources::Resources;
pub use selector::labels_match;
pub use workload::{WorkloadPhase, WorkloadSpec, WorkloadStatus};
