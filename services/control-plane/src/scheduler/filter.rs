//! Feasibility filtering: which nodes can host a workload at all.

use keel_api::{Object, Resources, Taint, WorkloadSpec};

/// A node snapshot the scheduler evaluates against: readiness, taints,
/// and what is free after accounting for every workload already bound
/// there.
#[derive(Debug, Clone)]
pub struct NodeView {
    pub name: String,
    pub ready: bool,
    pub allocatable: Resources,
    pub free: Resources,
    pub taints: Vec<Taint>,
}

impl NodeView {
    /// Builds a view from a node object and the resources already
    /// committed to it. Until the agent's first heartbeat the node has
    /// reported nothing, so declared capacity stands in; once it has
    /// heartbeated, its reported allocatable is authoritative even at
    /// zero (a fully reserved host offers nothing).
    pub fn from_object(object: &Object, committed: &Resources) -> Option<NodeView> {
        let (spec, status) = object.as_node()?;
        let allocatable = if status.last_heartbeat.is_none() {
            spec.capacity
        } else {
            status.allocatable
        };
        Some(NodeView {
            name: object.metadata.name.clone(),
            ready: status.is_ready(),
            allocatable,
            free: allocatable.minus(committed),
            taints: spec.taints.clone(),
        })
    }
}

/// Why a node was filtered out for a given workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotReady,
    InsufficientCapacity,
    UntoleratedTaint(String),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::NotReady => write!(f, "node not ready"),
            Rejection::InsufficientCapacity => write!(f, "insufficient capacity"),
            Rejection::UntoleratedTaint(key) => write!(f, "untolerated taint '{key}'"),
        }
    }
}

/// Checks one node against one workload. All predicates must pass.
pub fn check(spec: &WorkloadSpec, node: &NodeView) -> Result<(), Rejection> {
    if !node.ready {
        return Err(Rejection::NotReady);
    }
    for taint in &node.taints {
        if !spec.tolerations.iter().any(|t| t.tolerates(taint)) {
            return Err(Rejection::UntoleratedTaint(taint.key.clone()));
        }
    }
    if !spec.resource_requests.fits_within(&node.free) {
        return Err(Rejection::InsufficientCapacity);
    }
    Ok(())
}

/// Splits nodes into feasible candidates and named rejections.
pub fn feasible<'a>(
    spec: &WorkloadSpec,
    nodes: &'a [NodeView],
) -> (Vec<&'a NodeView>, Vec<(String, Rejection)>) {
    let mut candidates = Vec::new();
    let mut rejections = Vec::new();
    for node in nodes {
        match check(spec, node) {
            Ok(()) => candidates.push(node),
            Err(reason) => rejections.push((node.name.clone(), reason)),
        }
    }
    (candidates, rejections)
}
