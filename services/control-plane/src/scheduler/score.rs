//! Scoring feasible nodes and picking a winner.

use keel_api::Resources;

use super::filter::NodeView;

/// Pluggable scoring step. Higher is better; the scale is 0..=100.
pub trait ScorePolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Scores placing `request` on `node` given its current view.
    /// Callers only invoke this for feasible nodes.
    fn score(&self, request: &Resources, node: &NodeView) -> i64;
}

/// Spreads load by preferring the node that would be left with the most
/// headroom. The score is the worst-case dimension: fraction of
/// allocatable still free after placement, scaled to 0..=100.
pub struct SpreadPolicy;

impl ScorePolicy for SpreadPolicy {
    fn name(&self) -> &'static str {
        "spread"
    }

    fn score(&self, request: &Resources, node: &NodeView) -> i64 {
        let after = node.free.minus(request);
        let cpu = ratio(after.cpu_millis, node.allocatable.cpu_millis);
        let mem = ratio(after.memory_bytes, node.allocatable.memory_bytes);
        cpu.min(mem)
    }
}

fn ratio(free: i64, allocatable: i64) -> i64 {
    if allocatable <= 0 {
        return 0;
    }
    free.saturating_mul(100) / allocatable
}

/// Picks the highest-scoring candidate; ties break on node name so the
/// choice is deterministic across passes and replicas.
pub fn pick<'a>(
    policy: &dyn ScorePolicy,
    request: &Resources,
    candidates: &[&'a NodeView],
) -> Option<&'a NodeView> {
    candidates
        .iter()
        .map(|node| (policy.score(request, node), *node))
        .max_by(|(sa, na), (sb, nb)| sa.cmp(sb).then_with(|| nb.name.cmp(&na.name)))
        .map(|(_, node)| node)
}
