//! Controllers: level-triggered reconcile loops over the object store.
//!
//! Every controller follows the same contract: read the current state,
//! compare it to the desired state, and issue the minimal CAS writes
//! that move one toward the other. Reconciles are idempotent; a
//! converged pass issues zero writes. Conflicted writes are dropped on
//! the floor, the next pass re-reads and retries.

mod backoff;
mod job;
mod node;
mod replicaset;
mod worker;

pub use backoff::Backoff;
pub use job::JobController;
pub use node::NodeController;
pub use replicaset::ReplicaSetController;
pub use worker::ControllerManager;

use chrono::{DateTime, Utc};
use keel_api::Kind;

/// Outcome counters for one reconcile pass over every object of a
/// controller's kind.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Store writes issued (creates, updates, deletes).
    pub writes: usize,
    /// Writes lost to CAS conflicts; retried on the next pass.
    pub conflicts: usize,
    /// Unexpected failures.
    pub errors: usize,
}

impl ReconcileStats {
    pub fn merge(&mut self, other: ReconcileStats) {
        self.writes += other.writes;
        self.conflicts += other.conflicts;
        self.errors += other.errors;
    }
}

/// A reconcile loop the [`ControllerManager`] can drive.
pub trait Controller: Send + Sync {
    fn name(&self) -> &'static str;

    /// Kinds whose changes should trigger an immediate pass.
    fn watched_kinds(&self) -> &'static [Kind];

    /// Reconciles every object this controller manages. `now` is
    /// injected so time-dependent controllers are testable.
    fn reconcile_all(&self, now: DateTime<Utc>) -> ReconcileStats;
}

/// Generates a child name: `{owner}-{5 random lowercase alphanumerics}`.
fn child_name(owner: &str) -> String {
    use rand::Rng;
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    let suffix: String = (0..5)
        .map(|_| CHARS[rng.random_range(0..CHARS.len())] as char)
        .collect();
    format!("{owner}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_names_carry_owner_prefix() {
        let name = child_name("rs-web");
        assert!(name.starts_with("rs-web-"));
        assert_eq!(name.len(), "rs-web-".len() + 5);
    }
}
