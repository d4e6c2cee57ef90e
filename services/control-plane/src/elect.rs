//! Lease-based leader election.
//!
//! Redundant scheduler / controller-manager replicas all run this
//! campaign loop; exactly one holds the lease at a time and the rest
//! block as warm standbys. Leadership gates whole reconciliation
//! passes, not individual writes - every write is still CAS-protected
//! by the store, so correctness holds even if two replicas briefly
//! both believe they lead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keel_store::{lease, Result, Store};
use tokio::sync::watch;
use tracing::{info, warn};

/// Campaigns for a named lease and tracks whether we currently hold it.
pub struct LeaderElector {
    store: Arc<Store>,
    lease_name: String,
    identity: String,
    lease_duration: Duration,
    is_leader: AtomicBool,
}

impl LeaderElector {
    pub fn new(
        store: Arc<Store>,
        lease_name: impl Into<String>,
        identity: impl Into<String>,
        lease_duration: Duration,
    ) -> Self {
        Self {
            store,
            lease_name: lease_name.into(),
            identity: identity.into(),
            lease_duration,
            is_leader: AtomicBool::new(false),
        }
    }

    /// True if this replica held the lease at the last campaign step.
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// One acquire-or-renew step. Transitions are logged; a lost
    /// leadership immediately stops gated workers at their next pass.
    pub fn campaign_once(&self, now: DateTime<Utc>) -> Result<bool> {
        let held = lease::try_acquire(
            &self.store,
            lease::LEASE_NAMESPACE,
            &self.lease_name,
            &self.identity,
            self.lease_duration.as_secs() as i64,
            now,
        )?;

        let was = self.is_leader.swap(held, Ordering::SeqCst);
        if held && !was {
            info!(lease = %self.lease_name, identity = %self.identity, "Acquired leadership");
        } else if !held && was {
            warn!(lease = %self.lease_name, identity = %self.identity, "Lost leadership");
        }
        Ok(held)
    }

    /// Campaign until shutdown, renewing at a third of the lease
    /// duration so a single missed renewal never costs the lease.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let step = (self.lease_duration / 3).max(Duration::from_secs(1));
        let mut interval = tokio::time::interval(step);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.campaign_once(Utc::now()) {
                        // Fail closed: without a readable lease we must
                        // assume someone else leads.
                        warn!(lease = %self.lease_name, error = %e, "Campaign step failed");
                        self.is_leader.store(false, Ordering::SeqCst);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if self.is_leader.swap(false, Ordering::SeqCst) {
            if let Err(e) = lease::release(
                &self.store,
                lease::LEASE_NAMESPACE,
                &self.lease_name,
                &self.identity,
            ) {
                warn!(lease = %self.lease_name, error = %e, "Failed to release lease on shutdown");
            }
            info!(lease = %self.lease_name, "Released leadership on shutdown");
        }
    }
}
