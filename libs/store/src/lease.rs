//! Lease operations for leader election.
//!
//! Leases are ordinary store objects; mutual exclusion comes entirely
//! from the store's optimistic concurrency. Two candidates racing for
//! an expired lease both read the same resource version and issue an
//! update, and the store's CAS lets exactly one through. Callers pass
//! `now` explicitly so expiry logic is testable without a wall clock.

use chrono::{DateTime, Utc};
use keel_api::{Kind, LeaseSpec, Object};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::store::Store;

/// Namespace that holds control-plane leases.
pub const LEASE_NAMESPACE: &str = "keel-system";

/// Attempts to take or keep the lease for `identity`.
///
/// Returns true if `identity` holds the lease on return. A lost race
/// (another candidate created or updated the lease first) is not an
/// error, just false.
pub fn try_acquire(
    store: &Store,
    namespace: &str,
    name: &str,
    identity: &str,
    duration_seconds: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let current = match store.get(Kind::Lease, namespace, name) {
        Ok(object) => object,
        Err(StoreError::NotFound(_)) => {
            let fresh = Object::lease(
                namespace,
                name,
                LeaseSpec {
                    holder_identity: Some(identity.to_string()),
                    lease_duration_seconds: duration_seconds,
                    renew_time: Some(now),
                    ..Default::default()
                },
            );
            return match store.create(fresh) {
                Ok(_) => {
                    debug!(lease = name, identity, "Lease created and acquired");
                    Ok(true)
                }
                Err(StoreError::AlreadyExists(_)) => Ok(false),
                Err(e) => Err(e),
            };
        }
        Err(e) => return Err(e),
    };

    let Some(spec) = current.as_lease() else {
        return Err(StoreError::Invalid(format!("{name} is not a lease")));
    };

    if spec.is_held_by(identity, now) {
        return renew_object(store, current, identity, now);
    }

    if !spec.is_expired(now) {
        return Ok(false);
    }

    // Expired: steal it. CAS arbitrates concurrent stealers.
    let previous = spec.holder_identity.clone();
    let mut takeover = current;
    if let Some(spec) = takeover.as_lease_mut() {
        spec.holder_identity = Some(identity.to_string());
        spec.lease_duration_seconds = duration_seconds;
        spec.renew_time = Some(now);
    }
    match store.update(takeover) {
        Ok(_) => {
            debug!(lease = name, identity, ?previous, "Lease taken over");
            Ok(true)
        }
        Err(StoreError::Conflict { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Renews the lease if `identity` is the current valid holder.
///
/// Returns false (not an error) when the lease is gone, expired, or
/// held by someone else; the caller should stand down and re-campaign.
pub fn renew(
    store: &Store,
    namespace: &str,
    name: &str,
    identity: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let current = match store.get(Kind::Lease, namespace, name) {
        Ok(object) => object,
        Err(StoreError::NotFound(_)) => return Ok(false),
        Err(e) => return Err(e),
    };

    let Some(spec) = current.as_lease() else {
        return Err(StoreError::Invalid(format!("{name} is not a lease")));
    };
    if !spec.is_held_by(identity, now) {
        return Ok(false);
    }

    renew_object(store, current, identity, now)
}

fn renew_object(
    store: &Store,
    mut lease: Object,
    identity: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    if let Some(spec) = lease.as_lease_mut() {
        spec.holder_identity = Some(identity.to_string());
        spec.renew_time = Some(now);
    }
    match store.update(lease) {
        Ok(_) => Ok(true),
        Err(StoreError::Conflict { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Releases the lease if `identity` holds it, letting a standby take
/// over without waiting for expiry.
pub fn release(store: &Store, namespace: &str, name: &str, identity: &str) -> Result<()> {
    let current = match store.get(Kind::Lease, namespace, name) {
        Ok(object) => object,
        Err(StoreError::NotFound(_)) => return Ok(()),
        Err(e) => return Err(e),
    };

    if current.as_lease().map(|s| s.holder_identity.as_deref()) != Some(Some(identity)) {
        return Ok(());
    }

    let mut released = current;
    if let Some(spec) = released.as_lease_mut() {
        spec.holder_identity = None;
        spec.renew_time = None;
    }
    match store.update(released) {
        Ok(_) | Err(StoreError::Conflict { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}
