//! Lease objects for leader election.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A time-bounded exclusive-holder record.
///
/// A lease is valid while `renew_time + lease_duration_seconds` is in
/// the future; an expired lease may be stolen by any candidate. At most
/// one holder is considered valid at any instant, judged against the
/// store's clock, so holders must renew well inside the duration to
/// survive clock skew and scheduling delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder_identity: Option<String>,

    #[serde(default = "default_lease_duration")]
    pub lease_duration_seconds: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_time: Option<DateTime<Utc>>,

    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_lease_duration() -> i64 {
    15
}

impl Default for LeaseSpec {
    fn default() -> Self {
        Self {
            holder_identity: None,
            lease_duration_seconds: default_lease_duration(),
            renew_time: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl LeaseSpec {
    /// True if the lease has no valid holder at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match (&self.holder_identity, self.renew_time) {
            (Some(_), Some(renewed)) => {
                renewed + Duration::seconds(self.lease_duration_seconds) <= now
            }
            _ => true,
        }
    }

    /// True if `identity` is the valid holder at `now`.
    pub fn is_held_by(&self, identity: &str, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && self.holder_identity.as_deref() == Some(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unheld_lease_is_expired() {
        let lease = LeaseSpec::default();
        assert!(lease.is_expired(Utc::now()));
    }

    #[test]
    fn valid_until_duration_elapses() {
        let now = Utc::now();
        let lease = LeaseSpec {
            holder_identity: Some("sched-a".to_string()),
            lease_duration_seconds: 10,
            renew_time: Some(now),
            ..Default::default()
        };

        assert!(!lease.is_expired(now + Duration::seconds(9)));
        assert!(lease.is_expired(now + Duration::seconds(10)));
        assert!(lease.is_held_by("sched-a", now));
        assert!(!lease.is_held_by("sched-b", now));
        assert!(!lease.is_held_by("sched-a", now + Duration::seconds(11)));
    }
}
