//! Jittered exponential backoff for failing reconcile loops.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;

/// Tracks consecutive failures per key and hands out growing, jittered
/// delays. A success resets the key.
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempts: Mutex<HashMap<String, u32>>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Records a failure and returns how long to wait before retrying.
    pub fn next_delay(&self, key: &str) -> Duration {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
            let entry = attempts.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
            *entry
        };

        let exp = self.base.saturating_mul(1u32 << (attempt - 1).min(16));
        let capped = exp.min(self.max);

        // Up to 20% jitter keeps concurrent retries from aligning.
        let jitter = rand::rng().random_range(0.0..=0.2);
        capped.mul_f64(1.0 + jitter).min(self.max)
    }

    pub fn reset(&self, key: &str) {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}
