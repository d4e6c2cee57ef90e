//! Store error taxonomy.

use keel_api::ObjectKey;
use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the object store.
///
/// `Conflict` and `Unavailable` are locally recoverable: callers re-Get
/// (or back off) and retry. `Expired` tells a watcher to re-List and
/// restart from the fresh snapshot version. `Invalid` and `NotFound`
/// are surfaced to the caller immediately; retrying cannot change an
/// invalid input.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(ObjectKey),

    #[error("{0} already exists")]
    AlreadyExists(ObjectKey),

    /// The caller's resource version is stale. Re-Get and retry; the
    /// store never merges.
    #[error("conflict on {key}: stored resource version is {stored}, caller sent {sent}")]
    Conflict {
        key: ObjectKey,
        stored: u64,
        sent: u64,
    },

    /// The requested watch resumption point has been compacted away.
    #[error("resource version {requested} has been compacted (oldest replayable: {oldest})")]
    Expired { requested: u64, oldest: u64 },

    #[error("invalid object: {0}")]
    Invalid(String),

    /// Transient failure (e.g. the durability log could not be
    /// written). Retry with backoff.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// True for errors a component should retry with backoff rather
    /// than surface.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::Unavailable(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
