//! # keel-store
//!
//! Durable, versioned object store and watch engine: the single shared
//! substrate every keel component communicates through.
//!
//! # Invariants
//!
//! - The resource version of an object strictly increases on every
//!   mutation; a write carrying a stale version is rejected
//! - A watch stream delivers matching events in increasing version
//!   order with no gaps relative to its starting version
//! - List returns the exact version a watch can resume from, so
//!   list-then-watch observes every subsequent change exactly once
//! - A slow watch consumer is cancelled, never allowed to block or
//!   reorder the mutation path

pub mod lease;

mod error;
mod persist;
mod store;
mod watch;

pub use error::{Result, StoreError};
pub use store::Store;
pub use watch::WatchStream;
