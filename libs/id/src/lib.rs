//! # keel-id
//!
//! Stable ID types for objects managed by the keel control plane.
//!
//! ## Design Principles
//!
//! - UIDs are system-generated at object creation and immutable for the
//!   lifetime of the object; names are user-controlled labels
//! - All IDs have a canonical string representation with strict parsing
//! - IDs support roundtrip serialization (parse → format → parse)
//! - IDs are typed to prevent mixing identifier kinds
//!
//! ## ID Format
//!
//! All IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `uid_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `req_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//!
//! This format provides:
//! - Type safety (prefix indicates identifier kind)
//! - Sortability (ULID is time-ordered, so creation order falls out of
//!   a lexicographic sort)
//! - Uniqueness (ULID has 80 bits of randomness)
//! - Human readability (clear prefixes)

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
