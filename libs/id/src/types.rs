//! Typed ID definitions.
//!
//! Object identity in the store is the (kind, namespace, name) triple;
//! the `Uid` exists to distinguish two lineages that reuse the same
//! identity (delete + recreate produces a fresh `Uid`). IDs are
//! ULID-based so a lexicographic sort is also a creation-time sort.

use crate::define_id;

define_id!(Uid, "uid");
define_id!(RequestId, "req");
