//! Common object metadata.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use keel_id::Uid;
use serde::{Deserialize, Serialize};

use crate::object::Kind;

/// A back-reference from an owned object to its owner.
///
/// Ownership is modelled as data (the owner's uid), never as a live
/// pointer; controllers resolve owners by store lookup. The `uid` check
/// protects against an owner that was deleted and recreated under the
/// same name adopting the old owner's children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: Kind,
    pub name: String,
    pub uid: Uid,
    /// True if this owner is the managing controller for the object.
    #[serde(default)]
    pub controller: bool,
}

/// Metadata common to all objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub namespace: String,

    pub name: String,

    /// Immutable identifier assigned by the store at creation.
    ///
    /// Distinguishes lineages: deleting and recreating an object under
    /// the same (kind, namespace, name) yields a fresh uid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,

    /// Monotonically increasing version, assigned by the store on every
    /// mutation. A write carrying a stale value is rejected.
    #[serde(default)]
    pub resource_version: u64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    /// Set when graceful deletion begins; the object is removed once
    /// all finalizers are cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

impl ObjectMeta {
    /// Metadata for a namespaced object.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Metadata for a cluster-scoped object (empty namespace).
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// True once graceful deletion has begun.
    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// The controller owner reference, if any.
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }

    /// True if this object is owned (controller reference) by the given
    /// owner identity.
    pub fn is_controlled_by(&self, kind: Kind, name: &str, uid: Uid) -> bool {
        self.controller_owner()
            .is_some_and(|r| r.kind == kind && r.name == name && r.uid == uid)
    }
}

/// Store identity of an object: (kind, namespace, name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub kind: Kind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: Kind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}
