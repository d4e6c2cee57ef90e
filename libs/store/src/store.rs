//! The versioned object store.
//!
//! One global version counter, one critical section. Every successful
//! mutation increments the counter, stamps the object, appends to the
//! durability log, and feeds watch subscribers synchronously before the
//! lock is released. That total order across all objects (not just one
//! kind) is what lets a watcher resume precisely from any version it
//! has seen.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use keel_api::{Body, Kind, Object, ObjectKey, WatchEvent, labels_match};
use keel_id::Uid;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::persist::{LogOp, LogRecord, Wal};
use crate::watch::{Subscriber, WatchFilter, WatchStream, SUBSCRIBER_QUEUE_DEPTH};

/// How many committed events are retained for watch replay before the
/// oldest are compacted away.
const DEFAULT_HISTORY_LIMIT: usize = 4096;

struct Inner {
    objects: BTreeMap<ObjectKey, Object>,
    /// The global version counter. Strictly increases on every
    /// successful mutation; assigned as the new resource version.
    version: u64,
    /// Committed events in version order, bounded by `history_limit`.
    history: VecDeque<WatchEvent>,
    history_limit: usize,
    /// Highest version evicted from `history`. Watches starting at or
    /// below this cannot be served gap-free and fail with `Expired`.
    compacted_through: u64,
    subscribers: Vec<Subscriber>,
    next_subscriber_id: u64,
    wal: Option<Wal>,
}

/// Durable, versioned key-value store for typed objects, with ordered
/// gap-free watch streams.
pub struct Store {
    inner: Mutex<Inner>,
}

impl Store {
    /// An in-memory store (tests, embedded use).
    pub fn new() -> Self {
        Self::build(None, DEFAULT_HISTORY_LIMIT)
    }

    /// An in-memory store with a custom replay-history bound.
    pub fn with_history_limit(history_limit: usize) -> Self {
        Self::build(None, history_limit)
    }

    /// Opens a durable store, replaying the append-only log at `path`.
    ///
    /// The version counter resumes from the last committed record.
    /// Replay history starts empty, so watchers from before the restart
    /// re-list and resume from the fresh snapshot version.
    pub fn open(path: &Path) -> Result<Self> {
        let (wal, records) = Wal::open(path)
            .map_err(|e| StoreError::Unavailable(format!("open log {}: {e}", path.display())))?;

        let mut objects = BTreeMap::new();
        let mut version = 0u64;
        for record in records {
            version = version.max(record.resource_version);
            let key = record.object.key();
            match record.op {
                LogOp::Applied => {
                    objects.insert(key, record.object);
                }
                LogOp::Removed => {
                    objects.remove(&key);
                }
            }
        }

        debug!(
            objects = objects.len(),
            version, "Replayed store from durability log"
        );

        let store = Self::build(Some(wal), DEFAULT_HISTORY_LIMIT);
        {
            let mut inner = store.lock();
            inner.objects = objects;
            inner.version = version;
            inner.compacted_through = version;
        }
        Ok(store)
    }

    fn build(wal: Option<Wal>, history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                objects: BTreeMap::new(),
                version: 0,
                history: VecDeque::new(),
                history_limit,
                compacted_through: 0,
                subscribers: Vec::new(),
                next_subscriber_id: 0,
                wal,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicked writer leaves no torn state behind: every mutation
        // is applied in full before the lock drops.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates an object, assigning its uid and first resource version.
    pub fn create(&self, mut object: Object) -> Result<Object> {
        object.validate().map_err(StoreError::Invalid)?;
        let key = object.key();

        let mut inner = self.lock();
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }

        object.metadata.uid = Some(Uid::new());
        object.metadata.creation_timestamp = Some(Utc::now());
        object.metadata.deletion_timestamp = None;

        let stored = inner.commit(LogOp::Applied, EventShape::Added, object)?;
        Ok(stored)
    }

    /// Fetches one object by identity.
    pub fn get(&self, kind: Kind, namespace: &str, name: &str) -> Result<Object> {
        let key = ObjectKey::new(kind, namespace, name);
        let inner = self.lock();
        inner
            .objects
            .get(&key)
            .cloned()
            .ok_or(StoreError::NotFound(key))
    }

    /// Replaces an object under optimistic concurrency.
    ///
    /// The caller's resource version must equal the stored one or the
    /// write fails with `Conflict`; there is no silent merge. Immutable
    /// metadata (uid, creation timestamp, deletion timestamp) is
    /// carried over from the stored object. If the update clears the
    /// last finalizer of a deleting object, the object is removed.
    pub fn update(&self, mut object: Object) -> Result<Object> {
        object.validate().map_err(StoreError::Invalid)?;
        let key = object.key();

        let mut inner = self.lock();
        let stored = inner
            .objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if object.metadata.resource_version != stored.metadata.resource_version {
            return Err(StoreError::Conflict {
                key,
                stored: stored.metadata.resource_version,
                sent: object.metadata.resource_version,
            });
        }

        // Binding is one-way: a bound workload is never moved, only
        // deleted and recreated.
        if let (Body::Workload { spec: new, .. }, Some((old, _))) =
            (&object.body, stored.as_workload())
        {
            if !old.node_name.is_empty() && new.node_name != old.node_name {
                return Err(StoreError::Invalid(format!(
                    "spec.nodeName is immutable once set (bound to {})",
                    old.node_name
                )));
            }
        }

        object.metadata.uid = stored.metadata.uid;
        object.metadata.creation_timestamp = stored.metadata.creation_timestamp;
        object.metadata.deletion_timestamp = stored.metadata.deletion_timestamp;

        if object.metadata.is_deleting() && object.metadata.finalizers.is_empty() {
            // Last finalizer cleared: graceful deletion completes.
            let removed = inner.commit(LogOp::Removed, EventShape::Deleted, object)?;
            return Ok(removed);
        }

        let stored = inner.commit(LogOp::Applied, EventShape::Modified, object)?;
        Ok(stored)
    }

    /// Deletes an object, or begins graceful deletion if it carries
    /// finalizers.
    pub fn delete(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
        expected_resource_version: Option<u64>,
    ) -> Result<()> {
        let key = ObjectKey::new(kind, namespace, name);

        let mut inner = self.lock();
        let stored = inner
            .objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?
            .clone();

        if let Some(sent) = expected_resource_version {
            if sent != stored.metadata.resource_version {
                return Err(StoreError::Conflict {
                    key,
                    stored: stored.metadata.resource_version,
                    sent,
                });
            }
        }

        if stored.metadata.finalizers.is_empty() {
            inner.commit(LogOp::Removed, EventShape::Deleted, stored)?;
            return Ok(());
        }

        if stored.metadata.is_deleting() {
            // Graceful deletion already in progress.
            return Ok(());
        }

        let mut deleting = stored;
        deleting.metadata.deletion_timestamp = Some(Utc::now());
        inner.commit(LogOp::Applied, EventShape::Modified, deleting)?;
        Ok(())
    }

    /// Consistent point-in-time read of a kind.
    ///
    /// Returns the matching objects in key order plus the store version
    /// at the snapshot, which is the exact version to resume a watch
    /// from.
    pub fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        selector: Option<&BTreeMap<String, String>>,
    ) -> (Vec<Object>, u64) {
        let inner = self.lock();
        let objects = inner
            .objects
            .values()
            .filter(|o| o.kind() == kind)
            .filter(|o| namespace.is_none_or(|ns| o.metadata.namespace == ns))
            .filter(|o| selector.is_none_or(|s| labels_match(s, &o.metadata.labels)))
            .cloned()
            .collect();
        (objects, inner.version)
    }

    /// Subscribes to changes of a kind from `start_resource_version`
    /// (exclusive).
    ///
    /// Events already committed above the starting version are replayed
    /// from history; everything committed after registration arrives
    /// live. Fails with `Expired` when the starting version has been
    /// compacted away, telling the caller to re-list and restart from
    /// the new snapshot version.
    pub fn watch(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        start_resource_version: u64,
    ) -> Result<WatchStream> {
        let mut inner = self.lock();

        if start_resource_version < inner.compacted_through {
            return Err(StoreError::Expired {
                requested: start_resource_version,
                oldest: inner.compacted_through,
            });
        }

        let filter = WatchFilter {
            kind,
            namespace: namespace.map(str::to_string),
        };

        let backlog: VecDeque<WatchEvent> = inner
            .history
            .iter()
            .filter(|e| e.resource_version > start_resource_version)
            .filter(|e| e.object.is_some() && filter.matches(e))
            .cloned()
            .collect();

        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        inner.subscribers.push(Subscriber { id, filter, tx });

        debug!(subscriber = id, %kind, start_resource_version, "Watch attached");
        Ok(WatchStream::new(backlog, rx))
    }

    /// Emits a bookmark carrying the current version to every
    /// subscriber. Driven by a periodic task so long-lived idle
    /// watchers can persist a recent low-water-mark.
    pub fn broadcast_bookmark(&self) {
        let mut inner = self.lock();
        let event = WatchEvent::bookmark(inner.version);
        inner.fan_out(&event);
    }

    /// The current global version.
    pub fn latest_version(&self) -> u64 {
        self.lock().version
    }

    /// Rewrites the durability log down to one record per live object.
    pub fn compact_log(&self) -> Result<()> {
        let mut inner = self.lock();
        let records: Vec<LogRecord> = inner
            .objects
            .values()
            .map(|o| LogRecord {
                resource_version: o.metadata.resource_version,
                op: LogOp::Applied,
                object: o.clone(),
            })
            .collect();

        if let Some(wal) = inner.wal.as_mut() {
            wal.rewrite(records.into_iter())
                .map_err(|e| StoreError::Unavailable(format!("compact log: {e}")))?;
        }
        Ok(())
    }

    /// Number of live objects, across all kinds.
    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// Which watch event shape a commit produces.
#[derive(Clone, Copy)]
enum EventShape {
    Added,
    Modified,
    Deleted,
}

impl Inner {
    /// Commits one mutation: assign the next version, write the log,
    /// apply to the map, record history, and fan out to subscribers.
    /// All inside the caller's critical section, so no event is ever
    /// lost between a List and a Watch.
    fn commit(&mut self, op: LogOp, shape: EventShape, mut object: Object) -> Result<Object> {
        let version = self.version + 1;
        object.metadata.resource_version = version;

        if let Some(wal) = self.wal.as_mut() {
            wal.append(&LogRecord {
                resource_version: version,
                op,
                object: object.clone(),
            })
            .map_err(|e| StoreError::Unavailable(format!("append log: {e}")))?;
        }

        self.version = version;
        let key = object.key();
        match op {
            LogOp::Applied => {
                self.objects.insert(key, object.clone());
            }
            LogOp::Removed => {
                self.objects.remove(&key);
            }
        }

        let event = match shape {
            EventShape::Added => WatchEvent::added(object.clone(), version),
            EventShape::Modified => WatchEvent::modified(object.clone(), version),
            EventShape::Deleted => WatchEvent::deleted(object.clone(), version),
        };

        self.history.push_back(event.clone());
        while self.history.len() > self.history_limit {
            if let Some(evicted) = self.history.pop_front() {
                self.compacted_through = evicted.resource_version;
            }
        }

        self.fan_out(&event);
        Ok(object)
    }

    /// Offers an event to every subscriber; subscribers that overflow
    /// their bounded queue are cancelled so a slow consumer can never
    /// block or corrupt the mutation path.
    fn fan_out(&mut self, event: &WatchEvent) {
        let mut dropped = Vec::new();
        self.subscribers.retain(|s| {
            if s.offer(event) {
                true
            } else {
                dropped.push(s.id);
                false
            }
        });
        for id in dropped {
            warn!(subscriber = id, "Watch subscriber overflowed, cancelling");
        }
    }
}
