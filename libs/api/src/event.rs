//! Watch events delivered by the store's subscription streams.

use serde::{Deserialize, Serialize};

use crate::object::Object;

/// Kind of change a watch event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
    /// No change; carries a recent resource version so idle watchers
    /// can persist a low-water-mark for cheap reconnection.
    Bookmark,
}

/// A single entry in a watch stream.
///
/// Within one stream the `resource_version`s are strictly increasing
/// (bookmarks aside) and gap-free relative to the stream's starting
/// version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub event_type: WatchEventType,

    /// The object after the change; for `Deleted`, its last state.
    /// Absent on bookmarks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Object>,

    pub resource_version: u64,
}

impl WatchEvent {
    pub fn added(object: Object, resource_version: u64) -> Self {
        Self {
            event_type: WatchEventType::Added,
            object: Some(object),
            resource_version,
        }
    }

    pub fn modified(object: Object, resource_version: u64) -> Self {
        Self {
            event_type: WatchEventType::Modified,
            object: Some(object),
            resource_version,
        }
    }

    pub fn deleted(object: Object, resource_version: u64) -> Self {
        Self {
            event_type: WatchEventType::Deleted,
            object: Some(object),
            resource_version,
        }
    }

    pub fn bookmark(resource_version: u64) -> Self {
        Self {
            event_type: WatchEventType::Bookmark,
            object: None,
            resource_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::WorkloadSpec;

    #[test]
    fn bookmark_omits_object() {
        let json = serde_json::to_value(WatchEvent::bookmark(42)).unwrap();
        assert_eq!(json["type"], "Bookmark");
        assert_eq!(json["resourceVersion"], 42);
        assert!(json.get("object").is_none());
    }

    #[test]
    fn event_roundtrip() {
        let obj = Object::workload("default", "w-1", WorkloadSpec::default());
        let event = WatchEvent::added(obj, 3);
        let json = serde_json::to_string(&event).unwrap();
        let back: WatchEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
