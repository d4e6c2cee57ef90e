//! Label selector matching.

use std::collections::BTreeMap;

/// True if every (key, value) pair of `selector` is present in `labels`.
///
/// An empty selector matches everything, which callers that own objects
/// by label must guard against themselves.
pub fn labels_match(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|lv| lv == v))
}
