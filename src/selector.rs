//! Label-equality selector matching
//!
//! An AgentPolicy picks its cards with a `matchLabels` map. A card matches
//! when every selector key is present on the card with an equal value;
//! extra labels on the card are ignored and an empty selector matches
//! every card.

use std::collections::BTreeMap;

use crate::crd::AgentSelector;

/// Check whether `labels` satisfy every key/value pair in `selector`
pub fn matches(labels: &BTreeMap<String, String>, selector: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

impl AgentSelector {
    /// Check if a card's labels match this selector
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        matches(labels, &self.match_labels)
    }
}
