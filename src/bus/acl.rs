//! # Per-topic access control.
//!
//! [`AclTable`] maps a topic (or subscription pattern, compared verbatim) to the
//! set of principals allowed to publish on / subscribe to it. Topics absent from
//! the table are open to everyone. Delivery is checked against the concrete
//! topic too, so wildcard subscriptions do not widen access.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Topic → allowed principals.
///
/// ```
/// use healvisor::AclTable;
///
/// let acl = AclTable::new().allow("system.control", ["orchestrator"]);
/// assert!(acl.is_allowed("orchestrator", "system.control"));
/// assert!(!acl.is_allowed("random_service", "system.control"));
/// assert!(acl.is_allowed("random_service", "task.enqueue")); // not listed → open
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AclTable {
    rules: HashMap<String, BTreeSet<String>>,
}

impl AclTable {
    /// Creates an empty (fully open) table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts `topic` to `principals` (adds to any existing allow-list).
    pub fn allow<I, S>(mut self, topic: impl Into<String>, principals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(topic, principals);
        self
    }

    /// In-place variant of [`allow`](Self::allow).
    pub fn insert<I, S>(&mut self, topic: impl Into<String>, principals: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules
            .entry(topic.into())
            .or_default()
            .extend(principals.into_iter().map(Into::into));
    }

    /// Drops the rule for `topic`, making it open again.
    pub fn remove(&mut self, topic: &str) -> bool {
        self.rules.remove(topic).is_some()
    }

    /// Returns true if `principal` may use `topic`.
    pub fn is_allowed(&self, principal: &str, topic: &str) -> bool {
        match self.rules.get(topic) {
            None => true,
            Some(allowed) => allowed.contains(principal),
        }
    }

    /// True when no topic is restricted.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restricted_topic_only_admits_listed_principals() {
        let mut acl = AclTable::new().allow("system.control", ["orchestrator", "runtime"]);
        assert!(acl.is_allowed("runtime", "system.control"));
        assert!(!acl.is_allowed("random_service", "system.control"));

        assert!(acl.remove("system.control"));
        assert!(acl.is_allowed("random_service", "system.control"));
        assert!(acl.is_empty());
    }

    #[test]
    fn deserializes_from_plain_map() {
        let acl: AclTable =
            serde_json::from_value(serde_json::json!({ "system.control": ["orchestrator"] }))
                .unwrap();
        assert!(acl.is_allowed("orchestrator", "system.control"));
        assert!(!acl.is_allowed("other", "system.control"));
    }
}
