use serde::{Deserialize, Serialize};

use super::acl::AclTable;
use super::queue::OverflowPolicy;

/// Message bus settings.
///
/// ## Field semantics
/// - `queue_capacity`: per-subscriber queue bound (min 1; clamped by the queue)
/// - `overflow`: which message is lost when a queue is full
/// - `acl`: topic → allowed principals; unlisted topics are open
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub acl: AclTable,
}

impl Default for BusConfig {
    /// - `queue_capacity = 1024`
    /// - `overflow = DropNewest`
    /// - `acl` empty (all topics open)
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            overflow: OverflowPolicy::DropNewest,
            acl: AclTable::default(),
        }
    }
}
