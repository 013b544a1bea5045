//! # Four priority queues.
//!
//! One binary heap per [`Priority`]. Inside a heap, tasks with a deadline come
//! first (earliest deadline first), then tasks without one in arrival order.
//! Workers always drain the highest non-empty heap.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tokio::time::Instant;

use super::task::TaskId;
use crate::bus::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry {
    pub id: TaskId,
    pub deadline: Option<Instant>,
    pub seq: u64,
}

impl Ord for Entry {
    // BinaryHeap pops the greatest element: "greater" means "runs sooner".
    fn cmp(&self, other: &Self) -> Ordering {
        let by_deadline = match (self.deadline, other.deadline) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        by_deadline.then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub(crate) struct PriorityQueues {
    heaps: [BinaryHeap<Entry>; 4],
}

impl PriorityQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, priority: Priority, entry: Entry) {
        self.heaps[priority.index()].push(entry);
    }

    /// Pops from the highest-priority non-empty queue.
    pub fn pop(&mut self) -> Option<(Priority, Entry)> {
        Priority::DESCENDING
            .into_iter()
            .find_map(|p| self.heaps[p.index()].pop().map(|e| (p, e)))
    }

    /// Removes `id` from the `priority` queue. Returns the entry if it was there.
    pub fn remove(&mut self, priority: Priority, id: TaskId) -> Option<Entry> {
        let heap = &mut self.heaps[priority.index()];
        let found = heap.iter().find(|e| e.id == id).copied()?;
        heap.retain(|e| e.id != id);
        Some(found)
    }

    /// Moves `id` into the CRITICAL queue, keeping its ordering key.
    pub fn promote(&mut self, from: Priority, id: TaskId) -> bool {
        match self.remove(from, id) {
            Some(entry) => {
                self.push(Priority::Critical, entry);
                true
            }
            None => false,
        }
    }

    pub fn len(&self, priority: Priority) -> usize {
        self.heaps[priority.index()].len()
    }

    pub fn depths(&self) -> [usize; 4] {
        [
            self.heaps[0].len(),
            self.heaps[1].len(),
            self.heaps[2].len(),
            self.heaps[3].len(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    fn entry(seq: u64, deadline: Option<Instant>) -> Entry {
        Entry {
            id: Uuid::new_v4(),
            deadline,
            seq,
        }
    }

    #[test]
    fn strict_priority_then_arrival() {
        let mut q = PriorityQueues::new();
        let low = entry(1, None);
        let crit = entry(2, None);
        let high_a = entry(3, None);
        let high_b = entry(4, None);
        q.push(Priority::Low, low);
        q.push(Priority::High, high_a);
        q.push(Priority::Critical, crit);
        q.push(Priority::High, high_b);

        let order: Vec<_> = std::iter::from_fn(|| q.pop().map(|(_, e)| e.id)).collect();
        assert_eq!(order, vec![crit.id, high_a.id, high_b.id, low.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn deadlines_run_before_arrival_order() {
        let now = Instant::now();
        let mut q = PriorityQueues::new();
        let plain = entry(1, None);
        let late = entry(2, Some(now + Duration::from_secs(60)));
        let soon = entry(3, Some(now + Duration::from_secs(5)));
        for e in [plain, late, soon] {
            q.push(Priority::Normal, e);
        }
        let order: Vec<_> = std::iter::from_fn(|| q.pop().map(|(_, e)| e.id)).collect();
        assert_eq!(order, vec![soon.id, late.id, plain.id]);
    }

    #[test]
    fn promote_moves_between_queues() {
        let mut q = PriorityQueues::new();
        let a = entry(1, None);
        q.push(Priority::Low, a);
        assert!(q.promote(Priority::Low, a.id));
        assert!(!q.promote(Priority::Low, a.id));
        assert_eq!(q.depths(), [1, 0, 0, 0]);
        assert_eq!(q.pop().map(|(p, _)| p), Some(Priority::Critical));
    }
}
