//! # Topic patterns and the segment-trie router.
//!
//! Patterns come in three shapes:
//! - **Exact** `task.completed`: matches only that topic;
//! - **Wildcard suffix** `task.execute.*`: matches any topic with at least one
//!   more segment under the prefix (`task.execute.a`, `task.execute.a.b`), never the
//!   bare prefix `task.execute` itself;
//! - **All** `*`: matches every topic.
//!
//! ## Architecture
//! ```text
//! root ─┬─ "task" ─┬─ "execute" { wildcard: [S1] }
//!       │          └─ "completed" { exact: [S2] }
//!       └─ wildcard: [S3]                    (pattern "*")
//!
//! route("task.execute.x") → S3 (root wildcard), S1 (prefix wildcard)
//! route("task.completed") → S3, S2
//! ```

use std::collections::HashMap;
use std::fmt;

/// Parsed subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicPattern {
    /// Exactly this topic.
    Exact(String),
    /// Any topic strictly below this prefix (`prefix.*`).
    Prefix(String),
    /// Every topic (`*`).
    All,
}

impl TopicPattern {
    /// Parses `"*"`, `"a.b.*"` or `"a.b"`.
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            TopicPattern::All
        } else if let Some(prefix) = pattern.strip_suffix(".*") {
            TopicPattern::Prefix(prefix.to_string())
        } else {
            TopicPattern::Exact(pattern.to_string())
        }
    }

    /// Returns true if `topic` is matched by this pattern.
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicPattern::All => true,
            TopicPattern::Exact(t) => t == topic,
            TopicPattern::Prefix(p) => topic
                .strip_prefix(p.as_str())
                .is_some_and(|rest| rest.len() > 1 && rest.starts_with('.')),
        }
    }

    fn segments(&self) -> Vec<&str> {
        match self {
            TopicPattern::All => Vec::new(),
            TopicPattern::Exact(t) | TopicPattern::Prefix(t) => t.split('.').collect(),
        }
    }

    fn is_wildcard(&self) -> bool {
        !matches!(self, TopicPattern::Exact(_))
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicPattern::All => f.write_str("*"),
            TopicPattern::Exact(t) => f.write_str(t),
            TopicPattern::Prefix(p) => write!(f, "{p}.*"),
        }
    }
}

struct Node<T> {
    children: HashMap<String, Node<T>>,
    exact: Vec<T>,
    wildcard: Vec<T>,
}

impl<T> Node<T> {
    fn new() -> Self {
        Self {
            children: HashMap::new(),
            exact: Vec::new(),
            wildcard: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.exact.is_empty() && self.wildcard.is_empty()
    }
}

/// Segment trie mapping patterns to routed values.
pub(crate) struct Router<T> {
    root: Node<T>,
    len: usize,
}

impl<T: Clone> Router<T> {
    pub fn new() -> Self {
        Self {
            root: Node::new(),
            len: 0,
        }
    }

    /// Adds `value` under `pattern`.
    pub fn insert(&mut self, pattern: &TopicPattern, value: T) {
        let mut node = &mut self.root;
        for seg in pattern.segments() {
            node = node
                .children
                .entry(seg.to_string())
                .or_insert_with(Node::new);
        }
        if pattern.is_wildcard() {
            node.wildcard.push(value);
        } else {
            node.exact.push(value);
        }
        self.len += 1;
    }

    /// Removes every value under `pattern` for which `pred` holds; prunes empty nodes.
    pub fn remove(&mut self, pattern: &TopicPattern, pred: impl Fn(&T) -> bool) -> usize {
        let segs = pattern.segments();
        let removed = Self::remove_at(&mut self.root, &segs, pattern.is_wildcard(), &pred);
        self.len -= removed;
        removed
    }

    fn remove_at(
        node: &mut Node<T>,
        segs: &[&str],
        wildcard: bool,
        pred: &impl Fn(&T) -> bool,
    ) -> usize {
        match segs.split_first() {
            None => {
                let list = if wildcard {
                    &mut node.wildcard
                } else {
                    &mut node.exact
                };
                let before = list.len();
                list.retain(|v| !pred(v));
                before - list.len()
            }
            Some((head, rest)) => {
                let Some(child) = node.children.get_mut(*head) else {
                    return 0;
                };
                let removed = Self::remove_at(child, rest, wildcard, pred);
                if child.is_empty() {
                    node.children.remove(*head);
                }
                removed
            }
        }
    }

    /// Collects every value whose pattern matches `topic`.
    pub fn route(&self, topic: &str) -> Vec<T> {
        let mut out = Vec::new();
        let segs: Vec<&str> = topic.split('.').collect();
        let mut node = &self.root;

        for (i, seg) in segs.iter().enumerate() {
            // A wildcard at depth `i` needs at least one remaining segment.
            out.extend(node.wildcard.iter().cloned());
            match node.children.get(*seg) {
                Some(child) => node = child,
                None => return out,
            }
            if i + 1 == segs.len() {
                out.extend(node.exact.iter().cloned());
            }
        }
        out
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(patterns: &[(&str, u32)]) -> Router<u32> {
        let mut r = Router::new();
        for (p, v) in patterns {
            r.insert(&TopicPattern::parse(p), *v);
        }
        r
    }

    fn sorted(mut v: Vec<u32>) -> Vec<u32> {
        v.sort_unstable();
        v
    }

    #[test]
    fn exact_only_matches_itself() {
        let r = router(&[("task.completed", 1)]);
        assert_eq!(r.route("task.completed"), vec![1]);
        assert!(r.route("task.completed.extra").is_empty());
        assert!(r.route("task").is_empty());
    }

    #[test]
    fn wildcard_suffix_matches_descendants_not_prefix() {
        let r = router(&[("task.execute.*", 1)]);
        assert_eq!(r.route("task.execute.restart_db"), vec![1]);
        assert_eq!(r.route("task.execute.a.b"), vec![1]);
        assert!(r.route("task.execute").is_empty());
        assert!(r.route("task.executed.x").is_empty());
    }

    #[test]
    fn all_matches_everything() {
        let r = router(&[("*", 9), ("a.b", 1), ("a.*", 2)]);
        assert_eq!(sorted(r.route("a.b")), vec![1, 2, 9]);
        assert_eq!(sorted(r.route("zzz")), vec![9]);
    }

    #[test]
    fn pattern_matches_agrees_with_router() {
        let cases = ["*", "a.*", "a.b", "a.b.*"];
        let topics = ["a", "a.b", "a.b.c", "b.a"];
        for (i, p) in cases.iter().enumerate() {
            let r = router(&[(p, i as u32)]);
            let pat = TopicPattern::parse(p);
            for t in topics {
                assert_eq!(pat.matches(t), !r.route(t).is_empty(), "pattern {p} topic {t}");
            }
        }
    }

    #[test]
    fn remove_prunes_entries() {
        let mut r = router(&[("a.b", 1), ("a.b", 2), ("a.*", 3)]);
        assert_eq!(r.remove(&TopicPattern::parse("a.b"), |v| *v == 1), 1);
        assert_eq!(r.route("a.b").len(), 2);
        assert_eq!(r.remove(&TopicPattern::parse("a.*"), |_| true), 1);
        assert_eq!(r.route("a.b"), vec![2]);
        assert_eq!(r.len(), 1);
        assert_eq!(r.remove(&TopicPattern::parse("x.y"), |_| true), 0);
    }
}
