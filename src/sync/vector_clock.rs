use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-author causal counter. Sparse: authors absent from the map read as 0,
/// so clocks from different participant sets compare cleanly.
///
/// Serialises as a plain `{nodeId: counter}` JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(HashMap<String, u64>);

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: &str) -> u64 {
        self.0.get(node).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, node: &str) -> u64 {
        let counter = self.0.entry(node.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Pointwise max of both clocks.
    pub fn merge(&mut self, other: &VectorClock) {
        for (node, counter) in &other.0 {
            let entry = self.0.entry(node.clone()).or_insert(0);
            if *counter > *entry {
                *entry = *counter;
            }
        }
    }

    /// Strict causal precedence: every component ≤ the other's, at least one
    /// strictly smaller. Identical clocks precede nothing.
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        let mut strictly_less = false;
        for (node, counter) in &self.0 {
            let theirs = other.get(node);
            if *counter > theirs {
                return false;
            }
            if *counter < theirs {
                strictly_less = true;
            }
        }
        for (node, theirs) in &other.0 {
            if self.get(node) < *theirs {
                strictly_less = true;
            }
        }
        strictly_less
    }

    pub fn concurrent(&self, other: &VectorClock) -> bool {
        !self.happens_before(other) && !other.happens_before(self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn from_json(value: &serde_json::Value) -> Option<VectorClock> {
        serde_json::from_value(value.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::VectorClock;

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        let mut vc = VectorClock::new();
        for (node, count) in entries {
            for _ in 0..*count {
                vc.increment(node);
            }
        }
        vc
    }

    #[test]
    fn absent_entries_read_as_zero() {
        let vc = clock(&[("a", 2)]);
        assert_eq!(vc.get("a"), 2);
        assert_eq!(vc.get("b"), 0);
    }

    #[test]
    fn increment_returns_new_counter() {
        let mut vc = VectorClock::new();
        assert_eq!(vc.increment("a"), 1);
        assert_eq!(vc.increment("a"), 2);
    }

    #[test]
    fn merge_takes_pointwise_max() {
        let mut left = clock(&[("a", 3), ("b", 1)]);
        let right = clock(&[("a", 1), ("c", 2)]);
        left.merge(&right);
        assert_eq!(left.get("a"), 3);
        assert_eq!(left.get("b"), 1);
        assert_eq!(left.get("c"), 2);
    }

    #[test]
    fn happens_before_requires_strict_dominance() {
        let earlier = clock(&[("a", 1)]);
        let later = clock(&[("a", 2), ("b", 1)]);
        assert!(earlier.happens_before(&later));
        assert!(!later.happens_before(&earlier));
        assert!(!earlier.happens_before(&earlier));
    }

    #[test]
    fn empty_clock_precedes_any_nonempty_clock() {
        let empty = VectorClock::new();
        let advanced = clock(&[("a", 1)]);
        assert!(empty.happens_before(&advanced));
        assert!(!advanced.happens_before(&empty));
    }

    #[test]
    fn disjoint_clocks_are_concurrent() {
        let left = clock(&[("a", 1)]);
        let right = clock(&[("b", 1)]);
        assert!(left.concurrent(&right));
        assert!(right.concurrent(&left));
    }

    #[test]
    fn serialises_as_plain_map() {
        let vc = clock(&[("a", 2)]);
        let json = serde_json::to_value(&vc).unwrap();
        assert_eq!(json, serde_json::json!({"a": 2}));
        let back: VectorClock = serde_json::from_value(json).unwrap();
        assert_eq!(back, vc);
    }
}
