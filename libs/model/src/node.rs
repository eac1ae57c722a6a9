//! Compute nodes: the supply side of the scheduler.

use serde::{Deserialize, Serialize};

use crate::{HostName, ThreadCounts};

/// Capacity figures reported by the host for one node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub total_capacity: f64,
    pub free_capacity: f64,
    pub rooted: bool,
    pub cores: u32,
}

/// How raw capacity is turned into slots.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotPolicy {
    /// Capacity consumed by one worker thread.
    pub unit_cost: f64,

    /// Node that keeps part of its capacity in reserve.
    pub home_node: HostName,

    /// Fraction of the home node's total capacity held back.
    pub home_reserve: f64,

    /// Nodes at or above this total capacity count as "big".
    pub big_node_capacity: f64,

    /// Operator level at which big nodes leave the shared pool.
    pub big_node_level: u32,
}

impl SlotPolicy {
    /// Whether `node` is withheld from the pool at `operator_level`.
    pub fn excludes(&self, node: &ComputeNode, operator_level: u32) -> bool {
        operator_level >= self.big_node_level && node.total_capacity >= self.big_node_capacity
    }

    /// Number of whole slots that fit in `free_capacity`.
    pub fn slots_for(&self, free_capacity: f64) -> u32 {
        if self.unit_cost <= 0.0 || !free_capacity.is_finite() || free_capacity <= 0.0 {
            return 0;
        }
        (free_capacity / self.unit_cost).floor() as u32
    }
}

/// A node that can run worker threads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputeNode {
    pub name: HostName,
    pub total_capacity: f64,
    pub free_capacity: f64,
    pub rooted: bool,
    pub cores: u32,

    /// Free slots, derived from free capacity on every refresh.
    pub slots: u32,

    /// Worker threads observed (or optimistically dispatched) on this node.
    pub running: ThreadCounts,
}

impl ComputeNode {
    /// Creates a node with no capacity; the first refresh fills it in.
    pub fn new(name: HostName) -> Self {
        Self {
            name,
            total_capacity: 0.0,
            free_capacity: 0.0,
            rooted: false,
            cores: 1,
            slots: 0,
            running: ThreadCounts::ZERO,
        }
    }

    /// Applies fresh host figures and recomputes the slot count.
    ///
    /// The home node only exposes `floor(total * (1 - reserve))` of its
    /// capacity. Unrooted nodes never have slots.
    pub fn refresh(&mut self, stats: &NodeStats, policy: &SlotPolicy) {
        self.total_capacity = stats.total_capacity.max(0.0);
        self.rooted = stats.rooted;
        self.cores = stats.cores;

        let mut free = stats.free_capacity.clamp(0.0, self.total_capacity);
        if self.name == policy.home_node {
            let used = self.total_capacity - free;
            let usable = (self.total_capacity * (1.0 - policy.home_reserve)).floor();
            free = (usable - used).max(0.0);
        }
        self.free_capacity = free;

        self.slots = if self.rooted {
            policy.slots_for(free)
        } else {
            0
        };
    }

    /// Marks the node unusable for this tick after a failed refresh.
    pub fn mark_unavailable(&mut self) {
        self.free_capacity = 0.0;
        self.slots = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SlotPolicy {
        SlotPolicy {
            unit_cost: 2.0,
            home_node: HostName::parse("home").unwrap(),
            home_reserve: 0.1,
            big_node_capacity: 2048.0,
            big_node_level: 5000,
        }
    }

    fn stats(total: f64, free: f64, rooted: bool) -> NodeStats {
        NodeStats {
            total_capacity: total,
            free_capacity: free,
            rooted,
            cores: 1,
        }
    }

    #[test]
    fn test_refresh_computes_slots() {
        let mut node = ComputeNode::new(HostName::parse("n00dles").unwrap());
        node.refresh(&stats(16.0, 9.5, true), &policy());
        assert_eq!(node.slots, 4);
        assert_eq!(node.free_capacity, 9.5);
    }

    #[test]
    fn test_refresh_unrooted_has_no_slots() {
        let mut node = ComputeNode::new(HostName::parse("foodnstuff").unwrap());
        node.refresh(&stats(16.0, 16.0, false), &policy());
        assert_eq!(node.slots, 0);
    }

    #[test]
    fn test_refresh_home_reserve() {
        let mut node = ComputeNode::new(HostName::parse("home").unwrap());
        // 64 total, 8 used: usable is floor(57.6) = 57, so 49 free.
        node.refresh(&stats(64.0, 56.0, true), &policy());
        assert_eq!(node.free_capacity, 49.0);
        assert_eq!(node.slots, 24);
    }

    #[test]
    fn test_refresh_home_reserve_never_negative() {
        let mut node = ComputeNode::new(HostName::parse("home").unwrap());
        node.refresh(&stats(64.0, 2.0, true), &policy());
        assert_eq!(node.free_capacity, 0.0);
        assert_eq!(node.slots, 0);
    }

    #[test]
    fn test_big_node_exclusion() {
        let policy = policy();
        let mut node = ComputeNode::new(HostName::parse("big-iron").unwrap());
        node.refresh(&stats(4096.0, 4096.0, true), &policy);

        assert!(!policy.excludes(&node, 4999));
        assert!(policy.excludes(&node, 5000));

        node.refresh(&stats(1024.0, 1024.0, true), &policy);
        assert!(!policy.excludes(&node, 9000));
    }

    #[test]
    fn test_slots_for_degenerate_inputs() {
        let policy = policy();
        assert_eq!(policy.slots_for(-4.0), 0);
        assert_eq!(policy.slots_for(f64::NAN), 0);
        assert_eq!(policy.slots_for(1.99), 0);
    }
}
