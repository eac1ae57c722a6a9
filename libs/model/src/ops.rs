//! Operation kinds and per-operation thread counters.

use serde::{Deserialize, Serialize};

/// The three kinds of work dispatched against a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// Remove value from the target.
    Extract,

    /// Grow the target's value back toward its maximum.
    Replenish,

    /// Bring the target's security back down to its baseline.
    Stabilize,
}

impl OpKind {
    /// All kinds, in declaration order.
    pub const ALL: [OpKind; 3] = [OpKind::Extract, OpKind::Replenish, OpKind::Stabilize];

    /// Order in which the allocator offers slots to a target.
    pub const DISPATCH_PRIORITY: [OpKind; 3] =
        [OpKind::Extract, OpKind::Stabilize, OpKind::Replenish];

    /// Returns the lowercase name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Extract => "extract",
            OpKind::Replenish => "replenish",
            OpKind::Stabilize => "stabilize",
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A thread count for each operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadCounts {
    pub extract: u32,
    pub replenish: u32,
    pub stabilize: u32,
}

impl ThreadCounts {
    pub const ZERO: Self = Self {
        extract: 0,
        replenish: 0,
        stabilize: 0,
    };

    #[must_use]
    pub const fn new(extract: u32, replenish: u32, stabilize: u32) -> Self {
        Self {
            extract,
            replenish,
            stabilize,
        }
    }

    /// Returns the count for one kind.
    #[must_use]
    pub fn get(&self, op: OpKind) -> u32 {
        match op {
            OpKind::Extract => self.extract,
            OpKind::Replenish => self.replenish,
            OpKind::Stabilize => self.stabilize,
        }
    }

    /// Returns a mutable reference to the count for one kind.
    pub fn get_mut(&mut self, op: OpKind) -> &mut u32 {
        match op {
            OpKind::Extract => &mut self.extract,
            OpKind::Replenish => &mut self.replenish,
            OpKind::Stabilize => &mut self.stabilize,
        }
    }

    /// Adds `threads` to one kind, saturating.
    pub fn add(&mut self, op: OpKind, threads: u32) {
        let slot = self.get_mut(op);
        *slot = slot.saturating_add(threads);
    }

    /// Sum across all kinds.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.extract
            .saturating_add(self.replenish)
            .saturating_add(self.stabilize)
    }

    /// Per-kind `max(0, self - other)`.
    #[must_use]
    pub fn saturating_sub(&self, other: &ThreadCounts) -> ThreadCounts {
        ThreadCounts {
            extract: self.extract.saturating_sub(other.extract),
            replenish: self.replenish.saturating_sub(other.replenish),
            stabilize: self.stabilize.saturating_sub(other.stabilize),
        }
    }

    /// Per-kind saturating sum.
    #[must_use]
    pub fn saturating_add(&self, other: &ThreadCounts) -> ThreadCounts {
        ThreadCounts {
            extract: self.extract.saturating_add(other.extract),
            replenish: self.replenish.saturating_add(other.replenish),
            stabilize: self.stabilize.saturating_add(other.stabilize),
        }
    }

    /// Zeroes every kind.
    pub fn reset(&mut self) {
        *self = Self::ZERO;
    }
}

impl std::fmt::Display for ThreadCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "extract={} replenish={} stabilize={}",
            self.extract, self.replenish, self.stabilize
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_priority_order() {
        assert_eq!(
            OpKind::DISPATCH_PRIORITY,
            [OpKind::Extract, OpKind::Stabilize, OpKind::Replenish]
        );
    }

    #[test]
    fn test_thread_counts_accessors() {
        let mut counts = ThreadCounts::new(1, 2, 3);
        assert_eq!(counts.get(OpKind::Replenish), 2);
        counts.add(OpKind::Stabilize, 4);
        assert_eq!(counts.stabilize, 7);
        assert_eq!(counts.total(), 10);
        counts.reset();
        assert_eq!(counts, ThreadCounts::ZERO);
    }

    #[test]
    fn test_thread_counts_saturating_sub() {
        let desired = ThreadCounts::new(4, 1, 10);
        let running = ThreadCounts::new(6, 1, 3);
        assert_eq!(desired.saturating_sub(&running), ThreadCounts::new(0, 0, 7));
    }

    #[test]
    fn test_op_kind_serde() {
        let json = serde_json::to_string(&OpKind::Stabilize).unwrap();
        assert_eq!(json, "\"stabilize\"");
    }
}
