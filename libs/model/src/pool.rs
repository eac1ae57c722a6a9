//! Aggregate supply summary.

use serde::{Deserialize, Serialize};

use crate::ThreadCounts;

/// Free slots and running threads summed over all nodes.
///
/// Rebuilt from the node list every tick and never mutated on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyPool {
    pub free_slots: u32,
    pub running: ThreadCounts,
    pub total_running: u32,
}
