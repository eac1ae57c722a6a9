//! Slot allocation and dispatch.
//!
//! The allocator turns the free slots of the pool into launches:
//!
//! 1. Big nodes are withheld once the operator is strong enough.
//! 2. Per-kind demand is summed over targets (`desired - running`).
//! 3. The free slots are split into a per-kind budget: extraction first,
//!    the rest shared between replenish and stabilize in proportion to
//!    demand when it cannot all be met.
//! 4. Nodes are walked in pool order, targets by descending score, kinds
//!    in [`OpKind::DISPATCH_PRIORITY`] order, dispatching as much as the
//!    target, the budget and the node allow.
//!
//! Counters are bumped optimistically on every successful launch. A failed
//! launch changes nothing; the next reconciliation corrects any drift.

use serde::Serialize;
use swarm_model::{ComputeNode, Dispatcher, HostName, OpKind, SlotPolicy, Target, ThreadCounts};
use swarm_reconcile::total_demand;
use tracing::{debug, info, warn};

/// One successful launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dispatch {
    pub node: HostName,
    pub target: HostName,
    pub op: OpKind,
    pub threads: u32,
    pub pid: u64,
}

/// Result of one allocation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AllocationOutcome {
    /// Slots available after withholding big nodes.
    pub free_slots: u32,

    /// Unmet demand across all targets at the start of the pass.
    pub demand: ThreadCounts,

    /// Slots granted to each kind.
    pub budget: ThreadCounts,

    pub dispatched: Vec<Dispatch>,
    pub failures: u32,
    pub excluded_nodes: u32,
}

impl AllocationOutcome {
    /// Threads launched per kind.
    pub fn dispatched_threads(&self) -> ThreadCounts {
        let mut counts = ThreadCounts::ZERO;
        for dispatch in &self.dispatched {
            counts.add(dispatch.op, dispatch.threads);
        }
        counts
    }
}

/// Splits `free_slots` into a per-kind budget.
///
/// Extraction is served first. If replenish and stabilize together want
/// more than what is left, each receives `floor(remaining * want / total)`;
/// otherwise each receives exactly what it wants. No kind ever receives
/// more than its demand.
pub fn split_budget(free_slots: u32, demand: &ThreadCounts) -> ThreadCounts {
    let extract = demand.extract.min(free_slots);
    let remaining = u64::from(free_slots - extract);
    let other = u64::from(demand.replenish) + u64::from(demand.stabilize);

    if other > remaining {
        let share = |wanted: u32| -> u32 {
            let slots = remaining * u64::from(wanted) / other;
            u32::try_from(slots).unwrap_or(u32::MAX).min(wanted)
        };
        ThreadCounts::new(extract, share(demand.replenish), share(demand.stabilize))
    } else {
        ThreadCounts::new(extract, demand.replenish, demand.stabilize)
    }
}

/// Target indices by descending score; equal scores keep tracking order.
fn dispatch_order(targets: &[Target]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..targets.len()).collect();
    order.sort_by(|&a, &b| targets[b].score.total_cmp(&targets[a].score));
    order
}

/// Matches free slots to target demand and launches workers.
pub fn allocate<D>(
    nodes: &mut [ComputeNode],
    targets: &mut [Target],
    operator_level: u32,
    policy: &SlotPolicy,
    dispatcher: &D,
) -> AllocationOutcome
where
    D: Dispatcher + ?Sized,
{
    let mut outcome = AllocationOutcome::default();

    for node in nodes.iter_mut() {
        if node.slots > 0 && policy.excludes(node, operator_level) {
            debug!(node = %node.name, slots = node.slots, "Withholding big node from pool");
            node.slots = 0;
            outcome.excluded_nodes += 1;
        }
    }

    outcome.free_slots = nodes
        .iter()
        .fold(0u32, |acc, node| acc.saturating_add(node.slots));
    outcome.demand = total_demand(targets);
    outcome.budget = split_budget(outcome.free_slots, &outcome.demand);

    info!(
        free_slots = outcome.free_slots,
        demand_extract = outcome.demand.extract,
        demand_replenish = outcome.demand.replenish,
        demand_stabilize = outcome.demand.stabilize,
        budget_extract = outcome.budget.extract,
        budget_replenish = outcome.budget.replenish,
        budget_stabilize = outcome.budget.stabilize,
        "Dividing free slots"
    );

    let order = dispatch_order(targets);
    let mut remaining = outcome.budget;

    'nodes: for node in nodes.iter_mut() {
        if remaining.total() == 0 {
            break;
        }
        if node.slots == 0 {
            continue;
        }

        for &index in &order {
            let target = &mut targets[index];

            for op in OpKind::DISPATCH_PRIORITY {
                if node.slots == 0 {
                    continue 'nodes;
                }

                let threads = target
                    .delta()
                    .get(op)
                    .min(remaining.get(op))
                    .min(node.slots);
                if threads == 0 {
                    continue;
                }

                match dispatcher.launch(op, &node.name, threads, &target.name) {
                    Ok(launch) => {
                        node.slots -= threads;
                        node.free_capacity = (node.free_capacity - launch.capacity_used).max(0.0);
                        node.running.add(op, threads);
                        target.running.add(op, threads);
                        *remaining.get_mut(op) -= threads;

                        debug!(
                            node = %node.name,
                            target = %target.name,
                            op = %op,
                            threads,
                            pid = launch.pid,
                            "Dispatched workers"
                        );
                        outcome.dispatched.push(Dispatch {
                            node: node.name.clone(),
                            target: target.name.clone(),
                            op,
                            threads,
                            pid: launch.pid,
                        });
                    }
                    Err(e) => {
                        warn!(
                            node = %node.name,
                            target = %target.name,
                            op = %op,
                            threads,
                            error = %e,
                            "Dispatch failed"
                        );
                        outcome.failures += 1;
                    }
                }

                if remaining.total() == 0 {
                    break 'nodes;
                }
            }
        }
    }

    outcome
}
