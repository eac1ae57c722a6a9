//! Status reconciliation primitives.
//!
//! Worker threads run on hosts the scheduler does not control. They finish,
//! crash, or get killed without telling anyone. This library rebuilds the
//! scheduler's running counters from what the hosts actually report:
//!
//! - **Bookkeeping**: running counters on nodes and targets.
//! - **Observation**: the process table of each node.
//! - **Reconciliation**: throwing the bookkeeping away and recounting from
//!   observation, once per tick.
//!
//! # Invariants
//!
//! - Reconciliation is idempotent: with no external change, two passes
//!   produce identical counters
//! - Counters after a pass reflect observation exactly; between passes only
//!   successful dispatches move them (optimistically)
//! - Nothing here is fatal: host errors degrade one node or target

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use swarm_model::{
    CapacityOracle, ComputeNode, EconomicOracle, HostName, OpKind, ProcessInfo, ProcessObserver,
    SlotPolicy, SupplyPool, Target, ThreadCounts,
};
use tracing::{debug, warn};

/// Convergence status for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    /// Running threads match desired threads for every kind.
    Converged,

    /// Some kind is still below its desired count.
    Converging,

    /// Some kind runs more threads than desired (demand dropped).
    Diverged,

    /// The target is not scored; nothing is desired.
    Unknown,
}

impl ConvergenceStatus {
    /// Classifies a target's running counts against its desired counts.
    pub fn of(target: &Target) -> Self {
        if !target.is_eligible() {
            return Self::Unknown;
        }

        let over = OpKind::ALL
            .iter()
            .any(|op| target.running.get(*op) > target.desired.get(*op));
        if over {
            return Self::Diverged;
        }

        if target.delta().total() > 0 {
            Self::Converging
        } else {
            Self::Converged
        }
    }

    /// Returns true if the target has converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }

    /// Returns true if the target is still converging.
    pub fn is_converging(&self) -> bool {
        matches!(self, Self::Converging)
    }
}

/// Worker programs, one per operation kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramCatalog {
    pub extract: String,
    pub replenish: String,
    pub stabilize: String,
}

impl ProgramCatalog {
    /// Program that performs `op`.
    pub fn program(&self, op: OpKind) -> &str {
        match op {
            OpKind::Extract => &self.extract,
            OpKind::Replenish => &self.replenish,
            OpKind::Stabilize => &self.stabilize,
        }
    }

    /// Identifies the operation a running program performs.
    ///
    /// Matches on the full path or on the file name alone, since hosts
    /// may report either.
    pub fn classify(&self, program: &str) -> Option<OpKind> {
        let file_name = Path::new(program).file_name();
        OpKind::ALL.into_iter().find(|op| {
            let known = self.program(*op);
            program == known || (file_name.is_some() && file_name == Path::new(known).file_name())
        })
    }
}

impl Default for ProgramCatalog {
    fn default() -> Self {
        Self {
            extract: "/workers/extract.js".to_string(),
            replenish: "/workers/replenish.js".to_string(),
            stabilize: "/workers/stabilize.js".to_string(),
        }
    }
}

/// What a reconciliation pass saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Worker processes attributed to an operation kind.
    pub processes_observed: u32,

    /// Processes running something other than a worker program.
    pub foreign_processes: u32,

    /// Worker threads whose target is not tracked (node-level only).
    pub untracked_threads: u32,

    pub node_refresh_failures: u32,
    pub target_refresh_failures: u32,
    pub process_list_failures: u32,
}

/// Rebuilds node and target running counters from the hosts.
///
/// First every counter is zeroed and static attributes are refreshed; then
/// each node's process table is recounted. A node whose figures cannot be
/// read offers no slots this tick; a target whose economics cannot be read
/// is treated as inaccessible.
pub fn reconcile<H>(
    nodes: &mut [ComputeNode],
    targets: &mut [Target],
    host: &H,
    catalog: &ProgramCatalog,
    policy: &SlotPolicy,
) -> ReconcileReport
where
    H: CapacityOracle + EconomicOracle + ProcessObserver + ?Sized,
{
    let mut report = ReconcileReport::default();

    for node in nodes.iter_mut() {
        node.running.reset();
        match host.node_stats(&node.name) {
            Ok(stats) => node.refresh(&stats, policy),
            Err(e) => {
                warn!(node = %node.name, error = %e, "Failed to refresh node");
                node.mark_unavailable();
                report.node_refresh_failures = report.node_refresh_failures.saturating_add(1);
            }
        }
    }

    for target in targets.iter_mut() {
        target.running.reset();
        let refreshed = host
            .economics(&target.name)
            .and_then(|economics| Ok((economics, host.node_stats(&target.name)?.rooted)));
        match refreshed {
            Ok((economics, rooted)) => target.refresh(economics, rooted),
            Err(e) => {
                warn!(target = %target.name, error = %e, "Failed to refresh target");
                target.accessible = false;
                report.target_refresh_failures = report.target_refresh_failures.saturating_add(1);
            }
        }
    }

    let index: HashMap<HostName, usize> = targets
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.clone(), i))
        .collect();

    for node in nodes.iter_mut() {
        let processes = match host.processes(&node.name) {
            Ok(processes) => processes,
            Err(e) => {
                warn!(node = %node.name, error = %e, "Failed to list processes");
                report.process_list_failures = report.process_list_failures.saturating_add(1);
                continue;
            }
        };

        for process in &processes {
            let Some(op) = catalog.classify(&process.program) else {
                report.foreign_processes = report.foreign_processes.saturating_add(1);
                continue;
            };

            report.processes_observed = report.processes_observed.saturating_add(1);
            node.running.add(op, process.threads);

            match target_of(process).and_then(|name| index.get(name)) {
                Some(&i) => targets[i].running.add(op, process.threads),
                None => {
                    report.untracked_threads =
                        report.untracked_threads.saturating_add(process.threads)
                }
            }
        }
    }

    debug!(
        nodes = nodes.len(),
        targets = targets.len(),
        processes = report.processes_observed,
        foreign = report.foreign_processes,
        untracked_threads = report.untracked_threads,
        "Reconciled running state"
    );

    report
}

fn target_of(process: &ProcessInfo) -> Option<&str> {
    process.args.first().map(String::as_str)
}

/// Sums free slots and running threads over all nodes.
pub fn aggregate(nodes: &[ComputeNode]) -> SupplyPool {
    let mut pool = SupplyPool::default();
    for node in nodes {
        pool.free_slots = pool.free_slots.saturating_add(node.slots);
        pool.running = pool.running.saturating_add(&node.running);
    }
    pool.total_running = pool.running.total();
    pool
}

/// Sums `max(0, desired - running)` over all targets.
pub fn total_demand(targets: &[Target]) -> ThreadCounts {
    targets
        .iter()
        .fold(ThreadCounts::ZERO, |acc, t| acc.saturating_add(&t.delta()))
}

/// Default tick period.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

/// Default number of ticks between network walks.
pub const DEFAULT_REDISCOVER_TICKS: u64 = 60;

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;
    use swarm_model::{Economics, HostError, NodeStats, OpDurations};

    use super::*;

    fn name(s: &str) -> HostName {
        HostName::parse(s).unwrap()
    }

    fn policy() -> SlotPolicy {
        SlotPolicy {
            unit_cost: 2.0,
            home_node: name("home"),
            home_reserve: 0.1,
            big_node_capacity: 2048.0,
            big_node_level: 5000,
        }
    }

    fn economics() -> Economics {
        Economics {
            max_value: 1000.0,
            current_value: 800.0,
            extraction_rate: 0.05,
            durations: OpDurations {
                extract: 1000.0,
                replenish: 3200.0,
                stabilize: 4000.0,
            },
            baseline_security: 10.0,
            current_security: 12.0,
            required_level: 1,
        }
    }

    #[derive(Default)]
    struct FakeHost {
        stats: HashMap<HostName, NodeStats>,
        procs: HashMap<HostName, Vec<ProcessInfo>>,
        economics: HashMap<HostName, Economics>,
    }

    impl FakeHost {
        fn with_node(mut self, node: &str, total: f64, free: f64) -> Self {
            self.stats.insert(
                name(node),
                NodeStats {
                    total_capacity: total,
                    free_capacity: free,
                    rooted: true,
                    cores: 1,
                },
            );
            self
        }

        fn with_target(mut self, target: &str) -> Self {
            self.economics.insert(name(target), economics());
            self.with_node(target, 0.0, 0.0)
        }

        fn with_process(mut self, node: &str, program: &str, target: &str, threads: u32) -> Self {
            let procs = self.procs.entry(name(node)).or_default();
            procs.push(ProcessInfo {
                pid: procs.len() as u64 + 1,
                program: program.to_string(),
                args: vec![target.to_string(), "17".to_string()],
                threads,
            });
            self
        }
    }

    impl CapacityOracle for FakeHost {
        fn node_stats(&self, node: &HostName) -> Result<NodeStats, HostError> {
            self.stats
                .get(node)
                .copied()
                .ok_or_else(|| HostError::NodeNotFound(node.clone()))
        }
    }

    impl EconomicOracle for FakeHost {
        fn economics(&self, target: &HostName) -> Result<Economics, HostError> {
            self.economics
                .get(target)
                .copied()
                .ok_or_else(|| HostError::NoEconomics(target.clone()))
        }

        fn growth_analysis(&self, _target: &HostName, _multiplier: f64) -> f64 {
            0.0
        }

        fn security_impact(&self, _op: OpKind, _threads: u32) -> f64 {
            0.0
        }

        fn operator_level(&self) -> u32 {
            1
        }
    }

    impl ProcessObserver for FakeHost {
        fn processes(&self, node: &HostName) -> Result<Vec<ProcessInfo>, HostError> {
            Ok(self.procs.get(node).cloned().unwrap_or_default())
        }
    }

    fn fixture() -> (FakeHost, Vec<ComputeNode>, Vec<Target>) {
        let host = FakeHost::default()
            .with_node("home", 64.0, 40.0)
            .with_node("n00dles", 4.0, 4.0)
            .with_target("joesguns")
            .with_target("foodnstuff")
            .with_process("home", "/workers/extract.js", "joesguns", 3)
            .with_process("home", "/workers/stabilize.js", "joesguns", 5)
            .with_process("n00dles", "replenish.js", "foodnstuff", 2)
            .with_process("n00dles", "/workers/extract.js", "untracked", 7)
            .with_process("home", "/bin/editor", "notes.txt", 1);
        let nodes = vec![ComputeNode::new(name("home")), ComputeNode::new(name("n00dles"))];
        let targets = vec![Target::new(name("joesguns")), Target::new(name("foodnstuff"))];
        (host, nodes, targets)
    }

    #[test]
    fn test_convergence_status() {
        let mut target = Target::new(name("joesguns"));
        assert_eq!(ConvergenceStatus::of(&target), ConvergenceStatus::Unknown);

        target.score = 5.0;
        target.desired = ThreadCounts::new(2, 2, 2);
        target.running = ThreadCounts::new(2, 2, 2);
        assert!(ConvergenceStatus::of(&target).is_converged());

        target.running = ThreadCounts::new(1, 2, 2);
        assert!(ConvergenceStatus::of(&target).is_converging());

        target.running = ThreadCounts::new(1, 3, 2);
        assert_eq!(ConvergenceStatus::of(&target), ConvergenceStatus::Diverged);
    }

    #[test]
    fn test_classify_programs() {
        let catalog = ProgramCatalog::default();
        assert_eq!(catalog.classify("/workers/extract.js"), Some(OpKind::Extract));
        assert_eq!(catalog.classify("stabilize.js"), Some(OpKind::Stabilize));
        assert_eq!(catalog.classify("/other/dir/replenish.js"), Some(OpKind::Replenish));
        assert_eq!(catalog.classify("/bin/editor"), None);
        assert_eq!(catalog.classify(""), None);
    }

    #[test]
    fn test_reconcile_counts_from_process_table() {
        let (host, mut nodes, mut targets) = fixture();
        let report = reconcile(
            &mut nodes,
            &mut targets,
            &host,
            &ProgramCatalog::default(),
            &policy(),
        );

        assert_eq!(nodes[0].running, ThreadCounts::new(3, 0, 5));
        assert_eq!(nodes[1].running, ThreadCounts::new(7, 2, 0));
        assert_eq!(targets[0].running, ThreadCounts::new(3, 0, 5));
        assert_eq!(targets[1].running, ThreadCounts::new(0, 2, 0));

        assert_eq!(report.processes_observed, 4);
        assert_eq!(report.foreign_processes, 1);
        assert_eq!(report.untracked_threads, 7);
        assert!(targets[0].accessible);
        assert_eq!(targets[0].economics, economics());
    }

    #[test]
    fn test_reconcile_discards_stale_bookkeeping() {
        let (host, mut nodes, mut targets) = fixture();
        nodes[0].running = ThreadCounts::new(100, 100, 100);
        targets[1].running = ThreadCounts::new(9, 9, 9);

        reconcile(
            &mut nodes,
            &mut targets,
            &host,
            &ProgramCatalog::default(),
            &policy(),
        );

        assert_eq!(nodes[0].running, ThreadCounts::new(3, 0, 5));
        assert_eq!(targets[1].running, ThreadCounts::new(0, 2, 0));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let (host, mut nodes, mut targets) = fixture();
        let catalog = ProgramCatalog::default();

        let first = reconcile(&mut nodes, &mut targets, &host, &catalog, &policy());
        let nodes_after_first = nodes.clone();
        let targets_after_first = targets.clone();

        let second = reconcile(&mut nodes, &mut targets, &host, &catalog, &policy());

        assert_eq!(first, second);
        assert_eq!(nodes, nodes_after_first);
        assert_eq!(targets, targets_after_first);
    }

    #[test]
    fn test_reconcile_unknown_node_offers_no_slots() {
        let (host, mut nodes, mut targets) = fixture();
        nodes.push(ComputeNode::new(name("vanished")));
        nodes[2].slots = 12;

        let report = reconcile(
            &mut nodes,
            &mut targets,
            &host,
            &ProgramCatalog::default(),
            &policy(),
        );

        assert_eq!(report.node_refresh_failures, 1);
        assert_eq!(nodes[2].slots, 0);
    }

    #[test]
    fn test_reconcile_target_without_economics_is_inaccessible() {
        let (host, mut nodes, mut targets) = fixture();
        let mut ghost = Target::new(name("ghost"));
        ghost.accessible = true;
        targets.push(ghost);

        let report = reconcile(
            &mut nodes,
            &mut targets,
            &host,
            &ProgramCatalog::default(),
            &policy(),
        );

        assert_eq!(report.target_refresh_failures, 1);
        assert!(!targets[2].accessible);
    }

    #[test]
    fn test_reconcile_saturates_huge_thread_counts() {
        let host = FakeHost::default()
            .with_node("home", 64.0, 64.0)
            .with_target("joesguns")
            .with_process("home", "/workers/extract.js", "joesguns", u32::MAX)
            .with_process("home", "/workers/extract.js", "joesguns", 9)
            .with_process("home", "/workers/stabilize.js", "elsewhere", u32::MAX)
            .with_process("home", "/workers/stabilize.js", "elsewhere", 9);
        let mut nodes = vec![ComputeNode::new(name("home"))];
        let mut targets = vec![Target::new(name("joesguns"))];

        let report = reconcile(
            &mut nodes,
            &mut targets,
            &host,
            &ProgramCatalog::default(),
            &policy(),
        );

        assert_eq!(report.processes_observed, 4);
        assert_eq!(report.untracked_threads, u32::MAX);
        assert_eq!(nodes[0].running.extract, u32::MAX);
        assert_eq!(nodes[0].running.stabilize, u32::MAX);
        assert_eq!(targets[0].running.extract, u32::MAX);
    }

    #[test]
    fn test_aggregate_sums_nodes() {
        let mut a = ComputeNode::new(name("a"));
        a.slots = 10;
        a.running = ThreadCounts::new(1, 2, 3);
        let mut b = ComputeNode::new(name("b"));
        b.slots = 5;
        b.running = ThreadCounts::new(4, 0, 1);

        let pool = aggregate(&[a, b]);
        assert_eq!(pool.free_slots, 15);
        assert_eq!(pool.running, ThreadCounts::new(5, 2, 4));
        assert_eq!(pool.total_running, 11);
    }

    #[test]
    fn test_aggregate_empty() {
        assert_eq!(aggregate(&[]), SupplyPool::default());
    }

    #[test]
    fn test_total_demand_ignores_oversupply() {
        let mut a = Target::new(name("a"));
        a.desired = ThreadCounts::new(4, 50, 60);
        let mut b = Target::new(name("b"));
        b.desired = ThreadCounts::new(1, 1, 1);
        b.running = ThreadCounts::new(3, 0, 1);

        assert_eq!(total_demand(&[a, b]), ThreadCounts::new(4, 51, 60));
    }

    proptest! {
        #[test]
        fn prop_aggregate_total_matches_parts(
            figures in proptest::collection::vec((0u32..10_000, 0u32..500, 0u32..500, 0u32..500), 0..32)
        ) {
            let nodes: Vec<ComputeNode> = figures
                .iter()
                .enumerate()
                .map(|(i, (slots, e, r, s))| {
                    let mut node = ComputeNode::new(name(&format!("node-{i}")));
                    node.slots = *slots;
                    node.running = ThreadCounts::new(*e, *r, *s);
                    node
                })
                .collect();

            let pool = aggregate(&nodes);
            let slots: u32 = figures.iter().map(|f| f.0).sum();
            prop_assert_eq!(pool.free_slots, slots);
            prop_assert_eq!(
                pool.total_running,
                pool.running.extract + pool.running.replenish + pool.running.stabilize
            );
        }
    }
}
