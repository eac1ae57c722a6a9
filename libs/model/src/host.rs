//! Interfaces to the external host.
//!
//! The scheduler never launches or observes work itself. Everything it
//! knows about the network comes through these traits, and everything it
//! does goes out through [`Dispatcher`]. Calls are synchronous: a tick runs
//! start to finish without yielding.

use serde::{Deserialize, Serialize};

use crate::{Economics, HostError, HostName, NodeStats, OpKind};

/// Reports capacity for individual nodes.
pub trait CapacityOracle: Send + Sync {
    fn node_stats(&self, node: &HostName) -> Result<NodeStats, HostError>;
}

/// Enumerates the direct neighbours of a node in the network graph.
pub trait Topology: Send + Sync {
    fn neighbors(&self, node: &HostName) -> Result<Vec<HostName>, HostError>;
}

/// Reports target economics and models the effect of threads.
pub trait EconomicOracle: Send + Sync {
    fn economics(&self, target: &HostName) -> Result<Economics, HostError>;

    /// Replenish threads needed to multiply the target's value by `multiplier`.
    fn growth_analysis(&self, target: &HostName, multiplier: f64) -> f64;

    /// Security increase caused by `threads` threads of `op`.
    fn security_impact(&self, op: OpKind, threads: u32) -> f64;

    /// The operator's current capability level.
    fn operator_level(&self) -> u32;
}

/// A successful launch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Launch {
    pub pid: u64,

    /// Node capacity consumed by the launched threads.
    pub capacity_used: f64,
}

/// Launches worker threads on nodes.
pub trait Dispatcher: Send + Sync {
    fn launch(
        &self,
        op: OpKind,
        node: &HostName,
        threads: u32,
        target: &HostName,
    ) -> Result<Launch, HostError>;

    /// Whether the worker program exists and can be launched.
    fn program_available(&self, program: &str) -> bool;
}

/// One entry of a node's process table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u64,
    pub program: String,
    pub args: Vec<String>,
    pub threads: u32,
}

/// Lists processes running on a node.
pub trait ProcessObserver: Send + Sync {
    fn processes(&self, node: &HostName) -> Result<Vec<ProcessInfo>, HostError>;
}

/// Every host facility the scheduler needs, behind one object.
pub trait Host: CapacityOracle + Topology + EconomicOracle + Dispatcher + ProcessObserver {}

impl<T> Host for T where T: CapacityOracle + Topology + EconomicOracle + Dispatcher + ProcessObserver
{}
