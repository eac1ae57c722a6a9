//! Scheduler state.
//!
//! One `SchedulerState` holds every node and target for a run. It is owned
//! by the scheduler worker and handed by reference to each component; there
//! is no shared registry.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use swarm_model::{ComputeNode, HostName, SupplyPool, Target, ThreadCounts};
use swarm_reconcile::ConvergenceStatus;
use thiserror::Error;
use tracing::info;

use crate::scheduler::DemandParams;

/// Rejected tunable values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TunableError {
    #[error("extract_threshold must be in (0, 1], got {0}")]
    ExtractThreshold(f64),

    #[error("extract_fraction must be in (0, 1], got {0}")]
    ExtractFraction(f64),

    #[error("max_targets must be at least 1")]
    MaxTargets,

    #[error("tick period must be at least 1ms")]
    TickPeriod,
}

/// Parameters that can be changed while the scheduler runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Tunables {
    pub demand: DemandParams,
    pub max_targets: usize,
    pub tick_period: Duration,
}

impl Tunables {
    pub fn validate(&self) -> Result<(), TunableError> {
        let threshold = self.demand.extract_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(TunableError::ExtractThreshold(threshold));
        }

        let fraction = self.demand.extract_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(TunableError::ExtractFraction(fraction));
        }

        if self.max_targets == 0 {
            return Err(TunableError::MaxTargets);
        }

        if self.tick_period < Duration::from_millis(1) {
            return Err(TunableError::TickPeriod);
        }

        Ok(())
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            demand: DemandParams::default(),
            max_targets: 100,
            tick_period: swarm_reconcile::DEFAULT_TICK_PERIOD,
        }
    }
}

/// Everything the scheduler knows during a run.
#[derive(Debug, Clone)]
pub struct SchedulerState {
    /// Nodes in pool order (discovery order).
    pub nodes: Vec<ComputeNode>,

    /// Tracked targets in tracking order.
    pub targets: Vec<Target>,

    pub operator_level: u32,
    pub tunables: Tunables,
    pub banned: HashSet<HostName>,

    /// Number of ticks started.
    pub tick: u64,

    /// Pool as it stood after the last allocation.
    pub last_pool: SupplyPool,

    /// Set by the `stop` command; the worker exits at the tick boundary.
    pub stop_requested: bool,
}

impl SchedulerState {
    pub fn new(tunables: Tunables, banned: impl IntoIterator<Item = HostName>) -> Self {
        Self {
            nodes: Vec::new(),
            targets: Vec::new(),
            operator_level: 0,
            tunables,
            banned: banned.into_iter().collect(),
            tick: 0,
            last_pool: SupplyPool::default(),
            stop_requested: false,
        }
    }

    /// Starts tracking `name` as a target.
    ///
    /// Returns false if it is banned, already tracked, or the cap is reached.
    pub fn track_target(&mut self, name: HostName) -> bool {
        if self.banned.contains(&name)
            || self.targets.iter().any(|t| t.name == name)
            || self.targets.len() >= self.tunables.max_targets
        {
            return false;
        }

        info!(target = %name, "Tracking target");
        self.targets.push(Target::new(name));
        true
    }

    /// Drops the lowest-scoring targets above `max_targets`.
    ///
    /// Survivors keep their tracking order.
    pub fn enforce_target_cap(&mut self) -> Vec<HostName> {
        let cap = self.tunables.max_targets;
        if self.targets.len() <= cap {
            return Vec::new();
        }

        let mut ranked: Vec<usize> = (0..self.targets.len()).collect();
        ranked.sort_by(|&a, &b| self.targets[b].score.total_cmp(&self.targets[a].score));
        let keep: HashSet<usize> = ranked.into_iter().take(cap).collect();

        let mut dropped = Vec::new();
        let mut index = 0;
        self.targets.retain(|t| {
            let kept = keep.contains(&index);
            index += 1;
            if !kept {
                dropped.push(t.name.clone());
            }
            kept
        });

        for name in &dropped {
            info!(target = %name, "Dropped target above cap");
        }
        dropped
    }

    /// Replaces the node set with a fresh discovery result.
    ///
    /// Known nodes keep their position and state; new nodes are appended;
    /// nodes no longer reachable are removed. Returns `(added, removed)`.
    pub fn merge_nodes(&mut self, discovered: &[HostName]) -> (usize, usize) {
        let seen: HashSet<&HostName> = discovered.iter().collect();
        let before = self.nodes.len();
        self.nodes.retain(|n| seen.contains(&n.name));
        let removed = before - self.nodes.len();

        let known: HashSet<HostName> = self.nodes.iter().map(|n| n.name.clone()).collect();
        let mut added = 0;
        for name in discovered {
            if !known.contains(name) {
                self.nodes.push(ComputeNode::new(name.clone()));
                added += 1;
            }
        }

        (added, removed)
    }

    pub fn target_snapshots(&self) -> Vec<TargetSnapshot> {
        self.targets.iter().map(TargetSnapshot::from).collect()
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            taken_at: Utc::now(),
            tick: self.tick,
            operator_level: self.operator_level,
            nodes: self.nodes.len(),
            pool: self.last_pool,
            targets: self.target_snapshots(),
        }
    }
}

/// Read-only view of one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetSnapshot {
    pub name: HostName,
    pub score: f64,
    pub value_ratio: f64,
    pub security_excess: f64,
    pub desired: ThreadCounts,
    pub running: ThreadCounts,
    pub status: ConvergenceStatus,
}

impl From<&Target> for TargetSnapshot {
    fn from(target: &Target) -> Self {
        Self {
            name: target.name.clone(),
            score: target.score,
            value_ratio: target.economics.value_ratio(),
            security_excess: target.economics.security_excess(),
            desired: target.desired,
            running: target.running,
            status: ConvergenceStatus::of(target),
        }
    }
}

/// Read-only view of the whole scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub taken_at: DateTime<Utc>,
    pub tick: u64,
    pub operator_level: u32,
    pub nodes: usize,
    pub pool: SupplyPool,
    pub targets: Vec<TargetSnapshot>,
}
