//! Scheduler background worker.
//!
//! Runs the scheduling loop at a fixed tick period. A tick is synchronous
//! from start to finish; the only suspension point is the sleep between
//! ticks, so host state cannot be observed half-way through an allocation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use swarm_model::{topology, Host, HostError, HostName, SlotPolicy, SupplyPool};
use swarm_reconcile::{aggregate, reconcile, ProgramCatalog, ReconcileReport};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

use super::allocator::{allocate, AllocationOutcome};
use super::demand::DemandScorer;
use crate::command::{self, CommandRequest};
use crate::state::SchedulerState;

/// Tick failures.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("network discovery from {root} failed: {source}")]
    Discovery {
        root: HostName,
        #[source]
        source: HostError,
    },
}

/// Fixed settings for a worker.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub root_node: HostName,
    pub catalog: ProgramCatalog,
    pub policy: SlotPolicy,

    /// Ticks between network walks.
    pub rediscover_ticks: u64,
}

/// What one completed tick did.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub operator_level: u32,
    pub nodes_discovered: Option<usize>,

    #[serde(skip)]
    pub reconcile: ReconcileReport,

    /// Pool before allocation.
    pub supply: SupplyPool,

    pub allocation: AllocationOutcome,

    /// Pool after allocation.
    pub pool: SupplyPool,
}

/// Scheduler worker that runs the tick loop.
pub struct SchedulerWorker {
    host: Arc<dyn Host>,
    state: SchedulerState,
    settings: WorkerSettings,
    commands: Option<mpsc::Receiver<CommandRequest>>,

    /// Receives the tick period whenever a command changes it.
    period_updates: Option<watch::Sender<Duration>>,

    /// Missing programs already reported; cleared once they reappear.
    missing_programs: Vec<String>,
}

impl SchedulerWorker {
    /// Create a new scheduler worker.
    pub fn new(host: Arc<dyn Host>, state: SchedulerState, settings: WorkerSettings) -> Self {
        Self {
            host,
            state,
            settings,
            commands: None,
            period_updates: None,
            missing_programs: Vec::new(),
        }
    }

    /// Accept operator commands from `commands`.
    pub fn with_commands(mut self, commands: mpsc::Receiver<CommandRequest>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Publish the live tick period on `updates`.
    pub fn with_period_updates(mut self, updates: watch::Sender<Duration>) -> Self {
        updates.send_replace(self.state.tunables.tick_period);
        self.period_updates = Some(updates);
        self
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SchedulerState {
        &mut self.state
    }

    pub fn into_state(self) -> SchedulerState {
        self.state
    }

    /// Run the scheduler worker until shutdown is signaled or a stop
    /// command is applied.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_period_ms = self.state.tunables.tick_period.as_millis() as u64,
            root = %self.settings.root_node,
            targets = self.state.targets.len(),
            "Starting scheduler worker"
        );

        loop {
            if *shutdown.borrow() {
                info!("Scheduler worker shutting down");
                break;
            }

            let started = Instant::now();
            match self.tick() {
                Ok(Some(report)) => debug!(
                    tick = report.tick,
                    dispatched = report.allocation.dispatched.len(),
                    "Tick complete"
                ),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Scheduler tick failed"),
            }

            if self.state.stop_requested {
                info!(tick = self.state.tick, "Scheduler worker stopped by command");
                break;
            }

            let pause = next_sleep(self.state.tunables.tick_period, started.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Scheduler worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single tick.
    ///
    /// Returns `Ok(None)` when the tick was skipped because worker programs
    /// are missing or a stop command arrived.
    #[instrument(skip(self), fields(tick = self.state.tick + 1))]
    pub fn tick(&mut self) -> Result<Option<TickReport>, SchedulerError> {
        self.state.tick += 1;
        self.drain_commands();
        if self.state.stop_requested {
            return Ok(None);
        }

        if !self.programs_present() {
            return Ok(None);
        }

        let level = self.host.operator_level();
        let level_changed = level != self.state.operator_level;
        self.state.operator_level = level;

        let nodes_discovered = if self.state.nodes.is_empty()
            || level_changed
            || self.state.tick % self.settings.rediscover_ticks.max(1) == 0
        {
            Some(self.rediscover()?)
        } else {
            None
        };

        self.state.enforce_target_cap();

        let host = self.host.as_ref();
        let state = &mut self.state;
        let settings = &self.settings;

        let reconcile = reconcile(
            &mut state.nodes,
            &mut state.targets,
            host,
            &settings.catalog,
            &settings.policy,
        );

        let scorer = DemandScorer::new(state.tunables.demand);
        for target in state.targets.iter_mut() {
            scorer.evaluate(target, level, host);
        }

        let supply = aggregate(&state.nodes);
        let allocation = allocate(
            &mut state.nodes,
            &mut state.targets,
            level,
            &settings.policy,
            host,
        );
        let pool = aggregate(&state.nodes);
        state.last_pool = pool;

        info!(
            free_slots = supply.free_slots,
            running = supply.total_running,
            dispatched = allocation.dispatched_threads().total(),
            failures = allocation.failures,
            remaining_slots = pool.free_slots,
            "Scheduler tick complete"
        );

        Ok(Some(TickReport {
            tick: state.tick,
            operator_level: level,
            nodes_discovered,
            reconcile,
            supply,
            allocation,
            pool,
        }))
    }

    fn drain_commands(&mut self) {
        let Some(rx) = self.commands.as_mut() else {
            return;
        };

        while let Ok(request) = rx.try_recv() {
            debug!(command = ?request.command, "Applying command");
            let response = command::apply(&mut self.state, request.command);
            if request.reply.send(response).is_err() {
                debug!("Command sender went away before the reply");
            }
        }

        if let Some(updates) = &self.period_updates {
            let period = self.state.tunables.tick_period;
            updates.send_if_modified(|current| {
                if *current == period {
                    return false;
                }
                *current = period;
                true
            });
        }
    }

    /// Checks that every worker program exists on the host.
    ///
    /// Missing programs are reported once; recovery is reported once.
    fn programs_present(&mut self) -> bool {
        let missing: Vec<String> = [
            &self.settings.catalog.extract,
            &self.settings.catalog.replenish,
            &self.settings.catalog.stabilize,
        ]
        .into_iter()
        .filter(|program| !self.host.program_available(program))
        .cloned()
        .collect();

        if missing.is_empty() {
            if !self.missing_programs.is_empty() {
                info!("Worker programs available again, resuming");
                self.missing_programs.clear();
            }
            return true;
        }

        if missing != self.missing_programs {
            error!(missing = ?missing, "Worker programs missing, skipping ticks");
            self.missing_programs = missing;
        }
        false
    }

    fn rediscover(&mut self) -> Result<usize, SchedulerError> {
        let root = &self.settings.root_node;
        let discovered = match topology::discover(root, self.host.as_ref()) {
            Ok(discovered) => discovered,
            Err(source) if self.state.nodes.is_empty() => {
                return Err(SchedulerError::Discovery {
                    root: root.clone(),
                    source,
                });
            }
            Err(e) => {
                warn!(root = %root, error = %e, "Network walk failed, keeping known nodes");
                return Ok(self.state.nodes.len());
            }
        };

        let (added, removed) = self.state.merge_nodes(&discovered);
        if added > 0 || removed > 0 {
            info!(
                nodes = self.state.nodes.len(),
                added, removed, "Network rediscovered"
            );
        }
        Ok(discovered.len())
    }
}

/// Time left in the tick period after `elapsed` of work.
pub fn next_sleep(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}
