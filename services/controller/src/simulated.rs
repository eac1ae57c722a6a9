//! In-process simulated host.
//!
//! Stands in for the external runtime during development and tests. It
//! keeps a network of servers, a process table per server and the economics
//! of every target. Launched workers stay in the process table until
//! [`SimulatedHost::settle`] completes them and applies their effect.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use swarm_model::{
    CapacityOracle, Dispatcher, EconomicOracle, Economics, HostError, HostName, Launch, NodeStats,
    OpKind, ProcessInfo, ProcessObserver, Topology,
};
use swarm_reconcile::ProgramCatalog;
use tracing::debug;

/// Security added by one extract thread.
pub const EXTRACT_SECURITY: f64 = 0.002;

/// Security added by one replenish thread.
pub const REPLENISH_SECURITY: f64 = 0.004;

/// Security removed by one stabilize thread.
pub const STABILIZE_SECURITY: f64 = 0.05;

fn default_cores() -> u32 {
    1
}

fn default_growth_rate() -> f64 {
    0.003
}

/// One server of the simulated network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedServer {
    pub name: HostName,

    /// Direct links; the reverse direction is implied.
    #[serde(default)]
    pub links: Vec<HostName>,

    pub capacity: f64,

    #[serde(default)]
    pub rooted: bool,

    #[serde(default = "default_cores")]
    pub cores: u32,

    /// Absent for servers that cannot be targeted.
    #[serde(default)]
    pub economics: Option<Economics>,

    /// Per-thread value growth for replenish.
    #[serde(default = "default_growth_rate")]
    pub growth_rate: f64,
}

/// A whole simulated network, as loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedNetwork {
    #[serde(default)]
    pub operator_level: u32,
    pub servers: Vec<SimulatedServer>,
}

#[derive(Debug, Clone)]
struct Worker {
    info: ProcessInfo,
    op: Option<OpKind>,
    capacity: f64,
}

#[derive(Debug)]
struct Inner {
    servers: HashMap<HostName, SimulatedServer>,
    adjacency: HashMap<HostName, Vec<HostName>>,
    used: HashMap<HostName, f64>,
    processes: HashMap<HostName, Vec<Worker>>,
    operator_level: u32,
    programs: HashSet<String>,
}

impl Inner {
    fn server(&self, name: &HostName) -> Result<&SimulatedServer, HostError> {
        self.servers
            .get(name)
            .ok_or_else(|| HostError::NodeNotFound(name.clone()))
    }

    fn used(&self, name: &HostName) -> f64 {
        self.used.get(name).copied().unwrap_or(0.0)
    }
}

/// Simulated host for development and testing.
#[derive(Debug)]
pub struct SimulatedHost {
    inner: Mutex<Inner>,
    catalog: ProgramCatalog,
    unit_cost: f64,
    next_pid: AtomicU64,
    fail_launches: bool,
}

impl SimulatedHost {
    /// Creates a host over `network` with every catalog program installed.
    pub fn new(network: SimulatedNetwork, catalog: ProgramCatalog, unit_cost: f64) -> Self {
        let mut adjacency: HashMap<HostName, Vec<HostName>> = HashMap::new();
        for server in &network.servers {
            adjacency.entry(server.name.clone()).or_default();
            for link in &server.links {
                let forward = adjacency.entry(server.name.clone()).or_default();
                if !forward.contains(link) {
                    forward.push(link.clone());
                }
                let backward = adjacency.entry(link.clone()).or_default();
                if !backward.contains(&server.name) {
                    backward.push(server.name.clone());
                }
            }
        }

        let programs = OpKind::ALL
            .iter()
            .map(|op| catalog.program(*op).to_string())
            .collect();

        let servers = network
            .servers
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();

        Self {
            inner: Mutex::new(Inner {
                servers,
                adjacency,
                used: HashMap::new(),
                processes: HashMap::new(),
                operator_level: network.operator_level,
                programs,
            }),
            catalog,
            unit_cost,
            next_pid: AtomicU64::new(1),
            fail_launches: false,
        }
    }

    /// Parses a network description from JSON.
    pub fn from_json(json: &str, catalog: ProgramCatalog, unit_cost: f64) -> Result<Self> {
        let network: SimulatedNetwork =
            serde_json::from_str(json).context("invalid simulated network")?;
        Ok(Self::new(network, catalog, unit_cost))
    }

    /// Loads a network description from a JSON file.
    pub fn load(path: &Path, catalog: ProgramCatalog, unit_cost: f64) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&json, catalog, unit_cost)
    }

    /// Built-in demo network.
    pub fn demo(catalog: ProgramCatalog, unit_cost: f64) -> Result<Self> {
        Self::from_json(DEMO_NETWORK, catalog, unit_cost)
    }

    /// Makes every launch fail.
    pub fn failing(mut self) -> Self {
        self.fail_launches = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_operator_level(&self, level: u32) {
        self.lock().operator_level = level;
    }

    pub fn set_rooted(&self, node: &HostName, rooted: bool) {
        if let Some(server) = self.lock().servers.get_mut(node) {
            server.rooted = rooted;
        }
    }

    /// Edits a target's economics in place.
    pub fn update_economics(&self, target: &HostName, f: impl FnOnce(&mut Economics)) {
        if let Some(economics) = self
            .lock()
            .servers
            .get_mut(target)
            .and_then(|s| s.economics.as_mut())
        {
            f(economics);
        }
    }

    pub fn uninstall_program(&self, program: &str) {
        self.lock().programs.remove(program);
    }

    pub fn install_program(&self, program: &str) {
        self.lock().programs.insert(program.to_string());
    }

    /// Adds a process the scheduler did not launch.
    pub fn spawn_foreign(&self, node: &HostName, program: &str, args: Vec<String>, threads: u32) {
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let op = self.catalog.classify(program);
        let mut inner = self.lock();
        inner.processes.entry(node.clone()).or_default().push(Worker {
            info: ProcessInfo {
                pid,
                program: program.to_string(),
                args,
                threads,
            },
            op,
            capacity: 0.0,
        });
    }

    /// Kills every process on `node` without applying any effect.
    ///
    /// Returns the number of processes killed.
    pub fn kill_all(&self, node: &HostName) -> usize {
        let mut inner = self.lock();
        let killed = inner.processes.remove(node).map(|p| p.len()).unwrap_or(0);
        inner.used.remove(node);
        killed
    }

    /// Number of processes across all nodes.
    pub fn process_count(&self) -> usize {
        self.lock().processes.values().map(Vec::len).sum()
    }

    pub fn economics_of(&self, target: &HostName) -> Option<Economics> {
        self.lock().servers.get(target).and_then(|s| s.economics)
    }

    /// Completes every running worker and applies its effect to its target.
    ///
    /// Returns the total value extracted.
    pub fn settle(&self) -> f64 {
        let mut inner = self.lock();
        let finished: Vec<Worker> = inner.processes.drain().flat_map(|(_, p)| p).collect();
        inner.used.clear();

        let mut extracted = 0.0;
        for worker in finished {
            let (Some(op), Some(target)) = (worker.op, worker.info.args.first()) else {
                continue;
            };
            let Ok(target) = HostName::parse(target) else {
                continue;
            };
            let Some(server) = inner.servers.get_mut(&target) else {
                continue;
            };
            let growth_rate = server.growth_rate;
            let Some(e) = server.economics.as_mut() else {
                continue;
            };

            let threads = f64::from(worker.info.threads);
            match op {
                OpKind::Extract => {
                    let taken = e.current_value * (e.extraction_rate * threads).min(1.0);
                    e.current_value -= taken;
                    e.current_security += EXTRACT_SECURITY * threads;
                    extracted += taken;
                }
                OpKind::Replenish => {
                    let grown = (e.current_value + threads) * (1.0 + growth_rate).powf(threads);
                    e.current_value = grown.min(e.max_value);
                    e.current_security += REPLENISH_SECURITY * threads;
                }
                OpKind::Stabilize => {
                    e.current_security =
                        (e.current_security - STABILIZE_SECURITY * threads).max(e.baseline_security);
                }
            }
        }

        debug!(extracted, "Settled simulated workers");
        extracted
    }
}

impl CapacityOracle for SimulatedHost {
    fn node_stats(&self, node: &HostName) -> Result<NodeStats, HostError> {
        let inner = self.lock();
        let server = inner.server(node)?;
        Ok(NodeStats {
            total_capacity: server.capacity,
            free_capacity: (server.capacity - inner.used(node)).max(0.0),
            rooted: server.rooted,
            cores: server.cores,
        })
    }
}

impl Topology for SimulatedHost {
    fn neighbors(&self, node: &HostName) -> Result<Vec<HostName>, HostError> {
        self.lock()
            .adjacency
            .get(node)
            .cloned()
            .ok_or_else(|| HostError::NodeNotFound(node.clone()))
    }
}

impl EconomicOracle for SimulatedHost {
    fn economics(&self, target: &HostName) -> Result<Economics, HostError> {
        self.lock()
            .server(target)?
            .economics
            .ok_or_else(|| HostError::NoEconomics(target.clone()))
    }

    fn growth_analysis(&self, target: &HostName, multiplier: f64) -> f64 {
        if multiplier <= 1.0 {
            return 0.0;
        }
        let rate = self
            .lock()
            .servers
            .get(target)
            .map(|s| s.growth_rate)
            .unwrap_or_else(default_growth_rate);
        multiplier.ln() / (1.0 + rate).ln()
    }

    fn security_impact(&self, op: OpKind, threads: u32) -> f64 {
        let threads = f64::from(threads);
        match op {
            OpKind::Extract => EXTRACT_SECURITY * threads,
            OpKind::Replenish => REPLENISH_SECURITY * threads,
            OpKind::Stabilize => -STABILIZE_SECURITY * threads,
        }
    }

    fn operator_level(&self) -> u32 {
        self.lock().operator_level
    }
}

impl Dispatcher for SimulatedHost {
    fn launch(
        &self,
        op: OpKind,
        node: &HostName,
        threads: u32,
        target: &HostName,
    ) -> Result<Launch, HostError> {
        if self.fail_launches {
            return Err(HostError::Unavailable(
                "simulated host configured to fail".to_string(),
            ));
        }

        let program = self.catalog.program(op).to_string();
        let mut inner = self.lock();
        if !inner.programs.contains(&program) {
            return Err(HostError::LaunchRejected {
                node: node.clone(),
                reason: format!("{program} is not installed"),
            });
        }

        let server = inner.server(node)?;
        if !server.rooted {
            return Err(HostError::LaunchRejected {
                node: node.clone(),
                reason: "no root access".to_string(),
            });
        }

        let needed = f64::from(threads) * self.unit_cost;
        let free = server.capacity - inner.used(node);
        if needed > free {
            return Err(HostError::LaunchRejected {
                node: node.clone(),
                reason: format!("needs {needed} capacity, {free} free"),
            });
        }

        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        *inner.used.entry(node.clone()).or_insert(0.0) += needed;
        inner.processes.entry(node.clone()).or_default().push(Worker {
            info: ProcessInfo {
                pid,
                program,
                args: vec![target.to_string(), pid.to_string()],
                threads,
            },
            op: Some(op),
            capacity: needed,
        });

        Ok(Launch {
            pid,
            capacity_used: needed,
        })
    }

    fn program_available(&self, program: &str) -> bool {
        self.lock().programs.contains(program)
    }
}

impl ProcessObserver for SimulatedHost {
    fn processes(&self, node: &HostName) -> Result<Vec<ProcessInfo>, HostError> {
        let inner = self.lock();
        inner.server(node)?;
        Ok(inner
            .processes
            .get(node)
            .map(|p| p.iter().map(|w| w.info.clone()).collect())
            .unwrap_or_default())
    }
}

impl SimulatedHost {
    /// Capacity held by running workers on `node`.
    pub fn capacity_in_use(&self, node: &HostName) -> f64 {
        self.lock()
            .processes
            .get(node)
            .map(|p| p.iter().map(|w| w.capacity).sum())
            .unwrap_or(0.0)
    }
}

/// Built-in demo network: a small graph with a cycle through `zer0`.
const DEMO_NETWORK: &str = r#"{
    "operator_level": 10,
    "servers": [
        {"name": "home", "links": ["n00dles", "foodnstuff", "sigma-cosmetics"], "capacity": 64, "rooted": true},
        {"name": "n00dles", "links": [], "capacity": 4, "rooted": true, "economics": {"max_value": 70000.0, "current_value": 52500.0, "extraction_rate": 0.02, "durations": {"extract": 1000.0, "replenish": 3200.0, "stabilize": 4000.0}, "baseline_security": 1.0, "current_security": 1.0, "required_level": 1}},
        {"name": "foodnstuff", "links": ["joesguns"], "capacity": 16, "rooted": true, "economics": {"max_value": 2000000.0, "current_value": 1500000.0, "extraction_rate": 0.01, "durations": {"extract": 1000.0, "replenish": 3200.0, "stabilize": 4000.0}, "baseline_security": 10.0, "current_security": 10.0, "required_level": 1}},
        {"name": "sigma-cosmetics", "links": ["zer0"], "capacity": 16, "rooted": true, "economics": {"max_value": 2300000.0, "current_value": 1725000.0, "extraction_rate": 0.008, "durations": {"extract": 1000.0, "replenish": 3200.0, "stabilize": 4000.0}, "baseline_security": 10.0, "current_security": 10.0, "required_level": 5}},
        {"name": "joesguns", "links": ["zer0"], "capacity": 16, "rooted": true, "economics": {"max_value": 2500000.0, "current_value": 1875000.0, "extraction_rate": 0.008, "durations": {"extract": 1000.0, "replenish": 3200.0, "stabilize": 4000.0}, "baseline_security": 15.0, "current_security": 15.0, "required_level": 10}},
        {"name": "zer0", "links": ["b-and-a"], "capacity": 32, "rooted": false, "economics": {"max_value": 7500000.0, "current_value": 5625000.0, "extraction_rate": 0.004, "durations": {"extract": 1000.0, "replenish": 3200.0, "stabilize": 4000.0}, "baseline_security": 25.0, "current_security": 25.0, "required_level": 75}},
        {"name": "b-and-a", "links": [], "capacity": 0, "rooted": false}
    ]
}"#;
