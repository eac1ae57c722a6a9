use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use swarm_model::{parse_name_list, HostName, SlotPolicy};
use swarm_reconcile::{ProgramCatalog, DEFAULT_REDISCOVER_TICKS};

use crate::scheduler::DemandParams;
use crate::state::Tunables;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,

    /// Where the network walk starts.
    pub root_node: HostName,

    /// Targets tracked from startup.
    pub targets: Vec<HostName>,

    /// Targets never tracked.
    pub banned_targets: Vec<HostName>,

    pub tunables: Tunables,
    pub policy: SlotPolicy,
    pub rediscover_ticks: u64,
    pub catalog: ProgramCatalog,

    /// Network description for the simulated host; the built-in demo
    /// network is used when unset.
    pub topology_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let log_level = var("SWARM_LOG_LEVEL", "info");

        let root_node = HostName::parse(&var("SWARM_ROOT_NODE", "home"))
            .context("invalid SWARM_ROOT_NODE")?;

        let targets = parse_name_list(&var("SWARM_TARGETS", "n00dles"))
            .context("invalid SWARM_TARGETS")?;

        let banned_targets = parse_name_list(&var("SWARM_BANNED_TARGETS", "b-and-a"))
            .context("invalid SWARM_BANNED_TARGETS")?;

        let tunables = Tunables {
            demand: DemandParams {
                extract_threshold: parsed(&lookup, "SWARM_EXTRACT_THRESHOLD", 0.5)?,
                extract_fraction: parsed(&lookup, "SWARM_EXTRACT_FRACTION", 0.2)?,
            },
            max_targets: parsed(&lookup, "SWARM_MAX_TARGETS", 100)?,
            tick_period: Duration::from_millis(parsed(&lookup, "SWARM_TICK_MS", 1000)?),
        };
        tunables.validate()?;

        let policy = SlotPolicy {
            unit_cost: parsed(&lookup, "SWARM_SLOT_COST", 2.0)?,
            home_node: HostName::parse(&var("SWARM_HOME_NODE", "home"))
                .context("invalid SWARM_HOME_NODE")?,
            home_reserve: parsed(&lookup, "SWARM_HOME_RESERVE", 0.1)?,
            big_node_capacity: parsed(&lookup, "SWARM_BIG_NODE_CAPACITY", 2048.0)?,
            big_node_level: parsed(&lookup, "SWARM_BIG_NODE_LEVEL", 5000)?,
        };
        if !(policy.unit_cost.is_finite() && policy.unit_cost > 0.0) {
            bail!("SWARM_SLOT_COST must be positive, got {}", policy.unit_cost);
        }
        if !(0.0..1.0).contains(&policy.home_reserve) {
            bail!(
                "SWARM_HOME_RESERVE must be in [0, 1), got {}",
                policy.home_reserve
            );
        }
        if policy.big_node_capacity.is_nan() {
            bail!("SWARM_BIG_NODE_CAPACITY must be a number");
        }

        let rediscover_ticks = parsed(&lookup, "SWARM_REDISCOVER_TICKS", DEFAULT_REDISCOVER_TICKS)?;
        if rediscover_ticks == 0 {
            bail!("SWARM_REDISCOVER_TICKS must be at least 1");
        }

        let defaults = ProgramCatalog::default();
        let catalog = ProgramCatalog {
            extract: var("SWARM_PROGRAM_EXTRACT", &defaults.extract),
            replenish: var("SWARM_PROGRAM_REPLENISH", &defaults.replenish),
            stabilize: var("SWARM_PROGRAM_STABILIZE", &defaults.stabilize),
        };
        if catalog.extract.is_empty() || catalog.replenish.is_empty() || catalog.stabilize.is_empty()
        {
            bail!("worker program paths must not be empty");
        }

        let topology_file = lookup("SWARM_TOPOLOGY_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            log_level,
            root_node,
            targets,
            banned_targets,
            tunables,
            policy,
            rediscover_ticks,
            catalog,
            topology_file,
        })
    }
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}")),
        None => Ok(default),
    }
}
