//! # swarm-model
//!
//! Shared types for the swarm slot scheduler.
//!
//! ## Concepts
//!
//! - A **compute node** exposes a small number of worker slots.
//! - A **target** wants threads of three kinds: extract, replenish and
//!   stabilize.
//! - The **host** is everything outside the scheduler: capacity figures,
//!   process tables, economics and the ability to launch workers. It is
//!   reached only through the traits in [`host`].
//!
//! ## Invariants
//!
//! - Thread counts are unsigned; "negative demand" is always clamped to 0
//! - Node and target names share one namespace ([`HostName`])

mod error;
pub mod host;
mod name;
mod node;
mod ops;
mod pool;
mod target;
pub mod topology;

pub use error::{HostError, NameError};
pub use host::{
    CapacityOracle, Dispatcher, EconomicOracle, Host, Launch, ProcessInfo, ProcessObserver,
    Topology,
};
pub use name::{parse_name_list, HostName};
pub use node::{ComputeNode, NodeStats, SlotPolicy};
pub use ops::{OpKind, ThreadCounts};
pub use pool::SupplyPool;
pub use target::{Economics, OpDurations, Target};
