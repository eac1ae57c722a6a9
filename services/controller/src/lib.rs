//! Swarm slot scheduler.
//!
//! This crate primarily ships a `swarm-controller` binary, but we expose a
//! library surface to enable integration testing and reuse.

pub mod command;
pub mod config;
pub mod scheduler;
pub mod simulated;
pub mod state;
