//! Error types for names and host calls.

use thiserror::Error;

use crate::HostName;

/// Errors that can occur when parsing or validating host names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The name string is empty.
    #[error("host name cannot be empty")]
    Empty,

    /// The name contains whitespace.
    #[error("host name contains whitespace: '{0}'")]
    Whitespace(String),

    /// The name contains a control character.
    #[error("host name contains a control character: {0:?}")]
    ControlCharacter(String),
}

/// Errors reported by the external host facilities.
///
/// None of these are fatal to the scheduler; each one degrades a single
/// node or target for the current tick.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HostError {
    /// The host does not know this node.
    #[error("node not found: {0}")]
    NodeNotFound(HostName),

    /// The node has no economic profile.
    #[error("no economics for target: {0}")]
    NoEconomics(HostName),

    /// A launch was refused (not enough capacity, no root, raced).
    #[error("launch rejected on {node}: {reason}")]
    LaunchRejected { node: HostName, reason: String },

    /// The host facility is temporarily unavailable.
    #[error("host unavailable: {0}")]
    Unavailable(String),
}
