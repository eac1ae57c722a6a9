//! Network discovery.
//!
//! The network is an arbitrary graph; links are bidirectional and cycles
//! are common. The walk keeps a visited set so every host is reported once.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::{HostError, HostName, Topology};

/// Walks the network depth-first from `root`.
///
/// Returns every reachable host exactly once, `root` first, children in
/// the order the host reports them. Fails only if the root itself cannot be
/// scanned; unreachable branches are logged and skipped.
pub fn discover<T>(root: &HostName, topology: &T) -> Result<Vec<HostName>, HostError>
where
    T: Topology + ?Sized,
{
    let root_neighbors = topology.neighbors(root)?;

    let mut visited: HashSet<HostName> = HashSet::new();
    let mut order = Vec::new();

    visited.insert(root.clone());
    order.push(root.clone());

    let mut stack: Vec<HostName> = root_neighbors.into_iter().rev().collect();

    while let Some(node) = stack.pop() {
        if !visited.insert(node.clone()) {
            continue;
        }
        order.push(node.clone());

        match topology.neighbors(&node) {
            Ok(neighbors) => {
                stack.extend(
                    neighbors
                        .into_iter()
                        .rev()
                        .filter(|child| !visited.contains(child)),
                );
            }
            Err(e) => {
                warn!(node = %node, error = %e, "Failed to scan node, skipping its branch");
            }
        }
    }

    debug!(root = %root, discovered = order.len(), "Network walk complete");
    Ok(order)
}
