//! Swarm controller
//!
//! Runs the slot scheduler against a simulated host network. Operator
//! commands are read as JSON lines from stdin and answered on stdout.

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use swarm_controller::{
    command::{self, Command, ControlHandle},
    config,
    scheduler::{SchedulerWorker, WorkerSettings},
    simulated::SimulatedHost,
    state::SchedulerState,
};
use swarm_model::Host;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to SWARM_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!("Starting swarm controller");
    info!(
        root = %config.root_node,
        targets = config.targets.len(),
        tick_period_ms = config.tunables.tick_period.as_millis() as u64,
        "Configuration loaded"
    );

    let host = match &config.topology_file {
        Some(path) => SimulatedHost::load(path, config.catalog.clone(), config.policy.unit_cost),
        None => SimulatedHost::demo(config.catalog.clone(), config.policy.unit_cost),
    };
    let host = match host {
        Ok(host) => Arc::new(host),
        Err(e) => {
            error!(error = %e, "Failed to build simulated host");
            return Err(e);
        }
    };

    let mut state = SchedulerState::new(config.tunables.clone(), config.banned_targets.clone());
    for target in &config.targets {
        if !state.track_target(target.clone()) {
            warn!(target = %target, "Target not tracked (banned, duplicate or over the cap)");
        }
    }

    let settings = WorkerSettings {
        root_node: config.root_node.clone(),
        catalog: config.catalog.clone(),
        policy: config.policy.clone(),
        rediscover_ticks: config.rediscover_ticks,
    };

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (control, commands) = command::channel(16);
    let (period_tx, period_rx) = watch::channel(config.tunables.tick_period);

    // Start scheduler worker in background
    let dyn_host: Arc<dyn Host> = host.clone();
    let mut scheduler_worker = SchedulerWorker::new(dyn_host, state, settings)
        .with_commands(commands)
        .with_period_updates(period_tx);
    let mut scheduler_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            scheduler_worker.run(shutdown_rx).await;
        }
    });

    // Workers on the simulated host finish once per current tick period
    let settle_handle = tokio::spawn({
        let host = host.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            loop {
                let period = *period_rx.borrow();
                tokio::select! {
                    _ = tokio::time::sleep(period) => {
                        let extracted = host.settle();
                        info!(extracted, "Simulated workers finished");
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }
    });

    // Read operator commands from stdin
    tokio::spawn(read_commands(control, stdin_lines()));

    // Wait for shutdown signal (Ctrl+C) or a stop command
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut scheduler_handle => {
            if let Err(e) = result {
                error!(error = %e, "Scheduler task panicked");
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = Duration::from_secs(10);

    if !scheduler_handle.is_finished() {
        if let Err(e) = tokio::time::timeout(shutdown_timeout, scheduler_handle).await {
            warn!(error = %e, "Scheduler worker did not shut down in time");
        }
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, settle_handle).await {
        warn!(error = %e, "Settle task did not shut down in time");
    }

    info!("Swarm controller shutdown complete");
    Ok(())
}

/// Reads stdin on a detached thread so a blocked read never holds up exit.
fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read command");
                    break;
                }
            }
        }
    });
    rx
}

/// Forwards JSON commands and prints each reply as one line.
async fn read_commands(control: ControlHandle, mut lines: mpsc::Receiver<String>) {
    while let Some(line) = lines.recv().await {
        if line.trim().is_empty() {
            continue;
        }

        let command: Command = match serde_json::from_str(&line) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed command");
                continue;
            }
        };

        match control.send(command).await {
            Ok(response) => match serde_json::to_string(&response) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!(error = %e, "Failed to encode reply"),
            },
            Err(e) => {
                warn!(error = %e, "Scheduler stopped accepting commands");
                break;
            }
        }
    }
}
