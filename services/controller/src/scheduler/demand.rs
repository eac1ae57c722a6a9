//! Demand scoring.
//!
//! Each tick every tracked target is re-scored and its desired thread
//! counts recomputed from fresh economics. The model:
//!
//! - Extract only from targets holding more than `extract_threshold` of
//!   their maximum value, aiming to remove `extract_fraction` per cycle.
//! - Replenish enough to offset what extraction removes during one
//!   replenish cycle and restore the maximum.
//! - Stabilize enough to cancel the security added by the other two plus
//!   any excess already present.

use swarm_model::{EconomicOracle, Economics, OpKind, Target, ThreadCounts};
use tracing::debug;

/// Security excess above which replenishment is throttled to one thread.
pub const SECURITY_RELIEF_MARGIN: f64 = 5.0;

/// Security removed by one stabilize thread.
pub const STABILIZE_PER_THREAD: f64 = 0.05;

/// Live-tunable demand parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemandParams {
    /// Minimum `current / max` value ratio before extracting.
    pub extract_threshold: f64,

    /// Fraction of current value to extract per cycle.
    pub extract_fraction: f64,
}

impl Default for DemandParams {
    fn default() -> Self {
        Self {
            extract_threshold: 0.5,
            extract_fraction: 0.2,
        }
    }
}

/// Profitability score for a target, or 0 if it may not be scheduled.
pub fn score(economics: &Economics, accessible: bool, operator_level: u32) -> f64 {
    if !accessible || economics.required_level > operator_level {
        return 0.0;
    }

    let score = economics.max_value * economics.extraction_rate / economics.baseline_security;
    if score.is_finite() && score > 0.0 {
        score
    } else {
        0.0
    }
}

/// Computes scores and desired thread counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemandScorer {
    pub params: DemandParams,
}

impl DemandScorer {
    pub fn new(params: DemandParams) -> Self {
        Self { params }
    }

    /// Re-scores `target` and recomputes its desired thread counts.
    ///
    /// A target scoring 0 has all desired counts reset to 0.
    pub fn evaluate<O>(&self, target: &mut Target, operator_level: u32, oracle: &O)
    where
        O: EconomicOracle + ?Sized,
    {
        target.score = score(&target.economics, target.accessible, operator_level);
        if target.score == 0.0 {
            target.desired = ThreadCounts::ZERO;
            return;
        }

        let e = target.economics;
        let extract = self.desired_extract(&e);
        let replenish = desired_replenish(target, extract, oracle);
        let stabilize = desired_stabilize(&e, extract, replenish, oracle);

        target.desired = ThreadCounts::new(extract, replenish, stabilize);

        debug!(
            target = %target.name,
            score = target.score,
            extract,
            replenish,
            stabilize,
            "Evaluated target"
        );
    }

    fn desired_extract(&self, e: &Economics) -> u32 {
        if e.value_ratio() > self.params.extract_threshold {
            thread_count(self.params.extract_fraction / e.extraction_rate)
        } else {
            0
        }
    }
}

fn desired_replenish<O>(target: &Target, extract: u32, oracle: &O) -> u32
where
    O: EconomicOracle + ?Sized,
{
    let e = &target.economics;

    if e.security_excess() > SECURITY_RELIEF_MARGIN {
        return 1;
    }

    let extracts_per_replenish = e.durations.replenish / e.durations.extract;
    let loss = extracts_per_replenish * f64::from(extract) * e.extraction_rate * e.current_value;
    let multiplier = e.max_value / (e.current_value - loss);

    if multiplier >= 1.0 && multiplier.is_finite() {
        thread_count(oracle.growth_analysis(&target.name, multiplier))
    } else {
        1
    }
}

fn desired_stabilize<O>(e: &Economics, extract: u32, replenish: u32, oracle: &O) -> u32
where
    O: EconomicOracle + ?Sized,
{
    let d = &e.durations;
    let from_extract = scaled(
        d.stabilize / d.extract,
        oracle.security_impact(OpKind::Extract, extract),
    );
    let from_replenish = scaled(
        d.stabilize / d.replenish,
        oracle.security_impact(OpKind::Replenish, replenish),
    );

    let to_remove = e.security_excess() + from_extract + from_replenish;
    thread_count(to_remove / STABILIZE_PER_THREAD)
}

/// `ratio * impact`, dropping contributions that are not finite.
fn scaled(ratio: f64, impact: f64) -> f64 {
    let value = ratio * impact;
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Rounds a fractional thread requirement up, clamping at 0.
///
/// Non-finite inputs mean the model broke down and yield 0.
pub fn thread_count(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.ceil() as u32
    } else {
        0
    }
}
