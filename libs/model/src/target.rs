//! Targets: the demand side of the scheduler.

use serde::{Deserialize, Serialize};

use crate::{HostName, ThreadCounts};

/// Time each operation takes against a target, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpDurations {
    pub extract: f64,
    pub replenish: f64,
    pub stabilize: f64,
}

/// Economic, security and timing attributes of a target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Economics {
    pub max_value: f64,
    pub current_value: f64,

    /// Fraction of current value removed by one extract thread.
    pub extraction_rate: f64,

    pub durations: OpDurations,
    pub baseline_security: f64,
    pub current_security: f64,
    pub required_level: u32,
}

impl Economics {
    /// Security above the baseline.
    pub fn security_excess(&self) -> f64 {
        self.current_security - self.baseline_security
    }

    /// `current_value / max_value`, or 0 when the target holds no value.
    pub fn value_ratio(&self) -> f64 {
        if self.max_value > 0.0 {
            self.current_value / self.max_value
        } else {
            0.0
        }
    }
}

impl Default for Economics {
    fn default() -> Self {
        Self {
            max_value: 0.0,
            current_value: 0.0,
            extraction_rate: 0.0,
            durations: OpDurations {
                extract: 0.0,
                replenish: 0.0,
                stabilize: 0.0,
            },
            baseline_security: 1.0,
            current_security: 1.0,
            required_level: u32::MAX,
        }
    }
}

/// A tracked target and its scheduling state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Target {
    pub name: HostName,
    pub economics: Economics,

    /// Whether the scheduler currently has access to the target.
    pub accessible: bool,

    /// Profitability score; 0 means do not schedule.
    pub score: f64,

    pub desired: ThreadCounts,
    pub running: ThreadCounts,
}

impl Target {
    /// Creates an unscored target; the first reconcile fills it in.
    pub fn new(name: HostName) -> Self {
        Self {
            name,
            economics: Economics::default(),
            accessible: false,
            score: 0.0,
            desired: ThreadCounts::ZERO,
            running: ThreadCounts::ZERO,
        }
    }

    /// Applies fresh attributes from the host.
    pub fn refresh(&mut self, economics: Economics, accessible: bool) {
        self.economics = economics;
        self.accessible = accessible;
    }

    /// Threads still wanted per kind: `max(0, desired - running)`.
    pub fn delta(&self) -> ThreadCounts {
        self.desired.saturating_sub(&self.running)
    }

    /// Whether the scheduler should consider this target at all.
    pub fn is_eligible(&self) -> bool {
        self.score > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_clamps_at_zero() {
        let mut target = Target::new(HostName::parse("joesguns").unwrap());
        target.desired = ThreadCounts::new(4, 2, 8);
        target.running = ThreadCounts::new(5, 2, 3);
        assert_eq!(target.delta(), ThreadCounts::new(0, 0, 5));
    }

    #[test]
    fn test_value_ratio_without_value() {
        let economics = Economics::default();
        assert_eq!(economics.value_ratio(), 0.0);
    }

    #[test]
    fn test_new_target_is_ineligible() {
        let target = Target::new(HostName::parse("n00dles").unwrap());
        assert!(!target.is_eligible());
        assert!(!target.accessible);
    }
}
