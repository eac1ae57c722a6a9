//! Scheduler module for slot allocation and worker dispatch.
//!
//! The scheduler is responsible for:
//! - Scoring targets and computing their desired thread counts
//! - Splitting the free slots of the pool between operation kinds
//! - Dispatching worker threads onto compute-node slots
//! - Driving the tick loop that reconciles, scores and allocates

mod allocator;
mod demand;
mod worker;

pub use allocator::{allocate, split_budget, AllocationOutcome, Dispatch};
pub use demand::{
    score, thread_count, DemandParams, DemandScorer, SECURITY_RELIEF_MARGIN, STABILIZE_PER_THREAD,
};
pub use worker::{next_sleep, SchedulerError, SchedulerWorker, TickReport, WorkerSettings};
