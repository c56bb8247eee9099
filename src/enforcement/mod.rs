//! Overdue detection and default enforcement

mod scheduler;
mod sweeper;

pub use scheduler::start_sweep_job;
pub use sweeper::{EnforcementSweeper, SweepFailure, SweepReport};
