//! Batch planning and execution.
//!
//! [`ExecutionPlan::compute`] groups resolvable instances into sequential
//! batches; [`Scheduler::run`] executes them and produces a [`RunReport`].

mod dag;
mod plan;
mod report;

pub use dag::{Scheduler, SchedulerConfig};
pub use plan::ExecutionPlan;
pub use report::{InstanceOutcome, RunReport, RunSummary, SkipCause};
