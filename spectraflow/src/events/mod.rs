//! Run lifecycle events.
//!
//! The scheduler emits one event per lifecycle step through the run's
//! [`EventSink`]. Payloads are JSON objects carrying at least the run id.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run started executing.
pub const RUN_STARTED: &str = "run.started";
/// A batch started.
pub const BATCH_STARTED: &str = "batch.started";
/// An instance was handed to the executor.
pub const INSTANCE_STARTED: &str = "instance.started";
/// An instance succeeded.
pub const INSTANCE_SUCCEEDED: &str = "instance.succeeded";
/// An instance failed.
pub const INSTANCE_FAILED: &str = "instance.failed";
/// An instance was skipped.
pub const INSTANCE_SKIPPED: &str = "instance.skipped";
/// The run was cancelled before finishing.
pub const RUN_CANCELLED: &str = "run.cancelled";
/// The run finished.
pub const RUN_COMPLETED: &str = "run.completed";
