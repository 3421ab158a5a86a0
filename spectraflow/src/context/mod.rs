//! Explicit per-run context threaded through the builder and scheduler.

mod run;

pub use run::RunContext;
