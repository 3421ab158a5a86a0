//! # Spectraflow
//!
//! Dependency graph expansion and batch scheduling for parameterized
//! spectral reduction pipelines.
//!
//! Spectraflow takes a declarative set of stage templates and a parameter
//! domain and provides:
//!
//! - **Graph expansion**: stage templates crossed with exposure names, tags
//!   and groups, with artifacts bound from producers to consumer slots
//! - **Validation**: cycles, ambiguous producers and duplicate artifact
//!   claims are rejected before anything runs; unresolvable instances are
//!   reported and excluded
//! - **Batch scheduling**: topological batches run one after another with
//!   bounded parallelism inside each batch
//! - **Failure propagation**: a failed instance skips everything that
//!   requires its outputs, with a causal chain in the run report
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spectraflow::prelude::*;
//!
//! let registry = StageManifest::from_path("spectraflow.yaml")?.to_registry()?;
//! let pipeline = Pipeline::new(registry);
//! let domain = pipeline.discover(&StaticProbe::new(["e1", "e2"]))?;
//!
//! let ctx = RunContext::new("/data/harps", domain);
//! let prepared = pipeline.prepare(&ctx)?;
//! let report = prepared.execute(Arc::new(CommandExecutor::new(contracts)), &ctx).await;
//! std::process::exit(report.exit_code());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod domain;
pub mod errors;
pub mod events;
pub mod executor;
pub mod graph;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::PipelineConfig;
    pub use crate::context::RunContext;
    pub use crate::core::{Artifact, ArtifactTemplate, Bindings, EdgeKind, InstanceStatus};
    pub use crate::domain::{DomainProbe, FilesystemProbe, ParameterDomain, StaticProbe};
    pub use crate::errors::{
        ConfigurationError, ContractErrorInfo, CycleDetectedError, GraphError, InstanceFailure,
        SpectraflowError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{CommandExecutor, ExecutionOutcome, ExecutorAdapter, Invocation};
    pub use crate::graph::{GraphBuilder, InstanceGraph, InstanceId, ValidationReport, Validator};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::pipeline::{Pipeline, PlanDescription, PreparedRun};
    pub use crate::registry::{
        ArtifactCatalog, ArtifactType, Scope, ScopeKind, StageDefinition, StageManifest,
        StageRegistry,
    };
    pub use crate::scheduler::{ExecutionPlan, RunReport, Scheduler, SchedulerConfig};
}
