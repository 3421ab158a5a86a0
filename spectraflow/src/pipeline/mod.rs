//! Pipeline facade.
//!
//! A [`Pipeline`] ties a stage registry to scheduler settings. Preparing a
//! run builds, validates and plans the instance graph; every fatal error
//! surfaces there, before any instance executes.

mod integration_tests;

use crate::context::RunContext;
use crate::domain::{self, DomainProbe, ParameterDomain};
use crate::errors::SpectraflowError;
use crate::executor::ExecutorAdapter;
use crate::graph::{Diagnostic, GraphBuilder, InstanceGraph, ValidationReport, Validator};
use crate::observability::SpanTimer;
use crate::registry::StageRegistry;
use crate::scheduler::{ExecutionPlan, RunReport, Scheduler, SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// A registry plus scheduler settings.
#[derive(Debug, Clone)]
pub struct Pipeline {
    registry: Arc<StageRegistry>,
    config: SchedulerConfig,
}

impl Pipeline {
    /// Creates a pipeline with default scheduler settings.
    #[must_use]
    pub fn new(registry: StageRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            config: SchedulerConfig::default(),
        }
    }

    /// Sets the scheduler settings.
    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// The stage registry.
    #[must_use]
    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// The scheduler settings.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Discovers the parameter domain for this pipeline's stages.
    ///
    /// # Errors
    ///
    /// See [`domain::discover`].
    pub fn discover(&self, probe: &dyn DomainProbe) -> Result<ParameterDomain, SpectraflowError> {
        domain::discover(probe, &self.registry)
    }

    /// Builds, validates and plans the instance graph for the context's
    /// domain.
    ///
    /// Unresolvable instances are not an error: they are reported in the
    /// validation report and excluded from the plan.
    ///
    /// # Errors
    ///
    /// Returns configuration errors from expansion, and ambiguity, cycle or
    /// duplicate-claim errors from graph construction and validation.
    pub fn prepare(&self, ctx: &RunContext) -> Result<PreparedRun, SpectraflowError> {
        let timer = SpanTimer::start("pipeline.prepare");
        let graph = GraphBuilder::new(&self.registry, ctx.domain()).build()?;
        let validation = Validator::validate(&graph)?;
        for diagnostic in &validation.diagnostics {
            warn!(run_id = %ctx.run_id(), "{diagnostic}");
        }
        let plan = ExecutionPlan::compute(&graph, &validation, &self.config)?;

        info!(
            run_id = %ctx.run_id(),
            instances = graph.len(),
            edges = graph.edges().len(),
            batches = plan.batches().len(),
            excluded = plan.excluded().len(),
            duration_ms = timer.finish(),
            "Prepared run"
        );
        Ok(PreparedRun {
            graph: Arc::new(graph),
            validation,
            plan,
            scheduler: Scheduler::new(self.config),
        })
    }
}

/// A validated, planned graph ready to execute.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    graph: Arc<InstanceGraph>,
    validation: ValidationReport,
    plan: ExecutionPlan,
    scheduler: Scheduler,
}

impl PreparedRun {
    /// The instance graph.
    #[must_use]
    pub fn graph(&self) -> &InstanceGraph {
        &self.graph
    }

    /// The validation report.
    #[must_use]
    pub fn validation(&self) -> &ValidationReport {
        &self.validation
    }

    /// The execution plan.
    #[must_use]
    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Describes the plan by instance key.
    #[must_use]
    pub fn describe(&self) -> PlanDescription {
        let key = |id| {
            self.graph
                .instance(id)
                .map_or_else(|| id.to_string(), crate::graph::StageInstance::key)
        };
        PlanDescription {
            fingerprint: self.graph.fingerprint(),
            instances: self.graph.len(),
            edges: self.graph.edges().len(),
            batches: self
                .plan
                .batches()
                .iter()
                .map(|batch| batch.iter().map(|id| key(*id)).collect())
                .collect(),
            excluded: self.validation.diagnostics.clone(),
        }
    }

    /// Executes the plan.
    pub async fn execute(&self, executor: Arc<dyn ExecutorAdapter>, ctx: &RunContext) -> RunReport {
        self.scheduler
            .run(Arc::clone(&self.graph), &self.plan, executor, ctx)
            .await
    }
}

/// A printable view of a prepared run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDescription {
    /// Graph fingerprint.
    pub fingerprint: String,
    /// Instance count, including excluded instances.
    pub instances: usize,
    /// Dependency edge count.
    pub edges: usize,
    /// Instance keys per batch.
    pub batches: Vec<Vec<String>>,
    /// Excluded instances and why.
    pub excluded: Vec<Diagnostic>,
}
