//! Batch execution engine.
//!
//! Batches run strictly one after another. Inside a batch, every eligible
//! instance is spawned at once and a semaphore bounds how many are inside the
//! executor at the same time.

use super::plan::ExecutionPlan;
use super::report::{InstanceOutcome, RunReport, SkipCause};
use crate::config::default_max_parallel;
use crate::context::RunContext;
use crate::core::{Artifact, InstanceStatus};
use crate::errors::InstanceFailure;
use crate::events;
use crate::executor::{ExecutionOutcome, ExecutorAdapter, Invocation, OutcomeStatus};
use crate::graph::{InstanceGraph, InstanceId, Producer, StageInstance};
use crate::observability::SpanTimer;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on instances inside the executor at once.
    pub max_parallel: usize,
    /// Honor optional edges as ordering hints when planning.
    pub soft_ordering: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            soft_ordering: true,
        }
    }
}

impl SchedulerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the parallelism bound. Zero is treated as one.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Enables or disables soft ordering.
    #[must_use]
    pub fn with_soft_ordering(mut self, soft_ordering: bool) -> Self {
        self.soft_ordering = soft_ordering;
        self
    }
}

#[derive(Debug, Clone, Default)]
struct Record {
    status: InstanceStatus,
    failure: Option<InstanceFailure>,
    skip_cause: Option<SkipCause>,
    missing_optional: Vec<String>,
    produced: Vec<Artifact>,
    duration_ms: u64,
}

/// Per-instance records, shared with the spawned tasks.
#[derive(Debug)]
struct StatusTable {
    records: Mutex<Vec<Record>>,
}

impl StatusTable {
    fn new(len: usize) -> Self {
        Self {
            records: Mutex::new(vec![Record::default(); len]),
        }
    }

    fn status(&self, id: InstanceId) -> InstanceStatus {
        self.records
            .lock()
            .get(id.0)
            .map_or(InstanceStatus::Pending, |r| r.status)
    }

    /// Applies a transition if the state machine allows it.
    fn transition(&self, id: InstanceId, next: InstanceStatus) -> bool {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(id.0) else {
            return false;
        };
        if !record.status.can_transition_to(next) {
            error!(instance = %id, from = %record.status, to = %next, "Rejected status transition");
            return false;
        }
        record.status = next;
        true
    }

    fn skip(&self, id: InstanceId, cause: SkipCause) -> bool {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(id.0) else {
            return false;
        };
        if !record.status.can_transition_to(InstanceStatus::Skipped) {
            return false;
        }
        record.status = InstanceStatus::Skipped;
        record.skip_cause = Some(cause);
        true
    }

    fn update(&self, id: InstanceId, apply: impl FnOnce(&mut Record)) {
        if let Some(record) = self.records.lock().get_mut(id.0) {
            apply(record);
        }
    }

    fn snapshot(&self) -> Vec<Record> {
        self.records.lock().clone()
    }
}

/// Executes an [`ExecutionPlan`] through an [`ExecutorAdapter`].
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Runs every batch of the plan and reports the final state of every
    /// instance in the graph.
    ///
    /// An instance runs only if all of its required producers succeeded.
    /// Optional inputs whose producer did not succeed are passed to the
    /// executor as missing. Cancellation is checked before each batch; once
    /// observed, every instance that has not finished is skipped.
    pub async fn run(
        &self,
        graph: Arc<InstanceGraph>,
        plan: &ExecutionPlan,
        executor: Arc<dyn ExecutorAdapter>,
        ctx: &RunContext,
    ) -> RunReport {
        let started_at = Utc::now();
        let timer = SpanTimer::start("scheduler.run");
        let table = Arc::new(StatusTable::new(graph.len()));
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));

        info!(
            run_id = %ctx.run_id(),
            instances = graph.len(),
            batches = plan.batches().len(),
            max_parallel = self.config.max_parallel,
            "Starting run"
        );
        ctx.emit(
            events::RUN_STARTED,
            json!({
                "instances": graph.len(),
                "batches": plan.batches().len(),
                "excluded": plan.excluded().len(),
            }),
        );

        for (id, reasons) in plan.excluded() {
            let key = key_of(&graph, *id);
            let cause = SkipCause::Unresolvable {
                reasons: reasons.clone(),
            };
            let reason = cause.to_string();
            table.update(*id, |record| {
                record.failure = Some(InstanceFailure::Unresolvable {
                    instance: key.clone(),
                    reason,
                });
            });
            skip(ctx, &table, *id, &key, cause);
        }

        for (index, batch) in plan.batches().iter().enumerate() {
            if ctx.cancellation().is_cancelled() {
                break;
            }
            debug!(batch = index, instances = batch.len(), "Starting batch");
            ctx.emit(
                events::BATCH_STARTED,
                json!({"batch": index, "instances": batch.len()}),
            );

            let mut running = FuturesUnordered::new();
            for &id in batch {
                let Some(instance) = graph.instance(id) else {
                    continue;
                };
                if let Some(cause) = blocking_producer(&graph, &table, id) {
                    skip(ctx, &table, id, &instance.key(), cause);
                    continue;
                }
                let invocation = build_invocation(ctx, &table, instance);
                let missing = invocation.missing_optional.clone();
                table.update(id, |record| record.missing_optional = missing);
                if !table.transition(id, InstanceStatus::Ready) {
                    continue;
                }
                let handle = spawn_instance(
                    invocation,
                    index,
                    Arc::clone(&executor),
                    Arc::clone(&semaphore),
                    Arc::clone(&table),
                    ctx.clone(),
                );
                running.push(async move { (id, handle.await) });
            }

            while let Some((id, joined)) = running.next().await {
                match joined {
                    Ok((invocation, outcome, duration_ms)) => {
                        settle(ctx, &table, &invocation, &outcome, duration_ms);
                    }
                    Err(join_error) => {
                        let key = key_of(&graph, id);
                        error!(instance = %key, error = %join_error, "Instance task aborted");
                        if table.status(id) == InstanceStatus::Ready {
                            table.transition(id, InstanceStatus::Running);
                        }
                        fail(ctx, &table, id, &key, format!("task aborted: {join_error}"));
                    }
                }
            }
        }

        let cancelled = ctx
            .cancellation()
            .is_cancelled()
            .then(|| ctx.cancellation().reason().unwrap_or_default());
        if let Some(reason) = &cancelled {
            for instance in graph.instances() {
                if !table.status(instance.id).is_terminal() {
                    let cause = SkipCause::Cancelled {
                        reason: reason.clone(),
                    };
                    skip(ctx, &table, instance.id, &instance.key(), cause);
                }
            }
            warn!(run_id = %ctx.run_id(), reason = %reason, "Run cancelled");
            ctx.emit(events::RUN_CANCELLED, json!({"reason": reason}));
        }

        let records = table.snapshot();
        let outcomes = graph
            .instances()
            .iter()
            .zip(records)
            .map(|(instance, record)| InstanceOutcome {
                id: instance.id,
                key: instance.key(),
                stage: instance.stage.clone(),
                bindings: instance.bindings.clone(),
                status: record.status,
                batch: plan.batch_of(instance.id),
                failure: record.failure,
                skip_cause: record.skip_cause,
                missing_optional: record.missing_optional,
                produced: record.produced,
                duration_ms: record.duration_ms,
            })
            .collect();

        let report = RunReport {
            run_id: ctx.run_id(),
            fingerprint: graph.fingerprint(),
            started_at,
            finished_at: Utc::now(),
            duration_ms: timer.finish(),
            cancelled,
            outcomes,
        };
        let summary = report.summary();
        info!(
            run_id = %ctx.run_id(),
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            duration_ms = report.duration_ms,
            "Run finished"
        );
        ctx.emit(
            events::RUN_COMPLETED,
            json!({
                "succeeded": summary.succeeded,
                "failed": summary.failed,
                "skipped": summary.skipped,
                "duration_ms": report.duration_ms,
            }),
        );
        report
    }
}

fn key_of(graph: &InstanceGraph, id: InstanceId) -> String {
    graph
        .instance(id)
        .map_or_else(|| id.to_string(), StageInstance::key)
}

fn blocking_producer(
    graph: &InstanceGraph,
    table: &StatusTable,
    id: InstanceId,
) -> Option<SkipCause> {
    graph.required_producers(id).into_iter().find_map(|producer| {
        let status = table.status(producer);
        (status != InstanceStatus::Succeeded).then(|| SkipCause::ProducerDidNotSucceed {
            producer: key_of(graph, producer),
            producer_id: producer,
            status,
        })
    })
}

/// Binds concrete input artifacts. Artifacts from producers that did not
/// succeed are dropped; an optional slot left with nothing is flagged
/// missing.
fn build_invocation(ctx: &RunContext, table: &StatusTable, instance: &StageInstance) -> Invocation {
    let mut inputs = BTreeMap::new();
    let mut missing_optional = Vec::new();
    for bound in &instance.inputs {
        let available: Vec<Artifact> = bound
            .binding
            .artifacts()
            .into_iter()
            .filter(|b| match b.producer {
                Producer::Root => true,
                Producer::Instance(producer) => table.status(producer) == InstanceStatus::Succeeded,
            })
            .map(|b| b.artifact.clone())
            .collect();
        if available.is_empty() && !bound.slot.required {
            missing_optional.push(bound.slot.slot.clone());
        } else {
            inputs.insert(bound.slot.slot.clone(), available);
        }
    }

    Invocation {
        run_id: ctx.run_id(),
        instance: instance.id,
        key: instance.key(),
        stage: instance.stage.clone(),
        contract: instance.contract.clone(),
        bindings: instance.bindings.clone(),
        root: ctx.root().to_path_buf(),
        inputs,
        missing_optional,
        outputs: instance.outputs.clone(),
    }
}

fn spawn_instance(
    invocation: Invocation,
    batch: usize,
    executor: Arc<dyn ExecutorAdapter>,
    semaphore: Arc<Semaphore>,
    table: Arc<StatusTable>,
    ctx: RunContext,
) -> JoinHandle<(Invocation, ExecutionOutcome, u64)> {
    tokio::spawn(async move {
        let _permit = semaphore.acquire_owned().await;
        table.transition(invocation.instance, InstanceStatus::Running);
        debug!(instance = %invocation.key, contract = %invocation.contract, "Running instance");
        ctx.emit(
            events::INSTANCE_STARTED,
            json!({
                "instance": invocation.key,
                "stage": invocation.stage,
                "batch": batch,
                "missing_optional": invocation.missing_optional,
            }),
        );

        let timer = SpanTimer::start(invocation.key.clone());
        let outcome = executor.run(&invocation).await;
        let duration_ms = timer.finish();
        (invocation, outcome, duration_ms)
    })
}

/// Records the executor's verdict. Success requires every declared output.
fn settle(
    ctx: &RunContext,
    table: &StatusTable,
    invocation: &Invocation,
    outcome: &ExecutionOutcome,
    duration_ms: u64,
) {
    let id = invocation.instance;
    let produced: Vec<Artifact> = outcome.produced.iter().cloned().collect();
    table.update(id, |record| {
        record.produced = produced;
        record.duration_ms = duration_ms;
    });

    let missing = outcome.missing_outputs(invocation);
    let failure = match outcome.status {
        OutcomeStatus::Failed => Some(
            outcome
                .message
                .clone()
                .unwrap_or_else(|| "executor reported failure".to_string()),
        ),
        OutcomeStatus::Succeeded if !missing.is_empty() => {
            let paths: Vec<&str> = missing.iter().map(|a| a.relative_path.as_str()).collect();
            Some(format!("missing declared outputs: {}", paths.join(", ")))
        }
        OutcomeStatus::Succeeded => None,
    };

    match failure {
        None => {
            if table.transition(id, InstanceStatus::Succeeded) {
                debug!(instance = %invocation.key, duration_ms, "Instance succeeded");
                ctx.emit(
                    events::INSTANCE_SUCCEEDED,
                    json!({
                        "instance": invocation.key,
                        "duration_ms": duration_ms,
                        "produced": outcome.produced.len(),
                    }),
                );
            }
        }
        Some(message) => fail(ctx, table, id, &invocation.key, message),
    }
}

fn fail(ctx: &RunContext, table: &StatusTable, id: InstanceId, key: &str, message: String) {
    if !table.transition(id, InstanceStatus::Failed) {
        return;
    }
    warn!(instance = %key, error = %message, "Instance failed");
    ctx.emit(
        events::INSTANCE_FAILED,
        json!({"instance": key, "error": message}),
    );
    table.update(id, |record| {
        record.failure = Some(InstanceFailure::StageExecutionFailed {
            instance: key.to_string(),
            message,
        });
    });
}

fn skip(ctx: &RunContext, table: &StatusTable, id: InstanceId, key: &str, cause: SkipCause) {
    let description = cause.to_string();
    if table.skip(id, cause) {
        debug!(instance = %key, cause = %description, "Instance skipped");
        ctx.emit(
            events::INSTANCE_SKIPPED,
            json!({"instance": key, "cause": description}),
        );
    }
}
