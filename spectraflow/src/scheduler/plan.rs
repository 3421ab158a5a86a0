//! Batch planning.

use super::SchedulerConfig;
use crate::core::EdgeKind;
use crate::errors::{CycleDetectedError, GraphError};
use crate::graph::{find_cycle, InstanceGraph, InstanceId, UnresolvedReason, ValidationReport};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Resolvable instances grouped into sequential batches.
///
/// Every required producer of an instance sits in a strictly earlier batch.
/// Instances within one batch are mutually independent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    batches: Vec<Vec<InstanceId>>,
    batch_of: BTreeMap<InstanceId, usize>,
    excluded: BTreeMap<InstanceId, Vec<UnresolvedReason>>,
}

impl ExecutionPlan {
    /// Computes batches with Kahn's algorithm, one level at a time.
    ///
    /// Instances listed in the validation report are left out and recorded
    /// as excluded. With soft ordering, optional edges between resolvable
    /// instances also order batches.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CycleDetected`] if the ordering edges contain a
    /// cycle.
    pub fn compute(
        graph: &InstanceGraph,
        validation: &ValidationReport,
        config: &SchedulerConfig,
    ) -> Result<Self, GraphError> {
        let excluded: BTreeMap<InstanceId, Vec<UnresolvedReason>> = validation
            .diagnostics
            .iter()
            .map(|d| (d.instance, d.reasons.clone()))
            .collect();
        let included: Vec<InstanceId> = graph
            .instances()
            .iter()
            .map(|i| i.id)
            .filter(|id| !excluded.contains_key(id))
            .collect();

        let ordering: BTreeSet<(InstanceId, InstanceId)> = graph
            .edges()
            .iter()
            .filter(|e| e.kind == EdgeKind::Required || config.soft_ordering)
            .filter(|e| e.producer != e.consumer)
            .filter(|e| !excluded.contains_key(&e.producer) && !excluded.contains_key(&e.consumer))
            .map(|e| (e.producer, e.consumer))
            .collect();

        let mut in_degree: BTreeMap<InstanceId, usize> = included.iter().map(|&id| (id, 0)).collect();
        let mut successors: BTreeMap<InstanceId, Vec<InstanceId>> = BTreeMap::new();
        for &(producer, consumer) in &ordering {
            *in_degree.entry(consumer).or_default() += 1;
            successors.entry(producer).or_default().push(consumer);
        }

        let mut batches = Vec::new();
        let mut batch_of = BTreeMap::new();
        let mut current: Vec<InstanceId> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();

        while !current.is_empty() {
            let mut next = Vec::new();
            for id in &current {
                batch_of.insert(*id, batches.len());
                for consumer in successors.get(id).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(consumer) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(*consumer);
                        }
                    }
                }
            }
            next.sort_unstable();
            batches.push(std::mem::replace(&mut current, next));
        }

        if batch_of.len() < included.len() {
            let cycle = find_cycle(graph).unwrap_or_else(|| CycleDetectedError::new(Vec::new()));
            return Err(cycle.into());
        }

        debug!(
            batches = batches.len(),
            scheduled = batch_of.len(),
            excluded = excluded.len(),
            "Computed execution plan"
        );
        Ok(Self {
            batches,
            batch_of,
            excluded,
        })
    }

    /// The batches, in execution order.
    #[must_use]
    pub fn batches(&self) -> &[Vec<InstanceId>] {
        &self.batches
    }

    /// The batch an instance is scheduled in.
    #[must_use]
    pub fn batch_of(&self, id: InstanceId) -> Option<usize> {
        self.batch_of.get(&id).copied()
    }

    /// Instances left out of the plan, with their reasons.
    #[must_use]
    pub fn excluded(&self) -> &BTreeMap<InstanceId, Vec<UnresolvedReason>> {
        &self.excluded
    }

    /// Number of scheduled instances.
    #[must_use]
    pub fn scheduled(&self) -> usize {
        self.batch_of.len()
    }

    /// Returns true if nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch_of.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, Validator};
    use crate::registry::{ArtifactCatalog, ArtifactType, Scope, StageDefinition, StageRegistry};
    use crate::testing::{spectral_domain, spectral_registry};
    use pretty_assertions::assert_eq;

    fn plan(soft_ordering: bool) -> (InstanceGraph, ExecutionPlan) {
        let registry = spectral_registry().unwrap();
        let domain = spectral_domain();
        let graph = GraphBuilder::new(&registry, &domain).build().unwrap();
        let report = Validator::validate(&graph).unwrap();
        let config = SchedulerConfig::new().with_soft_ordering(soft_ordering);
        let plan = ExecutionPlan::compute(&graph, &report, &config).unwrap();
        (graph, plan)
    }

    fn batch(graph: &InstanceGraph, plan: &ExecutionPlan, key: &str) -> usize {
        plan.batch_of(graph.find(key).unwrap().id).unwrap()
    }

    #[test]
    fn test_required_edges_cross_batches() {
        let (graph, plan) = plan(true);

        assert_eq!(plan.scheduled(), graph.len());
        for edge in graph.edges() {
            assert!(
                plan.batch_of(edge.producer) < plan.batch_of(edge.consumer),
                "{} before {}",
                edge.producer,
                edge.consumer
            );
        }
        assert_eq!(batch(&graph, &plan, "ingest"), 0);
        assert_eq!(batch(&graph, &plan, "reinterpolate[name=e2]"), 1);
        assert_eq!(batch(&graph, &plan, "stack[tag=T1]"), 2);
        assert_eq!(batch(&graph, &plan, "rassine-master[tag=T2]"), 3);
        assert_eq!(batch(&graph, &plan, "rassine-spectrum[name=e3]"), 4);
    }

    #[test]
    fn test_without_soft_ordering_optional_edges_do_not_order() {
        let (graph, plan) = plan(false);

        assert_eq!(batch(&graph, &plan, "rassine-spectrum[name=e1]"), 2);
        assert_eq!(batch(&graph, &plan, "rassine-master[tag=T1]"), 3);
        assert_eq!(plan.batches().len(), 4);
    }

    #[test]
    fn test_batches_hold_independent_instances_in_id_order() {
        let (graph, plan) = plan(true);
        let keys: Vec<String> = plan.batches()[1]
            .iter()
            .map(|id| graph.instance(*id).unwrap().key())
            .collect();
        assert_eq!(
            keys,
            [
                "reinterpolate[name=e1]",
                "reinterpolate[name=e2]",
                "reinterpolate[name=e3]"
            ]
        );
    }

    #[test]
    fn test_unresolvable_instances_are_excluded() {
        let catalog = ArtifactCatalog::new()
            .with(ArtifactType::new("calibration", "calib/{name}.fits").unwrap())
            .with(ArtifactType::new("reduced", "reduced/{name}.p").unwrap());
        let registry = StageRegistry::new(catalog)
            .stage(
                StageDefinition::new("reduce")
                    .with_scope(Scope::per_name())
                    .input("calibration", "calibration")
                    .output("reduced", "reduced"),
            )
            .unwrap();
        let domain = spectral_domain();
        let graph = GraphBuilder::new(&registry, &domain).build().unwrap();
        let report = Validator::validate(&graph).unwrap();
        let plan = ExecutionPlan::compute(&graph, &report, &SchedulerConfig::new()).unwrap();

        assert!(plan.is_empty());
        assert!(plan.batches().is_empty());
        assert_eq!(plan.excluded().len(), 3);
    }
}
