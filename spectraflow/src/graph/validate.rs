//! Graph validation: acyclicity, completeness and claim uniqueness.
//!
//! The validator is a pure function of the graph. Running it twice on the
//! same graph yields the same report.

use super::model::{
    unresolvable_closure, DependencyEdge, InstanceGraph, InstanceId, SlotBinding, StageInstance,
    UnresolvedReason,
};
use crate::core::ArtifactKey;
use crate::errors::{CycleDetectedError, CycleLink, GraphError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, warn};

/// A non-fatal finding about one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Instance id.
    pub instance: InstanceId,
    /// Instance key.
    pub key: String,
    /// Why it cannot run.
    pub reasons: Vec<UnresolvedReason>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reasons: Vec<String> = self.reasons.iter().map(ToString::to_string).collect();
        write!(f, "{} is unresolvable: {}", self.key, reasons.join("; "))
    }
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// One entry per unresolvable instance, in id order.
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    /// Instances excluded from scheduling.
    #[must_use]
    pub fn excluded(&self) -> BTreeSet<InstanceId> {
        self.diagnostics.iter().map(|d| d.instance).collect()
    }

    /// Returns true if every instance can be scheduled.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Validates instance graphs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    /// Runs every check in order.
    ///
    /// 1. The graph, over required and optional edges, has no cycle.
    /// 2. Every required slot is bound or its instance is excluded, along
    ///    with everything that requires it.
    /// 3. No artifact is claimed twice.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CycleDetected`] or
    /// [`GraphError::DuplicateArtifactClaim`].
    pub fn validate(graph: &InstanceGraph) -> Result<ValidationReport, GraphError> {
        if let Some(cycle) = find_cycle(graph) {
            warn!(cycle = %cycle, "Instance graph has a cycle");
            return Err(cycle.into());
        }

        let report = ValidationReport {
            diagnostics: Self::unresolvable(graph),
        };

        Self::check_claims(graph)?;

        debug!(
            instances = graph.len(),
            excluded = report.diagnostics.len(),
            "Validated instance graph"
        );
        Ok(report)
    }

    fn unresolvable(graph: &InstanceGraph) -> Vec<Diagnostic> {
        let mut seeds = BTreeMap::new();
        for instance in graph.instances() {
            let mut reasons = instance.resolution.reasons().to_vec();
            if reasons.is_empty() {
                reasons.extend(
                    instance
                        .inputs
                        .iter()
                        .filter(|s| s.slot.required && s.binding == SlotBinding::Unbound)
                        .map(|s| UnresolvedReason::MissingProducer {
                            slot: s.slot.slot.clone(),
                            artifact_type: s.slot.artifact_type.clone(),
                        }),
                );
            }
            if !reasons.is_empty() {
                seeds.insert(instance.id, reasons);
            }
        }

        unresolvable_closure(graph.instances(), graph.edges(), seeds)
            .into_iter()
            .map(|(id, reasons)| Diagnostic {
                instance: id,
                key: graph
                    .instance(id)
                    .map_or_else(|| id.to_string(), StageInstance::key),
                reasons,
            })
            .collect()
    }

    fn check_claims(graph: &InstanceGraph) -> Result<(), GraphError> {
        let mut claims: HashMap<ArtifactKey, String> = HashMap::new();
        let roots = graph
            .root_artifacts()
            .iter()
            .map(|a| (a, "<root>".to_string()));
        let outputs = graph
            .instances()
            .iter()
            .flat_map(|i| i.outputs.values().map(move |a| (a, i.key())));
        for (artifact, claimant) in roots.chain(outputs) {
            if let Some(existing) = claims.insert(artifact.key(), claimant.clone()) {
                return Err(GraphError::DuplicateArtifactClaim {
                    artifact: artifact.relative_path.clone(),
                    claimants: vec![existing, claimant],
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Unvisited,
    Visiting,
    Visited,
}

/// Finds a cycle over all edges using depth-first search with
/// visiting/visited colors.
///
/// The returned error carries the full producer, artifact, consumer chain.
#[must_use]
pub fn find_cycle(graph: &InstanceGraph) -> Option<CycleDetectedError> {
    let mut colors = vec![Color::Unvisited; graph.len()];
    let mut path = Vec::new();
    for instance in graph.instances() {
        if colors[instance.id.0] == Color::Unvisited {
            if let Some(links) = visit(graph, instance.id, &mut colors, &mut path) {
                return Some(CycleDetectedError::new(links));
            }
        }
    }
    None
}

fn visit<'g>(
    graph: &'g InstanceGraph,
    node: InstanceId,
    colors: &mut [Color],
    path: &mut Vec<&'g DependencyEdge>,
) -> Option<Vec<CycleLink>> {
    colors[node.0] = Color::Visiting;
    for edge in graph.outgoing(node) {
        match colors[edge.consumer.0] {
            Color::Visiting => {
                let start = path
                    .iter()
                    .position(|e| e.producer == edge.consumer)
                    .unwrap_or(path.len());
                return Some(
                    path[start..]
                        .iter()
                        .copied()
                        .chain(std::iter::once(edge))
                        .map(|e| link(graph, e))
                        .collect(),
                );
            }
            Color::Unvisited => {
                path.push(edge);
                if let Some(links) = visit(graph, edge.consumer, colors, path) {
                    return Some(links);
                }
                path.pop();
            }
            Color::Visited => {}
        }
    }
    colors[node.0] = Color::Visited;
    None
}

fn link(graph: &InstanceGraph, edge: &DependencyEdge) -> CycleLink {
    let key = |id: InstanceId| graph.instance(id).map_or_else(|| id.to_string(), StageInstance::key);
    CycleLink {
        producer: key(edge.producer),
        artifact: edge.artifact.relative_path.clone(),
        consumer: key(edge.consumer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{resolve, Artifact, ArtifactTemplate, Bindings};
    use crate::domain::ParameterDomain;
    use crate::graph::{GraphBuilder, Resolution};
    use crate::registry::{ArtifactCatalog, ArtifactType, Scope, StageDefinition, StageRegistry};
    use pretty_assertions::assert_eq;

    fn catalog() -> ArtifactCatalog {
        ArtifactCatalog::new()
            .with(ArtifactType::root("raw-exposure", "raw/{name}.fits").unwrap())
            .with(ArtifactType::new("a", "a/{name}.p").unwrap())
            .with(ArtifactType::new("b", "b/{name}.p").unwrap())
            .with(ArtifactType::new("flat", "flat/{name}.p").unwrap())
    }

    #[test]
    fn test_mutual_requirement_is_a_cycle() {
        let registry = StageRegistry::new(catalog())
            .stage(
                StageDefinition::new("left")
                    .with_scope(Scope::per_name())
                    .input("b", "b")
                    .output("a", "a"),
            )
            .unwrap()
            .stage(
                StageDefinition::new("right")
                    .with_scope(Scope::per_name())
                    .input("a", "a")
                    .output("b", "b"),
            )
            .unwrap();
        let domain = ParameterDomain::new(["e1"]);
        let graph = GraphBuilder::new(&registry, &domain).build().unwrap();

        let err = Validator::validate(&graph).unwrap_err();
        let GraphError::CycleDetected(cycle) = err else {
            panic!("expected a cycle, got {err:?}");
        };
        assert_eq!(
            cycle.to_string(),
            "Cycle detected in instance graph: \
             left[name=e1] -[a/e1.p]-> right[name=e1] -[b/e1.p]-> left[name=e1]"
        );
        assert!(find_cycle(&graph).is_some());
    }

    #[test]
    fn test_unresolvable_instances_are_diagnostics_not_errors() {
        let registry = StageRegistry::new(catalog())
            .stage(
                StageDefinition::new("calibrate")
                    .with_scope(Scope::per_name())
                    .input("flat", "flat")
                    .output("a", "a"),
            )
            .unwrap()
            .stage(
                StageDefinition::new("use")
                    .with_scope(Scope::per_name())
                    .input("a", "a")
                    .output("b", "b"),
            )
            .unwrap();
        let domain = ParameterDomain::new(["e1"]);
        let graph = GraphBuilder::new(&registry, &domain).build().unwrap();

        let report = Validator::validate(&graph).unwrap();
        let keys: Vec<&str> = report.diagnostics.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, ["calibrate[name=e1]", "use[name=e1]"]);
        assert_eq!(
            report.diagnostics[1].to_string(),
            "use[name=e1] is unresolvable: slot 'a' depends on unresolvable 'calibrate[name=e1]'"
        );
        assert_eq!(report.excluded().len(), 2);
    }

    #[test]
    fn test_validation_is_idempotent() {
        let registry = StageRegistry::new(catalog())
            .stage(
                StageDefinition::new("calibrate")
                    .with_scope(Scope::per_name())
                    .input("flat", "flat")
                    .output("a", "a"),
            )
            .unwrap();
        let domain = ParameterDomain::new(["e1", "e2"]);
        let graph = GraphBuilder::new(&registry, &domain).build().unwrap();

        let first = Validator::validate(&graph).unwrap();
        let second = Validator::validate(&graph).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_clean_graph() {
        let registry = StageRegistry::new(catalog())
            .stage(
                StageDefinition::new("import")
                    .with_scope(Scope::per_name())
                    .input("raw", "raw-exposure")
                    .output("a", "a"),
            )
            .unwrap();
        let domain = ParameterDomain::new(["e1"]);
        let graph = GraphBuilder::new(&registry, &domain).build().unwrap();

        assert!(Validator::validate(&graph).unwrap().is_clean());
    }

    #[test]
    fn test_empty_graph_is_valid() {
        let graph = InstanceGraph::default();
        assert!(Validator::validate(&graph).unwrap().is_clean());
    }

    fn named(template: &str, name: &str) -> Artifact {
        let template = ArtifactTemplate::parse(template).unwrap();
        resolve("a", &template, &Bindings::new().with("name", name)).unwrap()
    }

    fn producing(id: usize, stage: &str, output: Artifact) -> StageInstance {
        StageInstance {
            id: InstanceId(id),
            stage: stage.to_string(),
            contract: stage.to_string(),
            bindings: output.bindings.clone(),
            inputs: Vec::new(),
            outputs: BTreeMap::from([("out".to_string(), output)]),
            resolution: Resolution::Resolvable,
        }
    }

    #[test]
    fn test_two_instances_claiming_one_artifact() {
        let graph = InstanceGraph::new(
            vec![
                producing(0, "reinterpolate", named("a/{name}.p", "e1")),
                producing(1, "resample", named("a/{name}.p", "e1")),
            ],
            Vec::new(),
            Vec::new(),
        );

        let err = Validator::validate(&graph).unwrap_err();
        let GraphError::DuplicateArtifactClaim { artifact, claimants } = err else {
            panic!("expected a duplicate claim, got {err:?}");
        };
        assert_eq!(artifact, "a/e1.p");
        assert_eq!(claimants, ["reinterpolate[name=e1]", "resample[name=e1]"]);
    }

    #[test]
    fn test_output_colliding_with_root_artifact() {
        let graph = InstanceGraph::new(
            vec![producing(0, "import", named("raw/{name}.fits", "e1"))],
            Vec::new(),
            vec![named("raw/{name}.fits", "e1")],
        );

        let err = Validator::validate(&graph).unwrap_err();
        let GraphError::DuplicateArtifactClaim { artifact, claimants } = err else {
            panic!("expected a duplicate claim, got {err:?}");
        };
        assert_eq!(artifact, "raw/e1.fits");
        assert_eq!(claimants, ["<root>", "import[name=e1]"]);
    }

    #[test]
    fn test_distinct_bindings_are_distinct_claims() {
        let graph = InstanceGraph::new(
            vec![
                producing(0, "reinterpolate", named("a/{name}.p", "e1")),
                producing(1, "reinterpolate", named("a/{name}.p", "e2")),
            ],
            Vec::new(),
            Vec::new(),
        );
        assert!(Validator::validate(&graph).unwrap().is_clean());
    }
}
