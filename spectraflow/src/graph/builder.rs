//! Expands stage templates over the parameter domain into an instance graph.

use super::model::{
    unresolvable_closure, BoundArtifact, BoundSlot, DependencyEdge, InstanceGraph, InstanceId,
    Producer, Resolution, SlotBinding, StageInstance, UnresolvedReason,
};
use crate::core::{resolve, Artifact, ArtifactKey, Bindings};
use crate::domain::ParameterDomain;
use crate::errors::{GraphError, SpectraflowError};
use crate::registry::{InputSlot, ScopeKind, StageRegistry};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

const ROOT_CLAIMANT: &str = "<root>";

/// Builds an [`InstanceGraph`] from a registry and a frozen domain.
#[derive(Debug, Clone, Copy)]
pub struct GraphBuilder<'a> {
    registry: &'a StageRegistry,
    domain: &'a ParameterDomain,
}

/// Every claimed artifact, indexed by identity and by type.
#[derive(Debug, Default)]
struct ArtifactIndex {
    claims: HashMap<ArtifactKey, BoundArtifact>,
    by_type: HashMap<String, Vec<ArtifactKey>>,
}

impl ArtifactIndex {
    fn claim(
        &mut self,
        artifact: &Artifact,
        producer: Producer,
        claimant_key: impl Fn(Producer) -> String,
    ) -> Result<(), GraphError> {
        let key = artifact.key();
        if let Some(existing) = self.claims.get(&key) {
            return Err(GraphError::DuplicateArtifactClaim {
                artifact: artifact.relative_path.clone(),
                claimants: vec![claimant_key(existing.producer), claimant_key(producer)],
            });
        }
        self.by_type
            .entry(artifact.artifact_type.clone())
            .or_default()
            .push(key.clone());
        self.claims.insert(
            key,
            BoundArtifact {
                artifact: artifact.clone(),
                producer,
            },
        );
        Ok(())
    }

    fn of_type(&self, artifact_type: &str) -> impl Iterator<Item = &BoundArtifact> {
        self.by_type
            .get(artifact_type)
            .into_iter()
            .flatten()
            .filter_map(|key| self.claims.get(key))
    }
}

impl<'a> GraphBuilder<'a> {
    /// Creates a builder.
    #[must_use]
    pub fn new(registry: &'a StageRegistry, domain: &'a ParameterDomain) -> Self {
        Self { registry, domain }
    }

    /// Expands, binds and indexes the instance graph.
    ///
    /// Required slots that cannot be bound leave their instance
    /// unresolvable, and unresolvability spreads along required edges. Both
    /// are recorded on the instances and are not errors.
    ///
    /// # Errors
    ///
    /// - [`GraphError::DuplicateArtifactClaim`] if two instances (or an
    ///   instance and a root artifact) claim the same artifact
    /// - [`GraphError::AmbiguousProducer`] if a single-valued slot matches
    ///   more than one artifact
    pub fn build(&self) -> Result<InstanceGraph, SpectraflowError> {
        let roots = self.root_artifacts()?;
        let mut instances = self.expand()?;

        let mut index = ArtifactIndex::default();
        let claimant = |producer: Producer| match producer {
            Producer::Root => ROOT_CLAIMANT.to_string(),
            Producer::Instance(id) => instances
                .get(id.0)
                .map_or_else(|| id.to_string(), StageInstance::key),
        };
        for artifact in &roots {
            index.claim(artifact, Producer::Root, &claimant)?;
        }
        for instance in &instances {
            for artifact in instance.outputs.values() {
                index.claim(artifact, Producer::Instance(instance.id), &claimant)?;
            }
        }

        let mut edges = Vec::new();
        for instance in &mut instances {
            let definition = self.registry.get(&instance.stage);
            let slots: Vec<InputSlot> = definition.map(|d| d.inputs.clone()).unwrap_or_default();
            let mut reasons = Vec::new();
            for slot in slots {
                let (binding, reason) = self.bind_slot(&index, instance, &slot)?;
                for bound in binding.artifacts() {
                    if let Producer::Instance(producer) = bound.producer {
                        edges.push(DependencyEdge {
                            producer,
                            consumer: instance.id,
                            slot: slot.slot.clone(),
                            artifact: bound.artifact.clone(),
                            kind: slot.edge_kind(),
                        });
                    }
                }
                reasons.extend(reason);
                instance.inputs.push(BoundSlot { slot, binding });
            }
            if !reasons.is_empty() {
                debug!(instance = %instance.key(), reasons = ?reasons, "Instance is unresolvable");
                instance.resolution = Resolution::Unresolvable(reasons);
            }
        }

        let seeds = instances
            .iter()
            .filter(|i| !i.resolution.is_resolvable())
            .map(|i| (i.id, i.resolution.reasons().to_vec()))
            .collect();
        for (id, reasons) in unresolvable_closure(&instances, &edges, seeds) {
            if let Some(instance) = instances.get_mut(id.0) {
                if instance.resolution.is_resolvable() {
                    debug!(instance = %instance.key(), reasons = ?reasons, "Unresolvable through producer");
                    instance.resolution = Resolution::Unresolvable(reasons);
                }
            }
        }

        let unresolvable = instances
            .iter()
            .filter(|i| !i.resolution.is_resolvable())
            .count();
        info!(
            instances = instances.len(),
            edges = edges.len(),
            roots = roots.len(),
            unresolvable,
            "Built instance graph"
        );
        Ok(InstanceGraph::new(instances, edges, roots))
    }

    /// Enumerates every root artifact across the domain.
    fn root_artifacts(&self) -> Result<Vec<Artifact>, SpectraflowError> {
        let mut roots = Vec::new();
        for artifact_type in self.registry.catalog().roots() {
            let kinds = scope_kinds(artifact_type.template.placeholders());
            for bindings in self.domain.expand(&kinds, &Bindings::new()) {
                roots.push(resolve(&artifact_type.name, &artifact_type.template, &bindings)?);
            }
        }
        Ok(roots)
    }

    /// Creates one instance per scope combination, with outputs resolved.
    fn expand(&self) -> Result<Vec<StageInstance>, SpectraflowError> {
        let catalog = self.registry.catalog();
        let mut instances = Vec::new();
        for definition in self.registry.list_stages() {
            let combos = self.domain.expand(definition.scope.kinds(), &Bindings::new());
            debug!(stage = %definition.name, count = combos.len(), "Expanded stage");
            for bindings in combos {
                let mut outputs = BTreeMap::new();
                for output in &definition.outputs {
                    if let Some(artifact_type) = catalog.get(&output.artifact_type) {
                        let artifact =
                            resolve(&artifact_type.name, &artifact_type.template, &bindings)?;
                        outputs.insert(output.slot.clone(), artifact);
                    }
                }
                instances.push(StageInstance {
                    id: InstanceId(instances.len()),
                    stage: definition.name.clone(),
                    contract: definition.contract.clone(),
                    bindings,
                    inputs: Vec::new(),
                    outputs,
                    resolution: Resolution::Resolvable,
                });
            }
        }
        Ok(instances)
    }

    fn bind_slot(
        &self,
        index: &ArtifactIndex,
        consumer: &StageInstance,
        slot: &InputSlot,
    ) -> Result<(SlotBinding, Option<UnresolvedReason>), GraphError> {
        if slot.collection {
            return Ok(self.bind_collection(index, consumer, slot));
        }

        let candidates: Vec<&BoundArtifact> = index
            .of_type(&slot.artifact_type)
            .filter(|bound| bound.producer != Producer::Instance(consumer.id))
            .filter(|bound| self.compatible(&consumer.bindings, &bound.artifact.bindings))
            .collect();

        match candidates.as_slice() {
            [] if slot.required => Ok((
                SlotBinding::Unbound,
                Some(UnresolvedReason::MissingProducer {
                    slot: slot.slot.clone(),
                    artifact_type: slot.artifact_type.clone(),
                }),
            )),
            [] => Ok((SlotBinding::Absent, None)),
            [only] => Ok((SlotBinding::Single((*only).clone()), None)),
            many => Err(GraphError::AmbiguousProducer {
                consumer: consumer.key(),
                slot: slot.slot.clone(),
                producers: many.iter().map(|b| b.artifact.relative_path.clone()).collect(),
            }),
        }
    }

    /// Binds every artifact expected for the consumer's scope, in domain
    /// order. A required collection must be complete.
    fn bind_collection(
        &self,
        index: &ArtifactIndex,
        consumer: &StageInstance,
        slot: &InputSlot,
    ) -> (SlotBinding, Option<UnresolvedReason>) {
        let missing_producer = || UnresolvedReason::MissingProducer {
            slot: slot.slot.clone(),
            artifact_type: slot.artifact_type.clone(),
        };
        let Some(artifact_type) = self.registry.catalog().get(&slot.artifact_type) else {
            return if slot.required {
                (SlotBinding::Unbound, Some(missing_producer()))
            } else {
                (SlotBinding::Absent, None)
            };
        };

        let template = &artifact_type.template;
        let wildcards: Vec<String> = template
            .placeholders()
            .iter()
            .filter(|p| !consumer.bindings.contains(p))
            .cloned()
            .collect();

        let mut found = Vec::new();
        let mut missing = Vec::new();
        for bindings in self.domain.expand(&scope_kinds(&wildcards), &consumer.bindings) {
            let key = ArtifactKey {
                template: template.as_str().to_string(),
                bindings: bindings.project(template.placeholders()),
            };
            match index.claims.get(&key) {
                Some(bound)
                    if bound.artifact.artifact_type == slot.artifact_type
                        && bound.producer != Producer::Instance(consumer.id) =>
                {
                    found.push(bound.clone());
                }
                _ => missing.push(
                    template
                        .render(&bindings)
                        .unwrap_or_else(|_| template.as_str().to_string()),
                ),
            }
        }

        if !slot.required {
            return if found.is_empty() {
                (SlotBinding::Absent, None)
            } else {
                (SlotBinding::Collection(found), None)
            };
        }
        if found.is_empty() {
            return (SlotBinding::Unbound, Some(missing_producer()));
        }
        if !missing.is_empty() {
            return (
                SlotBinding::Unbound,
                Some(UnresolvedReason::PartialCollection {
                    slot: slot.slot.clone(),
                    artifact_type: slot.artifact_type.clone(),
                    missing,
                }),
            );
        }
        (SlotBinding::Collection(found), None)
    }

    /// Shared placeholders must agree; placeholders only the producer binds
    /// are wildcards, but a wildcard name must belong to the consumer's tag
    /// or group and vice versa.
    fn compatible(&self, consumer: &Bindings, produced: &Bindings) -> bool {
        let mut merged = consumer.clone();
        for (placeholder, value) in produced.iter() {
            match consumer.get(placeholder) {
                Some(bound) if bound != value => return false,
                Some(_) => {}
                None => merged.insert(placeholder, value),
            }
        }
        self.domain.is_consistent(&merged)
    }
}

fn scope_kinds(placeholders: &[String]) -> Vec<ScopeKind> {
    placeholders
        .iter()
        .filter_map(|p| ScopeKind::from_placeholder(p))
        .collect()
}
