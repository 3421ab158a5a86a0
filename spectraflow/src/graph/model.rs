//! Instance graph data model.

use crate::core::{Artifact, Bindings, EdgeKind};
use crate::registry::InputSlot;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Index of an instance within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub usize);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a bound artifact comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Producer {
    /// Present before the run.
    Root,
    /// Output of another instance.
    Instance(InstanceId),
}

/// An artifact bound to an input slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundArtifact {
    /// The artifact.
    pub artifact: Artifact,
    /// Its producer.
    pub producer: Producer,
}

/// What an input slot resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "artifacts", rename_all = "snake_case")]
pub enum SlotBinding {
    /// Exactly one artifact.
    Single(BoundArtifact),
    /// An ordered set of artifacts (collection slots).
    Collection(Vec<BoundArtifact>),
    /// Optional slot with no producer.
    Absent,
    /// Required slot that could not be bound.
    Unbound,
}

impl SlotBinding {
    /// Returns the bound artifacts, in order.
    #[must_use]
    pub fn artifacts(&self) -> Vec<&BoundArtifact> {
        match self {
            Self::Single(bound) => vec![bound],
            Self::Collection(bound) => bound.iter().collect(),
            Self::Absent | Self::Unbound => Vec::new(),
        }
    }
}

/// An input slot together with its binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundSlot {
    /// The declared slot.
    pub slot: InputSlot,
    /// The resolved binding.
    pub binding: SlotBinding,
}

/// Why an instance cannot be scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// No producer exists for a required slot.
    MissingProducer {
        /// Slot name.
        slot: String,
        /// Expected artifact type.
        artifact_type: String,
    },
    /// A required collection is only partially produced.
    PartialCollection {
        /// Slot name.
        slot: String,
        /// Expected artifact type.
        artifact_type: String,
        /// Paths with no producer.
        missing: Vec<String>,
    },
    /// A required producer is itself unresolvable.
    UnresolvableProducer {
        /// Slot name.
        slot: String,
        /// Producer instance key.
        producer: String,
    },
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingProducer { slot, artifact_type } => {
                write!(f, "slot '{slot}' has no producer of '{artifact_type}'")
            }
            Self::PartialCollection {
                slot,
                artifact_type,
                missing,
            } => write!(
                f,
                "slot '{slot}' is missing {} '{artifact_type}' artifact(s): {}",
                missing.len(),
                missing.join(", ")
            ),
            Self::UnresolvableProducer { slot, producer } => {
                write!(f, "slot '{slot}' depends on unresolvable '{producer}'")
            }
        }
    }
}

/// Whether an instance can be scheduled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reasons", rename_all = "snake_case")]
pub enum Resolution {
    /// Every required slot is bound to a resolvable producer.
    #[default]
    Resolvable,
    /// The instance is excluded from scheduling.
    Unresolvable(Vec<UnresolvedReason>),
}

impl Resolution {
    /// Returns true if the instance can be scheduled.
    #[must_use]
    pub fn is_resolvable(&self) -> bool {
        matches!(self, Self::Resolvable)
    }

    /// Returns the reasons, empty when resolvable.
    #[must_use]
    pub fn reasons(&self) -> &[UnresolvedReason] {
        match self {
            Self::Resolvable => &[],
            Self::Unresolvable(reasons) => reasons,
        }
    }
}

/// A stage definition bound to concrete parameter values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInstance {
    /// Index in the graph.
    pub id: InstanceId,
    /// Stage definition name.
    pub stage: String,
    /// Execution contract.
    pub contract: String,
    /// Scope bindings.
    pub bindings: Bindings,
    /// Input slots in declaration order.
    pub inputs: Vec<BoundSlot>,
    /// Output artifacts by slot.
    pub outputs: BTreeMap<String, Artifact>,
    /// Whether the instance can be scheduled.
    pub resolution: Resolution,
}

impl StageInstance {
    /// Returns the display key, e.g. `reinterpolate[name=e1]`.
    #[must_use]
    pub fn key(&self) -> String {
        instance_key(&self.stage, &self.bindings)
    }

    /// Returns the bound slot with the given name.
    #[must_use]
    pub fn input(&self, slot: &str) -> Option<&BoundSlot> {
        self.inputs.iter().find(|s| s.slot.slot == slot)
    }
}

/// Renders an instance key from a stage name and bindings.
#[must_use]
pub fn instance_key(stage: &str, bindings: &Bindings) -> String {
    if bindings.is_empty() {
        stage.to_string()
    } else {
        format!("{stage}[{bindings}]")
    }
}

/// Extends a set of unresolvable instances along required edges.
///
/// Each instance reached only through a required producer gets a single
/// [`UnresolvedReason::UnresolvableProducer`] naming the first such producer
/// in edge order.
pub(crate) fn unresolvable_closure(
    instances: &[StageInstance],
    edges: &[DependencyEdge],
    mut unresolved: BTreeMap<InstanceId, Vec<UnresolvedReason>>,
) -> BTreeMap<InstanceId, Vec<UnresolvedReason>> {
    loop {
        let mut added = false;
        for edge in edges.iter().filter(|e| e.kind == EdgeKind::Required) {
            if !unresolved.contains_key(&edge.producer) || unresolved.contains_key(&edge.consumer) {
                continue;
            }
            let producer = instances
                .get(edge.producer.0)
                .map_or_else(|| edge.producer.to_string(), StageInstance::key);
            unresolved.insert(
                edge.consumer,
                vec![UnresolvedReason::UnresolvableProducer {
                    slot: edge.slot.clone(),
                    producer,
                }],
            );
            added = true;
        }
        if !added {
            return unresolved;
        }
    }
}

/// A producer to consumer dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Producing instance.
    pub producer: InstanceId,
    /// Consuming instance.
    pub consumer: InstanceId,
    /// Consumer slot.
    pub slot: String,
    /// Artifact flowing along the edge.
    pub artifact: Artifact,
    /// Required or optional.
    pub kind: EdgeKind,
}

/// The expanded, immutable instance graph for one run.
#[derive(Debug, Clone, Default)]
pub struct InstanceGraph {
    instances: Vec<StageInstance>,
    edges: Vec<DependencyEdge>,
    root_artifacts: Vec<Artifact>,
    incoming: Vec<Vec<usize>>,
    outgoing: Vec<Vec<usize>>,
}

impl InstanceGraph {
    /// Assembles a graph and indexes its edges.
    #[must_use]
    pub fn new(
        instances: Vec<StageInstance>,
        edges: Vec<DependencyEdge>,
        root_artifacts: Vec<Artifact>,
    ) -> Self {
        let mut incoming = vec![Vec::new(); instances.len()];
        let mut outgoing = vec![Vec::new(); instances.len()];
        for (index, edge) in edges.iter().enumerate() {
            if let Some(list) = incoming.get_mut(edge.consumer.0) {
                list.push(index);
            }
            if let Some(list) = outgoing.get_mut(edge.producer.0) {
                list.push(index);
            }
        }
        Self {
            instances,
            edges,
            root_artifacts,
            incoming,
            outgoing,
        }
    }

    /// All instances, indexed by [`InstanceId`].
    #[must_use]
    pub fn instances(&self) -> &[StageInstance] {
        &self.instances
    }

    /// Looks up an instance.
    #[must_use]
    pub fn instance(&self, id: InstanceId) -> Option<&StageInstance> {
        self.instances.get(id.0)
    }

    /// All edges.
    #[must_use]
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Artifacts present before the run.
    #[must_use]
    pub fn root_artifacts(&self) -> &[Artifact] {
        &self.root_artifacts
    }

    /// Edges into an instance.
    pub fn incoming(&self, id: InstanceId) -> impl Iterator<Item = &DependencyEdge> {
        self.incoming
            .get(id.0)
            .into_iter()
            .flatten()
            .filter_map(|&i| self.edges.get(i))
    }

    /// Edges out of an instance.
    pub fn outgoing(&self, id: InstanceId) -> impl Iterator<Item = &DependencyEdge> {
        self.outgoing
            .get(id.0)
            .into_iter()
            .flatten()
            .filter_map(|&i| self.edges.get(i))
    }

    /// Instances of one stage definition.
    #[must_use]
    pub fn instances_of(&self, stage: &str) -> Vec<&StageInstance> {
        self.instances.iter().filter(|i| i.stage == stage).collect()
    }

    /// Finds an instance by key.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<&StageInstance> {
        self.instances.iter().find(|i| i.key() == key)
    }

    /// Distinct producers along required edges into `id`.
    #[must_use]
    pub fn required_producers(&self, id: InstanceId) -> BTreeSet<InstanceId> {
        self.incoming(id)
            .filter(|e| e.kind == EdgeKind::Required)
            .map(|e| e.producer)
            .collect()
    }

    /// Instances reachable from `id` along required edges, excluding `id`.
    #[must_use]
    pub fn required_dependents(&self, id: InstanceId) -> BTreeSet<InstanceId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for edge in self.outgoing(current) {
                if edge.kind == EdgeKind::Required && edge.consumer != id && seen.insert(edge.consumer) {
                    stack.push(edge.consumer);
                }
            }
        }
        seen
    }

    /// Number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns true if the graph has no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Returns a sha256 digest over instance keys and edges.
    ///
    /// Two graphs built from the same registry and domain share a
    /// fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for instance in &self.instances {
            hasher.update(instance.key().as_bytes());
            hasher.update(b"\n");
        }
        for edge in &self.edges {
            let producer = self.instance(edge.producer).map(StageInstance::key).unwrap_or_default();
            let consumer = self.instance(edge.consumer).map(StageInstance::key).unwrap_or_default();
            hasher.update(
                format!(
                    "{producer} -> {consumer}.{} {} {}\n",
                    edge.slot, edge.kind, edge.artifact.relative_path
                )
                .as_bytes(),
            );
        }
        hex::encode(hasher.finalize())
    }
}
