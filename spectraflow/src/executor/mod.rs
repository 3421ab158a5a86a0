//! The executor adapter boundary.
//!
//! The core treats every stage as an opaque contract: given concrete input
//! artifacts, produce the declared outputs or fail. An [`ExecutorAdapter`]
//! decides how the external program is located and invoked.

mod command;

pub use command::CommandExecutor;

use crate::core::{Artifact, Bindings};
use crate::graph::InstanceId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use uuid::Uuid;

/// Everything an adapter needs to run one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    /// Run this invocation belongs to.
    pub run_id: Uuid,
    /// Instance id within the graph.
    pub instance: InstanceId,
    /// Instance key, e.g. `aggregate[tag=T1]`.
    pub key: String,
    /// Stage definition name.
    pub stage: String,
    /// Execution contract.
    pub contract: String,
    /// Scope bindings.
    pub bindings: Bindings,
    /// Data root.
    pub root: PathBuf,
    /// Available input artifacts by slot, in binding order.
    pub inputs: BTreeMap<String, Vec<Artifact>>,
    /// Optional slots whose data is not available.
    pub missing_optional: Vec<String>,
    /// Declared outputs by slot.
    pub outputs: BTreeMap<String, Artifact>,
}

impl Invocation {
    /// Returns the artifacts bound to an input slot.
    #[must_use]
    pub fn input(&self, slot: &str) -> &[Artifact] {
        self.inputs.get(slot).map_or(&[], Vec::as_slice)
    }

    /// Returns true if the optional slot was flagged missing.
    #[must_use]
    pub fn is_missing(&self, slot: &str) -> bool {
        self.missing_optional.iter().any(|s| s == slot)
    }
}

/// What the adapter reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The program completed.
    Succeeded,
    /// The program failed.
    Failed,
}

/// Result of running one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Success or failure.
    pub status: OutcomeStatus,
    /// Artifacts the program produced.
    pub produced: BTreeSet<Artifact>,
    /// Adapter message, usually the error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExecutionOutcome {
    /// A successful outcome.
    #[must_use]
    pub fn succeeded(produced: impl IntoIterator<Item = Artifact>) -> Self {
        Self {
            status: OutcomeStatus::Succeeded,
            produced: produced.into_iter().collect(),
            message: None,
        }
    }

    /// A failed outcome.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            produced: BTreeSet::new(),
            message: Some(message.into()),
        }
    }

    /// Attaches a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Declared outputs that were not reported produced.
    #[must_use]
    pub fn missing_outputs<'a>(&self, invocation: &'a Invocation) -> Vec<&'a Artifact> {
        invocation
            .outputs
            .values()
            .filter(|a| !self.produced.contains(*a))
            .collect()
    }
}

/// Runs one stage instance.
///
/// Adapters are shared across concurrently running instances. Retries, if
/// any, are the adapter's business.
#[async_trait]
pub trait ExecutorAdapter: Send + Sync + std::fmt::Debug {
    /// Runs the instance and reports what it produced.
    async fn run(&self, invocation: &Invocation) -> ExecutionOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{resolve, ArtifactTemplate};

    fn artifact(path: &str) -> Artifact {
        resolve("t", &ArtifactTemplate::parse(path).unwrap(), &Bindings::new()).unwrap()
    }

    #[test]
    fn test_missing_outputs() {
        let invocation = Invocation {
            run_id: Uuid::nil(),
            instance: InstanceId(0),
            key: "s".to_string(),
            stage: "s".to_string(),
            contract: "s".to_string(),
            bindings: Bindings::new(),
            root: PathBuf::from("/data"),
            inputs: BTreeMap::new(),
            missing_optional: vec!["anchors".to_string()],
            outputs: BTreeMap::from([
                ("a".to_string(), artifact("a.p")),
                ("b".to_string(), artifact("b.p")),
            ]),
        };
        let outcome = ExecutionOutcome::succeeded([artifact("a.p")]);

        let missing = outcome.missing_outputs(&invocation);
        assert_eq!(missing, vec![&artifact("b.p")]);
        assert!(invocation.is_missing("anchors"));
        assert!(invocation.input("anything").is_empty());
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(ExecutionOutcome::failed("boom")).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["message"], "boom");
    }
}
