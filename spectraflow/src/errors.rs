//! Error types for spectraflow.
//!
//! Errors fall into three families:
//!
//! - [`ConfigurationError`]: the manifest, registry or parameter domain is
//!   unusable. Reported before anything is built.
//! - [`GraphError`]: the expanded instance graph is malformed. Reported before
//!   any instance executes.
//! - [`InstanceFailure`]: a single instance could not run or failed. These are
//!   recorded in the run report and never abort the run.

use crate::registry::ScopeKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for spectraflow operations.
#[derive(Debug, Error)]
pub enum SpectraflowError {
    /// The manifest, registry or domain is misconfigured.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// The instance graph could not be built or validated.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpectraflowError {
    /// Returns the diagnostic info for configuration and graph errors.
    #[must_use]
    pub fn error_info(&self) -> Option<ContractErrorInfo> {
        match self {
            Self::Configuration(err) => Some(err.error_info()),
            Self::Graph(err) => Some(err.error_info()),
            Self::Serialization(_) | Self::Io(_) => None,
        }
    }
}

/// Metadata about an error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-002-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Errors in the manifest, registry, or parameter domain.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A template placeholder has no binding.
    #[error("Unbound placeholder '{{{placeholder}}}' in template '{template}'")]
    UnboundPlaceholder {
        /// The template text.
        template: String,
        /// The placeholder without braces.
        placeholder: String,
    },

    /// A template uses a placeholder that is not a scope parameter.
    #[error("Unknown placeholder '{{{placeholder}}}' in template '{template}' (expected name, tag or group)")]
    UnknownPlaceholder {
        /// The template text.
        template: String,
        /// The placeholder without braces.
        placeholder: String,
    },

    /// Two stage definitions share a name.
    #[error("Duplicate stage name: '{name}'")]
    DuplicateStageName {
        /// The colliding name.
        name: String,
    },

    /// A stage declares no output slots.
    #[error("Stage '{stage}' declares no outputs")]
    NoOutputs {
        /// The stage name.
        stage: String,
    },

    /// A slot refers to an artifact type missing from the catalog.
    #[error("Stage '{stage}' slot '{slot}' refers to unknown artifact type '{artifact_type}'")]
    UnknownArtifactType {
        /// The stage name.
        stage: String,
        /// The slot name.
        slot: String,
        /// The missing artifact type.
        artifact_type: String,
    },

    /// A required scope resolved to zero values.
    #[error("Stage '{stage}' requires scope '{scope}' but no values were discovered")]
    EmptyDomain {
        /// The stage name.
        stage: String,
        /// The empty scope dimension.
        scope: ScopeKind,
    },

    /// The manifest or configuration file could not be read or parsed.
    #[error("Cannot load '{}': {message}", path.display())]
    Manifest {
        /// The file path.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// A configuration value could not be parsed.
    #[error("Invalid value '{value}' for {key}: {message}")]
    InvalidSetting {
        /// The setting or environment variable.
        key: String,
        /// The offending value.
        value: String,
        /// What went wrong.
        message: String,
    },
}

impl ConfigurationError {
    /// Returns the stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnboundPlaceholder { .. } => "CONFIG-001-UNBOUND_PLACEHOLDER",
            Self::UnknownPlaceholder { .. } => "CONFIG-002-UNKNOWN_PLACEHOLDER",
            Self::DuplicateStageName { .. } => "CONFIG-003-DUPLICATE_STAGE",
            Self::NoOutputs { .. } => "CONFIG-004-NO_OUTPUTS",
            Self::UnknownArtifactType { .. } => "CONFIG-005-UNKNOWN_ARTIFACT_TYPE",
            Self::EmptyDomain { .. } => "CONFIG-006-EMPTY_DOMAIN",
            Self::Manifest { .. } => "CONFIG-007-MANIFEST",
            Self::InvalidSetting { .. } => "CONFIG-008-INVALID_SETTING",
        }
    }

    /// Builds diagnostic info with a fix hint.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        let info = ContractErrorInfo::new(self.code(), self.to_string());
        match self {
            Self::UnboundPlaceholder { .. } => info.with_fix_hint(
                "Output templates may only use placeholders covered by the stage scope.",
            ),
            Self::UnknownPlaceholder { .. } => {
                info.with_fix_hint("Use {name}, {tag} or {group} in artifact templates.")
            }
            Self::DuplicateStageName { name } => info
                .with_context_entry("stage", name)
                .with_fix_hint("Give the second definition its own name; it may share the contract."),
            Self::NoOutputs { stage } => info
                .with_context_entry("stage", stage)
                .with_fix_hint("Declare at least one output slot."),
            Self::UnknownArtifactType { stage, .. } => info
                .with_context_entry("stage", stage)
                .with_fix_hint("Add the artifact type to the manifest's artifacts section."),
            Self::EmptyDomain { stage, .. } => info
                .with_context_entry("stage", stage)
                .with_fix_hint("Check the data root and groupings, or drop scopeRequired."),
            Self::Manifest { .. } => info,
            Self::InvalidSetting { key, .. } => info.with_context_entry("setting", key),
        }
    }
}

/// One hop of a dependency cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleLink {
    /// Producing instance key.
    pub producer: String,
    /// Artifact flowing along the edge.
    pub artifact: String,
    /// Consuming instance key.
    pub consumer: String,
}

/// Error raised when a cycle is detected in the instance graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cycle detected in instance graph: {}", render_cycle(links))]
pub struct CycleDetectedError {
    /// The edges forming the cycle, in traversal order.
    pub links: Vec<CycleLink>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(links: Vec<CycleLink>) -> Self {
        Self { links }
    }

    /// Returns the instance keys along the cycle, closing back on the first.
    #[must_use]
    pub fn cycle_path(&self) -> Vec<String> {
        let mut path: Vec<String> = self.links.iter().map(|l| l.producer.clone()).collect();
        if let Some(first) = self.links.first() {
            path.push(first.producer.clone());
        }
        path
    }
}

fn render_cycle(links: &[CycleLink]) -> String {
    let Some(first) = links.first() else {
        return String::new();
    };
    let mut out = first.producer.clone();
    for link in links {
        out.push_str(&format!(" -[{}]-> {}", link.artifact, link.consumer));
    }
    out
}

/// Errors raised while building or validating the instance graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// More than one producer matches a single-valued slot.
    #[error("Ambiguous producer for '{consumer}' slot '{slot}': {}", producers.join(", "))]
    AmbiguousProducer {
        /// Consuming instance key.
        consumer: String,
        /// Slot name.
        slot: String,
        /// Matching artifacts.
        producers: Vec<String>,
    },

    /// The graph contains a cycle.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// An artifact is claimed by more than one producer.
    #[error("Artifact '{artifact}' is claimed by more than one producer: {}", claimants.join(", "))]
    DuplicateArtifactClaim {
        /// The artifact path.
        artifact: String,
        /// The claiming instance keys (`<root>` for pre-existing artifacts).
        claimants: Vec<String>,
    },
}

impl GraphError {
    /// Returns the stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AmbiguousProducer { .. } => "GRAPH-001-AMBIGUOUS_PRODUCER",
            Self::CycleDetected(_) => "GRAPH-002-CYCLE",
            Self::DuplicateArtifactClaim { .. } => "GRAPH-003-DUPLICATE_CLAIM",
        }
    }

    /// Builds diagnostic info with a fix hint.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        let info = ContractErrorInfo::new(self.code(), self.to_string());
        match self {
            Self::AmbiguousProducer { consumer, slot, .. } => info
                .with_context_entry("consumer", consumer)
                .with_context_entry("slot", slot)
                .with_fix_hint("Declare the slot as a collection, or narrow the producer's template."),
            Self::CycleDetected(_) => info
                .with_fix_hint("Two stages require each other's outputs; remove one of the inputs."),
            Self::DuplicateArtifactClaim { artifact, .. } => info
                .with_context_entry("artifact", artifact)
                .with_fix_hint("Give each output its own artifact type or template."),
        }
    }
}

/// Per-instance failure recorded in the run report.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstanceFailure {
    /// The instance could not be bound to its required producers.
    #[error("Instance '{instance}' is unresolvable: {reason}")]
    Unresolvable {
        /// Instance key.
        instance: String,
        /// Why binding failed.
        reason: String,
    },

    /// The executor adapter reported a failure.
    #[error("Stage execution failed for '{instance}': {message}")]
    StageExecutionFailed {
        /// Instance key.
        instance: String,
        /// Adapter message.
        message: String,
    },
}
