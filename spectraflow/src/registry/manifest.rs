//! Stage manifest files.
//!
//! A manifest declares artifact types, the commands behind each execution
//! contract, and the stage templates. It is read from JSON or YAML depending
//! on the file extension.

use super::{ArtifactCatalog, ArtifactType, Scope, ScopeKind, StageDefinition, StageRegistry};
use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Serialized form of a stage manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StageManifest {
    /// Optional pipeline name used in logs and reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Artifact types by name.
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactEntry>,
    /// Command argv templates by contract name.
    #[serde(default)]
    pub contracts: BTreeMap<String, Vec<String>>,
    /// Stage templates by name.
    #[serde(default)]
    pub stages: BTreeMap<String, StageEntry>,
}

/// An artifact type entry: either a bare template or a full record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactEntry {
    /// `resampled: "resampled/{name}.p"`
    Template(String),
    /// `raw-exposure: { template: "raw/{name}.fits", root: true }`
    Detailed {
        /// Path template.
        template: String,
        /// Whether the artifact exists before the run.
        #[serde(default)]
        root: bool,
    },
}

/// One scope token as written in a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScopeToken {
    /// Unparameterized.
    None,
    /// Per exposure name.
    PerName,
    /// Per tag.
    PerTag,
    /// Per group.
    PerGroup,
}

/// A scope: a single token or a list of tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScopeSpec {
    /// `scope: perName`
    One(ScopeToken),
    /// `scope: [perTag, perName]`
    Many(Vec<ScopeToken>),
}

impl Default for ScopeSpec {
    fn default() -> Self {
        Self::One(ScopeToken::None)
    }
}

impl ScopeSpec {
    fn to_scope(&self) -> Scope {
        let tokens: &[ScopeToken] = match self {
            Self::One(token) => std::slice::from_ref(token),
            Self::Many(tokens) => tokens,
        };
        Scope::combined(tokens.iter().filter_map(|token| match token {
            ScopeToken::None => None,
            ScopeToken::PerName => Some(ScopeKind::Name),
            ScopeToken::PerTag => Some(ScopeKind::Tag),
            ScopeToken::PerGroup => Some(ScopeKind::Group),
        }))
    }
}

/// A stage entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StageEntry {
    /// Execution contract; defaults to the stage name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    /// Parameter scope.
    #[serde(default)]
    pub scope: ScopeSpec,
    /// Whether an empty domain for the scope is fatal.
    #[serde(default)]
    pub scope_required: bool,
    /// Input slots.
    #[serde(default)]
    pub inputs: Vec<InputEntry>,
    /// Output slots.
    #[serde(default)]
    pub outputs: Vec<OutputEntry>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An input slot entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InputEntry {
    /// Slot name.
    pub slot: String,
    /// Artifact type consumed.
    pub artifact_type: String,
    /// Whether the slot is required.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Whether the slot binds a collection.
    #[serde(default)]
    pub collection: bool,
}

fn default_required() -> bool {
    true
}

/// An output slot entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OutputEntry {
    /// Slot name.
    pub slot: String,
    /// Artifact type produced.
    pub artifact_type: String,
}

impl StageManifest {
    /// Reads a manifest, choosing YAML for `.yaml`/`.yml` and JSON otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Manifest`] if the file cannot be read or
    /// parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let manifest_error = |message: String| ConfigurationError::Manifest {
            path: path.to_path_buf(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| manifest_error(e.to_string()))?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml")
        );
        if is_yaml {
            serde_yaml::from_str(&text).map_err(|e| manifest_error(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| manifest_error(e.to_string()))
        }
    }

    /// Parses a YAML manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Manifest`] on malformed input.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigurationError> {
        serde_yaml::from_str(text).map_err(|e| ConfigurationError::Manifest {
            path: "<inline>".into(),
            message: e.to_string(),
        })
    }

    /// Parses a JSON manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Manifest`] on malformed input.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(text).map_err(|e| ConfigurationError::Manifest {
            path: "<inline>".into(),
            message: e.to_string(),
        })
    }

    /// Builds the artifact catalog and registers every stage.
    ///
    /// Stages are registered in name order.
    ///
    /// # Errors
    ///
    /// Returns the first template or registration error.
    pub fn to_registry(&self) -> Result<StageRegistry, ConfigurationError> {
        let mut catalog = ArtifactCatalog::new();
        for (name, entry) in &self.artifacts {
            let artifact_type = match entry {
                ArtifactEntry::Template(template) => ArtifactType::new(name, template)?,
                ArtifactEntry::Detailed { template, root: true } => ArtifactType::root(name, template)?,
                ArtifactEntry::Detailed { template, root: false } => ArtifactType::new(name, template)?,
            };
            catalog.insert(artifact_type);
        }

        let mut registry = StageRegistry::new(catalog);
        for (name, entry) in &self.stages {
            let mut definition = StageDefinition::new(name).with_scope(entry.scope.to_scope());
            if let Some(contract) = &entry.contract {
                definition = definition.with_contract(contract);
            }
            if entry.scope_required {
                definition = definition.scope_required();
            }
            if let Some(description) = &entry.description {
                definition = definition.with_description(description);
            }
            for input in &entry.inputs {
                definition = definition.with_input(
                    &input.slot,
                    &input.artifact_type,
                    input.required,
                    input.collection,
                );
            }
            for output in &entry.outputs {
                definition = definition.output(&output.slot, &output.artifact_type);
            }
            registry.register(definition)?;
        }
        Ok(registry)
    }
}
