//! The stage registry: a read-only catalog of stage templates.

use super::{ArtifactCatalog, StageDefinition};
use crate::errors::ConfigurationError;
use std::collections::HashMap;
use tracing::debug;

/// Registered stage templates plus the artifact types they refer to.
///
/// Built once at startup, then shared read-only (typically behind an `Arc`).
#[derive(Debug, Clone, Default)]
pub struct StageRegistry {
    catalog: ArtifactCatalog,
    stages: HashMap<String, StageDefinition>,
    stage_order: Vec<String>,
}

impl StageRegistry {
    /// Creates an empty registry over an artifact catalog.
    #[must_use]
    pub fn new(catalog: ArtifactCatalog) -> Self {
        Self {
            catalog,
            stages: HashMap::new(),
            stage_order: Vec::new(),
        }
    }

    /// Registers a stage definition.
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError::DuplicateStageName`] if the name is taken
    /// - [`ConfigurationError::NoOutputs`] if the stage declares no output
    /// - [`ConfigurationError::UnknownArtifactType`] if a slot names a type
    ///   missing from the catalog
    /// - [`ConfigurationError::UnboundPlaceholder`] if an output template uses
    ///   a placeholder outside the stage scope
    pub fn register(&mut self, definition: StageDefinition) -> Result<(), ConfigurationError> {
        if self.stages.contains_key(&definition.name) {
            return Err(ConfigurationError::DuplicateStageName {
                name: definition.name,
            });
        }
        if definition.outputs.is_empty() {
            return Err(ConfigurationError::NoOutputs {
                stage: definition.name,
            });
        }

        let slots = definition
            .inputs
            .iter()
            .map(|s| (&s.slot, &s.artifact_type))
            .chain(definition.outputs.iter().map(|s| (&s.slot, &s.artifact_type)));
        for (slot, artifact_type) in slots {
            if self.catalog.get(artifact_type).is_none() {
                return Err(ConfigurationError::UnknownArtifactType {
                    stage: definition.name.clone(),
                    slot: slot.clone(),
                    artifact_type: artifact_type.clone(),
                });
            }
        }

        let scoped = definition.scope.placeholders();
        for output in &definition.outputs {
            if let Some(artifact_type) = self.catalog.get(&output.artifact_type) {
                if let Some(unbound) = artifact_type
                    .template
                    .placeholders()
                    .iter()
                    .find(|p| !scoped.contains(p))
                {
                    return Err(ConfigurationError::UnboundPlaceholder {
                        template: artifact_type.template.as_str().to_string(),
                        placeholder: unbound.clone(),
                    });
                }
            }
        }

        debug!(
            stage = %definition.name,
            contract = %definition.contract,
            scope = %definition.scope,
            "Registered stage"
        );
        self.stage_order.push(definition.name.clone());
        self.stages.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Registers a stage, builder style.
    ///
    /// # Errors
    ///
    /// See [`StageRegistry::register`].
    pub fn stage(mut self, definition: StageDefinition) -> Result<Self, ConfigurationError> {
        self.register(definition)?;
        Ok(self)
    }

    /// Returns the registered definitions in registration order.
    #[must_use]
    pub fn list_stages(&self) -> Vec<&StageDefinition> {
        self.stage_order
            .iter()
            .filter_map(|name| self.stages.get(name))
            .collect()
    }

    /// Looks up a definition by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.get(name)
    }

    /// Returns the definitions backed by a contract.
    #[must_use]
    pub fn stages_for_contract(&self, contract: &str) -> Vec<&StageDefinition> {
        self.list_stages()
            .into_iter()
            .filter(|d| d.contract == contract)
            .collect()
    }

    /// Returns the artifact catalog.
    #[must_use]
    pub fn catalog(&self) -> &ArtifactCatalog {
        &self.catalog
    }

    /// Returns the number of registered stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if no stage is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
