//! Artifact type catalog.

use crate::core::ArtifactTemplate;
use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A named artifact type with its path template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactType {
    /// Type name referenced by slots (e.g. "resampled").
    pub name: String,
    /// Path template relative to the data root.
    pub template: ArtifactTemplate,
    /// Root artifacts exist before the run and are never produced by a stage.
    pub root: bool,
}

impl ArtifactType {
    /// Creates a produced artifact type.
    ///
    /// # Errors
    ///
    /// Returns an error if the template uses an unknown placeholder.
    pub fn new(name: impl Into<String>, template: &str) -> Result<Self, ConfigurationError> {
        Ok(Self {
            name: name.into(),
            template: ArtifactTemplate::parse(template)?,
            root: false,
        })
    }

    /// Creates a root artifact type.
    ///
    /// # Errors
    ///
    /// Returns an error if the template uses an unknown placeholder.
    pub fn root(name: impl Into<String>, template: &str) -> Result<Self, ConfigurationError> {
        Ok(Self {
            root: true,
            ..Self::new(name, template)?
        })
    }
}

/// The artifact types known to a registry, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ArtifactCatalog {
    types: HashMap<String, ArtifactType>,
    order: Vec<String>,
}

impl ArtifactCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an artifact type.
    pub fn insert(&mut self, artifact_type: ArtifactType) {
        if !self.types.contains_key(&artifact_type.name) {
            self.order.push(artifact_type.name.clone());
        }
        self.types.insert(artifact_type.name.clone(), artifact_type);
    }

    /// Adds an artifact type, builder style.
    #[must_use]
    pub fn with(mut self, artifact_type: ArtifactType) -> Self {
        self.insert(artifact_type);
        self
    }

    /// Looks up a type by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ArtifactType> {
        self.types.get(name)
    }

    /// Iterates types in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ArtifactType> {
        self.order.iter().filter_map(|name| self.types.get(name))
    }

    /// Iterates root types in insertion order.
    pub fn roots(&self) -> impl Iterator<Item = &ArtifactType> {
        self.iter().filter(|t| t.root)
    }

    /// Returns the number of types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_preserves_order_and_roots() {
        let catalog = ArtifactCatalog::new()
            .with(ArtifactType::root("raw-exposure", "raw/{name}.fits").unwrap())
            .with(ArtifactType::new("resampled", "resampled/{name}.p").unwrap())
            .with(ArtifactType::root("raw-table", "tables/raw.csv").unwrap());

        let names: Vec<&str> = catalog.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["raw-exposure", "resampled", "raw-table"]);
        let roots: Vec<&str> = catalog.roots().map(|t| t.name.as_str()).collect();
        assert_eq!(roots, ["raw-exposure", "raw-table"]);
    }

    #[test]
    fn test_replacing_keeps_position() {
        let mut catalog = ArtifactCatalog::new()
            .with(ArtifactType::new("a", "a.p").unwrap())
            .with(ArtifactType::new("b", "b.p").unwrap());
        catalog.insert(ArtifactType::new("a", "other/a.p").unwrap());

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.iter().next().unwrap().template.as_str(), "other/a.p");
    }
}
