//! Declarative stage registry.
//!
//! Stage templates are loaded once at startup and are read-only afterwards.
//! A [`StageManifest`] is the file form; [`StageRegistry`] is the validated
//! in-memory catalog the graph builder consumes.

mod catalog;
mod definition;
mod manifest;
mod stage_registry;

pub use catalog::{ArtifactCatalog, ArtifactType};
pub use definition::{InputSlot, OutputSlot, Scope, ScopeKind, StageDefinition};
pub use manifest::{
    ArtifactEntry, InputEntry, OutputEntry, ScopeSpec, ScopeToken, StageEntry, StageManifest,
};
pub use stage_registry::StageRegistry;
