//! Core domain model types for spectraflow.
//!
//! - Artifact templates, bindings and resolved artifacts
//! - Instance status and edge kind enums

mod artifact;
mod status;

pub use artifact::{
    resolve, same_artifact, Artifact, ArtifactKey, ArtifactTemplate, Bindings, PLACEHOLDERS,
};
pub use status::{EdgeKind, InstanceStatus};
