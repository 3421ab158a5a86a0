//! The expanded instance graph.
//!
//! [`GraphBuilder`] crosses stage templates with the parameter domain and
//! binds producer artifacts to consumer slots. [`Validator`] checks the
//! result before anything is scheduled.

mod builder;
mod model;
mod validate;

pub use builder::GraphBuilder;
pub use model::{
    instance_key, BoundArtifact, BoundSlot, DependencyEdge, InstanceGraph, InstanceId, Producer,
    Resolution, SlotBinding, StageInstance, UnresolvedReason,
};
pub use validate::{find_cycle, Diagnostic, ValidationReport, Validator};
