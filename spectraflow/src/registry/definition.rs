//! Stage definitions: slots and parameter scopes.

use crate::core::EdgeKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One parameter dimension a stage can be instantiated over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// A group of exposures.
    Group,
    /// A tag (a named selection of exposures).
    Tag,
    /// A single exposure.
    Name,
}

impl ScopeKind {
    /// All kinds, in expansion order. Names come last so they can be
    /// restricted to members of an already-bound tag or group.
    pub const ALL: [Self; 3] = [Self::Group, Self::Tag, Self::Name];

    /// The template placeholder this dimension binds.
    #[must_use]
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Tag => "tag",
            Self::Name => "name",
        }
    }

    /// Maps a placeholder back to its dimension.
    #[must_use]
    pub fn from_placeholder(placeholder: &str) -> Option<Self> {
        match placeholder {
            "group" => Some(Self::Group),
            "tag" => Some(Self::Tag),
            "name" => Some(Self::Name),
            _ => None,
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.placeholder())
    }
}

/// The set of dimensions a stage is instantiated over.
///
/// An empty scope yields exactly one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope(Vec<ScopeKind>);

impl Scope {
    /// A single, unparameterized instance.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// One instance per exposure name.
    #[must_use]
    pub fn per_name() -> Self {
        Self(vec![ScopeKind::Name])
    }

    /// One instance per tag.
    #[must_use]
    pub fn per_tag() -> Self {
        Self(vec![ScopeKind::Tag])
    }

    /// One instance per group.
    #[must_use]
    pub fn per_group() -> Self {
        Self(vec![ScopeKind::Group])
    }

    /// A combination of dimensions, stored in expansion order.
    #[must_use]
    pub fn combined(kinds: impl IntoIterator<Item = ScopeKind>) -> Self {
        let mut kinds: Vec<ScopeKind> = kinds.into_iter().collect();
        kinds.sort();
        kinds.dedup();
        Self(kinds)
    }

    /// Returns the dimensions in expansion order.
    #[must_use]
    pub fn kinds(&self) -> &[ScopeKind] {
        &self.0
    }

    /// Returns true for an unparameterized scope.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if the dimension is part of the scope.
    #[must_use]
    pub fn contains(&self, kind: ScopeKind) -> bool {
        self.0.contains(&kind)
    }

    /// The placeholders an instance of this scope binds.
    #[must_use]
    pub fn placeholders(&self) -> Vec<String> {
        self.0.iter().map(|k| k.placeholder().to_string()).collect()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("none");
        }
        let parts: Vec<&str> = self.0.iter().map(ScopeKind::placeholder).collect();
        write!(f, "per-{}", parts.join("-"))
    }
}

/// An input slot of a stage definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSlot {
    /// Slot name, unique within the stage.
    pub slot: String,
    /// Artifact type the slot consumes.
    pub artifact_type: String,
    /// Whether a producer must exist and succeed.
    pub required: bool,
    /// Whether the slot binds every matching artifact instead of exactly one.
    pub collection: bool,
}

impl InputSlot {
    /// Returns the edge kind the slot produces.
    #[must_use]
    pub fn edge_kind(&self) -> EdgeKind {
        if self.required {
            EdgeKind::Required
        } else {
            EdgeKind::Optional
        }
    }
}

/// An output slot of a stage definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSlot {
    /// Slot name, unique within the stage.
    pub slot: String,
    /// Artifact type the slot produces.
    pub artifact_type: String,
}

/// A declarative stage template.
///
/// The same executable contract may back several definitions at different
/// scopes; each is registered under its own name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Unique stage name.
    pub name: String,
    /// External executable contract; defaults to the stage name.
    pub contract: String,
    /// Input slots.
    pub inputs: Vec<InputSlot>,
    /// Output slots.
    pub outputs: Vec<OutputSlot>,
    /// Parameter scope.
    pub scope: Scope,
    /// Whether an empty scope domain is a configuration error.
    pub scope_required: bool,
    /// Optional human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StageDefinition {
    /// Creates a definition with no slots and an empty scope.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            contract: name.clone(),
            name,
            inputs: Vec::new(),
            outputs: Vec::new(),
            scope: Scope::none(),
            scope_required: false,
            description: None,
        }
    }

    /// Sets the execution contract.
    #[must_use]
    pub fn with_contract(mut self, contract: impl Into<String>) -> Self {
        self.contract = contract.into();
        self
    }

    /// Sets the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Marks the scope as required.
    #[must_use]
    pub fn scope_required(mut self) -> Self {
        self.scope_required = true;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a required single-valued input.
    #[must_use]
    pub fn input(self, slot: impl Into<String>, artifact_type: impl Into<String>) -> Self {
        self.with_input(slot, artifact_type, true, false)
    }

    /// Adds an optional single-valued input.
    #[must_use]
    pub fn optional_input(self, slot: impl Into<String>, artifact_type: impl Into<String>) -> Self {
        self.with_input(slot, artifact_type, false, false)
    }

    /// Adds a required collection input.
    #[must_use]
    pub fn collection_input(self, slot: impl Into<String>, artifact_type: impl Into<String>) -> Self {
        self.with_input(slot, artifact_type, true, true)
    }

    /// Adds an input slot.
    #[must_use]
    pub fn with_input(
        mut self,
        slot: impl Into<String>,
        artifact_type: impl Into<String>,
        required: bool,
        collection: bool,
    ) -> Self {
        self.inputs.push(InputSlot {
            slot: slot.into(),
            artifact_type: artifact_type.into(),
            required,
            collection,
        });
        self
    }

    /// Adds an output slot.
    #[must_use]
    pub fn output(mut self, slot: impl Into<String>, artifact_type: impl Into<String>) -> Self {
        self.outputs.push(OutputSlot {
            slot: slot.into(),
            artifact_type: artifact_type.into(),
        });
        self
    }
}
