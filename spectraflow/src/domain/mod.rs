//! Parameter domain discovery.
//!
//! The parameter domain is the set of concrete values each scope dimension
//! takes for one run: exposure names found among the raw files, plus the tags
//! and groups configured over them. It is discovered once and then frozen.

mod probe;

pub use probe::{DomainProbe, FilesystemProbe, StaticProbe};

#[cfg(test)]
pub use probe::MockDomainProbe;

use crate::core::Bindings;
use crate::errors::{ConfigurationError, SpectraflowError};
use crate::registry::{ScopeKind, StageRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Frozen per-run parameter values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDomain {
    names: Vec<String>,
    tags: Vec<String>,
    groups: Vec<String>,
    tag_members: BTreeMap<String, Vec<String>>,
    group_members: BTreeMap<String, Vec<String>>,
}

impl ParameterDomain {
    /// Creates a domain over the given exposure names, with no tags or groups.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut domain = Self::default();
        for name in names {
            let name = name.into();
            if !domain.names.contains(&name) {
                domain.names.push(name);
            }
        }
        domain
    }

    /// Adds a tag and its member names.
    #[must_use]
    pub fn with_tag<I, S>(mut self, tag: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag.clone());
        }
        self.tag_members
            .insert(tag, members.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a group and its member names.
    #[must_use]
    pub fn with_group<I, S>(mut self, group: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let group = group.into();
        if !self.groups.contains(&group) {
            self.groups.push(group.clone());
        }
        self.group_members
            .insert(group, members.into_iter().map(Into::into).collect());
        self
    }

    /// Returns the ordered values of one dimension.
    #[must_use]
    pub fn values(&self, kind: ScopeKind) -> &[String] {
        match kind {
            ScopeKind::Name => &self.names,
            ScopeKind::Tag => &self.tags,
            ScopeKind::Group => &self.groups,
        }
    }

    /// Returns the member names of a tag or group.
    ///
    /// Names have no members; `None` is returned for them and for unknown
    /// values.
    #[must_use]
    pub fn members(&self, kind: ScopeKind, value: &str) -> Option<&[String]> {
        match kind {
            ScopeKind::Tag => self.tag_members.get(value).map(Vec::as_slice),
            ScopeKind::Group => self.group_members.get(value).map(Vec::as_slice),
            ScopeKind::Name => None,
        }
    }

    /// Returns true if `name` belongs to the tag or group `value`.
    #[must_use]
    pub fn is_member(&self, kind: ScopeKind, value: &str, name: &str) -> bool {
        self.members(kind, value)
            .is_some_and(|members| members.iter().any(|m| m == name))
    }

    /// Checks that a set of bindings is internally consistent: any bound
    /// name belongs to every bound tag and group.
    #[must_use]
    pub fn is_consistent(&self, bindings: &Bindings) -> bool {
        let Some(name) = bindings.get(ScopeKind::Name.placeholder()) else {
            return true;
        };
        [ScopeKind::Tag, ScopeKind::Group].into_iter().all(|kind| {
            bindings
                .get(kind.placeholder())
                .map_or(true, |value| self.is_member(kind, value, name))
        })
    }

    /// Enumerates every combination of values for `kinds`, extending `base`.
    ///
    /// Dimensions are expanded in [`ScopeKind`] order, so names come last and
    /// are restricted to the members of any bound tag or group. Combinations
    /// are returned in domain order.
    #[must_use]
    pub fn expand(&self, kinds: &[ScopeKind], base: &Bindings) -> Vec<Bindings> {
        let mut ordered: Vec<ScopeKind> = kinds.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut combos = vec![base.clone()];
        for kind in ordered {
            let placeholder = kind.placeholder();
            let mut next = Vec::new();
            for combo in &combos {
                if combo.contains(placeholder) {
                    next.push(combo.clone());
                    continue;
                }
                for value in self.values(kind) {
                    let candidate = combo.clone().with(placeholder, value.as_str());
                    if self.is_consistent(&candidate) {
                        next.push(candidate);
                    }
                }
            }
            combos = next;
        }
        combos
    }
}

/// Discovers the parameter domain for a run.
///
/// Tag and group members that are not discovered names are dropped. A stage
/// whose scope expands to nothing contributes zero instances and is logged,
/// unless it is marked `scope_required`.
///
/// # Errors
///
/// Returns the probe's error, or [`ConfigurationError::EmptyDomain`] for a
/// required scope with no values.
pub fn discover(
    probe: &dyn DomainProbe,
    registry: &StageRegistry,
) -> Result<ParameterDomain, SpectraflowError> {
    let mut domain = ParameterDomain::new(probe.names()?);

    for (tag, members) in probe.tags()? {
        let known = known_members(&domain, &tag, members);
        domain = domain.with_tag(tag, known);
    }
    for (group, members) in probe.groups()? {
        let known = known_members(&domain, &group, members);
        domain = domain.with_group(group, known);
    }

    for stage in registry.list_stages() {
        if stage.scope.is_none() {
            continue;
        }
        if !domain.expand(stage.scope.kinds(), &Bindings::new()).is_empty() {
            continue;
        }
        let empty = stage
            .scope
            .kinds()
            .iter()
            .copied()
            .find(|kind| domain.values(*kind).is_empty())
            .or_else(|| stage.scope.kinds().last().copied())
            .unwrap_or(ScopeKind::Name);
        if stage.scope_required {
            return Err(ConfigurationError::EmptyDomain {
                stage: stage.name.clone(),
                scope: empty,
            }
            .into());
        }
        warn!(
            stage = %stage.name,
            scope = %stage.scope,
            "Scope resolved to no values; stage contributes no instances"
        );
    }

    info!(
        names = domain.names.len(),
        tags = domain.tags.len(),
        groups = domain.groups.len(),
        "Discovered parameter domain"
    );
    Ok(domain)
}

fn known_members(domain: &ParameterDomain, owner: &str, members: Vec<String>) -> Vec<String> {
    let names = domain.values(ScopeKind::Name);
    let (known, unknown): (Vec<String>, Vec<String>) =
        members.into_iter().partition(|m| names.contains(m));
    if !unknown.is_empty() {
        debug!(owner = %owner, dropped = ?unknown, "Ignoring members with no raw exposure");
    }
    known
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ArtifactCatalog, ArtifactType, Scope, StageDefinition};
    use pretty_assertions::assert_eq;

    fn domain() -> ParameterDomain {
        ParameterDomain::new(["e1", "e2", "e3"])
            .with_tag("T1", ["e1", "e2"])
            .with_tag("T2", ["e3"])
            .with_group("G1", ["e1", "e3"])
    }

    fn registry(scope: Scope, required: bool) -> StageRegistry {
        let catalog = ArtifactCatalog::new()
            .with(ArtifactType::new("master", "master/{tag}.p").unwrap());
        let mut def = StageDefinition::new("aggregate")
            .with_scope(scope)
            .output("master", "master");
        if required {
            def = def.scope_required();
        }
        StageRegistry::new(catalog).stage(def).unwrap()
    }

    #[test]
    fn test_expand_single_dimension() {
        let combos = domain().expand(&[ScopeKind::Name], &Bindings::new());
        let names: Vec<String> = combos.iter().map(ToString::to_string).collect();
        assert_eq!(names, ["name=e1", "name=e2", "name=e3"]);
    }

    #[test]
    fn test_expand_restricts_names_to_tag_members() {
        let combos = domain().expand(&[ScopeKind::Name, ScopeKind::Tag], &Bindings::new());
        let rendered: Vec<String> = combos.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["name=e1,tag=T1", "name=e2,tag=T1", "name=e3,tag=T2"]);
    }

    #[test]
    fn test_expand_from_bound_name_filters_tags() {
        let base = Bindings::new().with("name", "e3");
        let combos = domain().expand(&[ScopeKind::Group], &base);
        assert_eq!(combos, vec![Bindings::new().with("name", "e3").with("group", "G1")]);
    }

    #[test]
    fn test_expand_no_kinds_returns_base() {
        let base = Bindings::new().with("tag", "T1");
        assert_eq!(domain().expand(&[], &base), vec![base]);
    }

    #[test]
    fn test_discover_drops_unknown_members() {
        let probe = StaticProbe::new(["e1", "e2"]).with_tag("T1", ["e1", "e9"]);
        let registry = registry(Scope::per_tag(), false);
        let domain = discover(&probe, &registry).unwrap();

        assert_eq!(domain.members(ScopeKind::Tag, "T1").unwrap(), ["e1".to_string()]);
    }

    #[test]
    fn test_discover_empty_scope_is_not_fatal_by_default() {
        let probe = StaticProbe::new(["e1"]);
        let domain = discover(&probe, &registry(Scope::per_tag(), false)).unwrap();
        assert!(domain.values(ScopeKind::Tag).is_empty());
    }

    #[test]
    fn test_discover_empty_required_scope() {
        let probe = StaticProbe::new(["e1"]);
        let err = discover(&probe, &registry(Scope::per_tag(), true)).unwrap_err();
        assert!(matches!(
            err,
            SpectraflowError::Configuration(ConfigurationError::EmptyDomain {
                scope: ScopeKind::Tag,
                ..
            })
        ));
    }

    #[test]
    fn test_discover_with_mock_probe() {
        let mut probe = MockDomainProbe::new();
        probe
            .expect_names()
            .times(1)
            .returning(|| Ok(vec!["e1".to_string(), "e2".to_string()]));
        probe
            .expect_tags()
            .returning(|| Ok(vec![("T1".to_string(), vec!["e2".to_string()])]));
        probe.expect_groups().returning(|| Ok(Vec::new()));

        let domain = discover(&probe, &registry(Scope::per_tag(), true)).unwrap();
        assert_eq!(domain.values(ScopeKind::Tag), ["T1".to_string()]);
        assert!(domain.is_member(ScopeKind::Tag, "T1", "e2"));
    }
}
