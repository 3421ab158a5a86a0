//! Parameterized artifact descriptors.
//!
//! An artifact is identified by its template text and the placeholder
//! bindings that resolve it. Artifacts carry no behavior beyond identity and
//! type; reading and writing them is the business of the stage programs.

use crate::errors::ConfigurationError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Placeholder names a template may use, one per scope dimension.
pub const PLACEHOLDERS: [&str; 3] = ["name", "tag", "group"];

static PLACEHOLDER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Concrete placeholder values, ordered by placeholder name.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bindings(BTreeMap<String, String>);

impl Bindings {
    /// Creates empty bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding.
    #[must_use]
    pub fn with(mut self, placeholder: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(placeholder, value);
        self
    }

    /// Inserts a binding, replacing any previous value.
    pub fn insert(&mut self, placeholder: impl Into<String>, value: impl Into<String>) {
        self.0.insert(placeholder.into(), value.into());
    }

    /// Returns the value bound to a placeholder.
    #[must_use]
    pub fn get(&self, placeholder: &str) -> Option<&str> {
        self.0.get(placeholder).map(String::as_str)
    }

    /// Returns true if the placeholder is bound.
    #[must_use]
    pub fn contains(&self, placeholder: &str) -> bool {
        self.0.contains_key(placeholder)
    }

    /// Iterates bindings in placeholder order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keeps only the given placeholders.
    #[must_use]
    pub fn project(&self, placeholders: &[String]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| placeholders.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl fmt::Display for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A path template such as `resampled/{name}.p`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactTemplate {
    raw: String,
    placeholders: Vec<String>,
}

impl ArtifactTemplate {
    /// Parses a template, checking that every placeholder is a scope parameter.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownPlaceholder`] for placeholders
    /// other than `name`, `tag` and `group`.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ConfigurationError> {
        let raw = raw.into();
        let mut placeholders: Vec<String> = Vec::new();
        for capture in PLACEHOLDER_PATTERN.captures_iter(&raw) {
            let placeholder = capture[1].to_string();
            if !PLACEHOLDERS.contains(&placeholder.as_str()) {
                return Err(ConfigurationError::UnknownPlaceholder {
                    template: raw.clone(),
                    placeholder,
                });
            }
            if !placeholders.contains(&placeholder) {
                placeholders.push(placeholder);
            }
        }
        Ok(Self { raw, placeholders })
    }

    /// Returns the template text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns placeholders in order of first appearance.
    #[must_use]
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Substitutes bindings into the template.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnboundPlaceholder`] if a placeholder has
    /// no binding.
    pub fn render(&self, bindings: &Bindings) -> Result<String, ConfigurationError> {
        let mut out = self.raw.clone();
        for placeholder in &self.placeholders {
            let value = bindings.get(placeholder).ok_or_else(|| {
                ConfigurationError::UnboundPlaceholder {
                    template: self.raw.clone(),
                    placeholder: placeholder.clone(),
                }
            })?;
            out = out.replace(&format!("{{{placeholder}}}"), value);
        }
        Ok(out)
    }

    /// Recovers bindings from a concrete relative path, if it fits the template.
    ///
    /// Placeholder values never span a `/`.
    #[must_use]
    pub fn match_path(&self, relative: &str) -> Option<Bindings> {
        let mut pattern = String::from("^");
        let mut last = 0;
        let mut seen: Vec<&str> = Vec::new();
        for capture in PLACEHOLDER_PATTERN.captures_iter(&self.raw) {
            let whole = capture.get(0)?;
            pattern.push_str(&regex::escape(&self.raw[last..whole.start()]));
            let name = capture.get(1)?.as_str();
            if seen.contains(&name) {
                pattern.push_str(&format!("(?P<{name}_{}>[^/]+)", seen.len()));
            } else {
                pattern.push_str(&format!("(?P<{name}>[^/]+)"));
            }
            seen.push(name);
            last = whole.end();
        }
        pattern.push_str(&regex::escape(&self.raw[last..]));
        pattern.push('$');

        let regex = Regex::new(&pattern).ok()?;
        let captures = regex.captures(relative)?;
        let mut bindings = Bindings::new();
        for placeholder in &self.placeholders {
            bindings.insert(placeholder.as_str(), captures.name(placeholder)?.as_str());
        }
        // Repeated placeholders must agree with the first occurrence.
        if self.render(&bindings).ok()? != relative {
            return None;
        }
        Some(bindings)
    }

    /// The leading path segments that contain no placeholder.
    #[must_use]
    pub fn static_prefix(&self) -> PathBuf {
        let mut prefix = PathBuf::new();
        let mut segments = self.raw.split('/').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() || segment.contains('{') {
                break;
            }
            prefix.push(segment);
        }
        prefix
    }
}

impl TryFrom<String> for ArtifactTemplate {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ArtifactTemplate> for String {
    fn from(value: ArtifactTemplate) -> Self {
        value.raw
    }
}

impl fmt::Display for ArtifactTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A concrete, resolved artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Artifact {
    /// Semantic type tag (e.g. "spectrum").
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// Template text the artifact was resolved from.
    pub template: String,
    /// Bindings for exactly the placeholders the template uses.
    pub bindings: Bindings,
    /// Rendered relative path.
    pub relative_path: String,
}

impl Artifact {
    /// Returns the identity key: the resolved (template, bindings) pair.
    #[must_use]
    pub fn key(&self) -> ArtifactKey {
        ArtifactKey {
            template: self.template.clone(),
            bindings: self.bindings.clone(),
        }
    }

    /// Returns the file path under a data root.
    #[must_use]
    pub fn path(&self, root: &Path) -> PathBuf {
        root.join(&self.relative_path)
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative_path)
    }
}

/// Identity of an artifact, independent of its type tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactKey {
    /// Template text.
    pub template: String,
    /// Projected bindings.
    pub bindings: Bindings,
}

/// Resolves a template against bindings.
///
/// Bindings for placeholders the template does not use are dropped, so an
/// artifact's identity only depends on what its path actually varies over.
///
/// # Errors
///
/// Returns [`ConfigurationError::UnboundPlaceholder`] if a placeholder in the
/// template has no binding.
pub fn resolve(
    artifact_type: &str,
    template: &ArtifactTemplate,
    bindings: &Bindings,
) -> Result<Artifact, ConfigurationError> {
    let relative_path = template.render(bindings)?;
    Ok(Artifact {
        artifact_type: artifact_type.to_string(),
        template: template.as_str().to_string(),
        bindings: bindings.project(template.placeholders()),
        relative_path,
    })
}

/// Returns true if both artifacts resolve the same (template, bindings) pair.
#[must_use]
pub fn same_artifact(a: &Artifact, b: &Artifact) -> bool {
    a.template == b.template && a.bindings == b.bindings
}
