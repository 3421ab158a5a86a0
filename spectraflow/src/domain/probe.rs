//! Domain probes: where parameter values come from.

use crate::core::ArtifactTemplate;
use crate::errors::{ConfigurationError, SpectraflowError};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Lists the concrete values available for each scope dimension.
///
/// Names are returned in discovery order; tags and groups come with their
/// member names.
#[cfg_attr(test, mockall::automock)]
pub trait DomainProbe: Send + Sync {
    /// Exposure names.
    fn names(&self) -> Result<Vec<String>, SpectraflowError>;

    /// Tags with their member names.
    fn tags(&self) -> Result<Vec<(String, Vec<String>)>, SpectraflowError>;

    /// Groups with their member names.
    fn groups(&self) -> Result<Vec<(String, Vec<String>)>, SpectraflowError>;
}

/// An in-memory probe.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    names: Vec<String>,
    tags: Vec<(String, Vec<String>)>,
    groups: Vec<(String, Vec<String>)>,
}

impl StaticProbe {
    /// Creates a probe over fixed exposure names.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag<I, S>(mut self, tag: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .push((tag.into(), members.into_iter().map(Into::into).collect()));
        self
    }

    /// Adds a group.
    #[must_use]
    pub fn with_group<I, S>(mut self, group: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups
            .push((group.into(), members.into_iter().map(Into::into).collect()));
        self
    }
}

impl DomainProbe for StaticProbe {
    fn names(&self) -> Result<Vec<String>, SpectraflowError> {
        Ok(self.names.clone())
    }

    fn tags(&self) -> Result<Vec<(String, Vec<String>)>, SpectraflowError> {
        Ok(self.tags.clone())
    }

    fn groups(&self) -> Result<Vec<(String, Vec<String>)>, SpectraflowError> {
        Ok(self.groups.clone())
    }
}

/// Discovers exposure names from files on disk.
///
/// Every file under the data root whose relative path matches the name
/// source template contributes its `{name}` binding. Names are returned
/// sorted. Tags and groups come from configured groupings.
#[derive(Debug, Clone)]
pub struct FilesystemProbe {
    root: PathBuf,
    name_source: ArtifactTemplate,
    tags: BTreeMap<String, Vec<String>>,
    groups: BTreeMap<String, Vec<String>>,
}

impl FilesystemProbe {
    /// Creates a probe scanning `root` for files matching `name_source`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnboundPlaceholder`] if the template does
    /// not contain `{name}`.
    pub fn new(
        root: impl Into<PathBuf>,
        name_source: ArtifactTemplate,
    ) -> Result<Self, ConfigurationError> {
        if !name_source.placeholders().iter().any(|p| p == "name") {
            return Err(ConfigurationError::UnboundPlaceholder {
                template: name_source.as_str().to_string(),
                placeholder: "name".to_string(),
            });
        }
        Ok(Self {
            root: root.into(),
            name_source,
            tags: BTreeMap::new(),
            groups: BTreeMap::new(),
        })
    }

    /// Sets the tag groupings.
    #[must_use]
    pub fn with_tags(mut self, tags: BTreeMap<String, Vec<String>>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the group groupings.
    #[must_use]
    pub fn with_groups(mut self, groups: BTreeMap<String, Vec<String>>) -> Self {
        self.groups = groups;
        self
    }

    /// Lists regular files under `dir` without descending into symlinked
    /// directories. A symlink pointing at a file counts as a file.
    fn walk(dir: &Path) -> Result<Vec<PathBuf>, SpectraflowError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            let is_file = entry.file_type().is_file()
                || (entry.path_is_symlink() && entry.path().is_file());
            if is_file {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

impl DomainProbe for FilesystemProbe {
    fn names(&self) -> Result<Vec<String>, SpectraflowError> {
        let scan_dir = self.root.join(self.name_source.static_prefix());
        if !scan_dir.is_dir() {
            warn!(dir = %scan_dir.display(), "Raw data directory does not exist");
            return Ok(Vec::new());
        }

        let files = Self::walk(&scan_dir)?;

        let mut names = BTreeSet::new();
        for file in files {
            let Ok(relative) = file.strip_prefix(&self.root) else {
                continue;
            };
            let relative: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            if let Some(bindings) = self.name_source.match_path(&relative.join("/")) {
                if let Some(name) = bindings.get("name") {
                    names.insert(name.to_string());
                }
            }
        }
        debug!(
            template = %self.name_source,
            count = names.len(),
            "Scanned raw exposures"
        );
        Ok(names.into_iter().collect())
    }

    fn tags(&self) -> Result<Vec<(String, Vec<String>)>, SpectraflowError> {
        Ok(self.tags.clone().into_iter().collect())
    }

    fn groups(&self) -> Result<Vec<(String, Vec<String>)>, SpectraflowError> {
        Ok(self.groups.clone().into_iter().collect())
    }
}
