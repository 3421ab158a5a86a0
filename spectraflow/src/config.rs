//! Run configuration.
//!
//! Settings are layered: built-in defaults, then an optional YAML or JSON
//! file, then `SPECTRAFLOW_*` environment variables, then whatever the caller
//! (usually the CLI) overrides last.

use crate::errors::ConfigurationError;
use crate::observability::LogFormat;
use crate::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Data root override.
pub const ENV_ROOT: &str = "SPECTRAFLOW_ROOT";
/// Manifest path override.
pub const ENV_MANIFEST: &str = "SPECTRAFLOW_MANIFEST";
/// Log level override.
pub const ENV_LOG_LEVEL: &str = "SPECTRAFLOW_LOG_LEVEL";
/// Parallelism override.
pub const ENV_MAX_PARALLEL: &str = "SPECTRAFLOW_MAX_PARALLEL";

/// Everything needed to prepare and execute a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PipelineConfig {
    /// Data root; artifact paths are relative to it.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Stage manifest path.
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
    /// Artifact type whose files enumerate the exposure names. When unset,
    /// the first root type with a `{name}` placeholder is used.
    #[serde(default)]
    pub name_source: Option<String>,
    /// Tag -> member names.
    #[serde(default)]
    pub tags: BTreeMap<String, Vec<String>>,
    /// Group -> member names.
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
    /// Log level or filter directive.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Upper bound on concurrently running instances.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Honor optional edges as ordering hints.
    #[serde(default = "default_soft_ordering")]
    pub soft_ordering: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_manifest() -> PathBuf {
    PathBuf::from("spectraflow.yaml")
}

fn default_log_level() -> String {
    "info".to_string()
}

pub(crate) fn default_max_parallel() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

const fn default_soft_ordering() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            manifest: default_manifest(),
            name_source: None,
            tags: BTreeMap::new(),
            groups: BTreeMap::new(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            max_parallel: default_max_parallel(),
            soft_ordering: default_soft_ordering(),
        }
    }
}

impl PipelineConfig {
    /// Loads a configuration file. `.json` files are parsed as JSON,
    /// everything else as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Manifest`] if the file cannot be read or
    /// parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let failed = |message: String| ConfigurationError::Manifest {
            path: path.to_path_buf(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| failed(e.to_string()))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let config = if is_json {
            serde_json::from_str(&text).map_err(|e| failed(e.to_string()))?
        } else {
            serde_yaml::from_str(&text).map_err(|e| failed(e.to_string()))?
        };
        Ok(config)
    }

    /// Applies `SPECTRAFLOW_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidSetting`] for an unparsable
    /// numeric value.
    pub fn apply_env(self) -> Result<Self, ConfigurationError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidSetting`] for an unparsable
    /// numeric value.
    pub fn apply_vars(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        if let Some(root) = lookup(ENV_ROOT) {
            self.root = PathBuf::from(root);
        }
        if let Some(manifest) = lookup(ENV_MANIFEST) {
            self.manifest = PathBuf::from(manifest);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(raw) = lookup(ENV_MAX_PARALLEL) {
            self.max_parallel = parse_parallelism(ENV_MAX_PARALLEL, &raw)?;
        }
        Ok(self)
    }

    /// The manifest path.
    #[must_use]
    pub fn manifest_path(&self) -> &Path {
        &self.manifest
    }

    /// Returns the scheduler settings.
    #[must_use]
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig::new()
            .with_max_parallel(self.max_parallel)
            .with_soft_ordering(self.soft_ordering)
    }
}

fn parse_parallelism(key: &str, raw: &str) -> Result<usize, ConfigurationError> {
    let invalid = |message: &str| ConfigurationError::InvalidSetting {
        key: key.to_string(),
        value: raw.to_string(),
        message: message.to_string(),
    };
    let value: usize = raw
        .trim()
        .parse()
        .map_err(|_| invalid("expected a positive integer"))?;
    if value == 0 {
        return Err(invalid("must be at least 1"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.root, PathBuf::from("."));
        assert_eq!(config.log_level, "info");
        assert!(config.soft_ordering);
        assert!(config.max_parallel >= 1);
    }

    #[test]
    fn test_yaml_file_fills_missing_fields_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "root: /data/harps\nmaxParallel: 2\ntags:\n  T1: [e1, e2]\nlogFormat: json"
        )
        .unwrap();

        let config = PipelineConfig::from_path(file.path()).unwrap();
        assert_eq!(config.root, PathBuf::from("/data/harps"));
        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.tags["T1"], ["e1", "e2"]);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.manifest, PathBuf::from("spectraflow.yaml"));
        assert!(config.soft_ordering);
    }

    #[test]
    fn test_json_file_and_unknown_field() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"softOrdering": false, "bogus": 1}}"#).unwrap();

        let err = PipelineConfig::from_path(file.path()).unwrap_err();
        assert_eq!(err.code(), "CONFIG-007-MANIFEST");
    }

    #[test]
    fn test_env_overrides() {
        let vars = BTreeMap::from([
            (ENV_ROOT, "/scratch"),
            (ENV_MAX_PARALLEL, "3"),
            (ENV_LOG_LEVEL, "debug"),
        ]);
        let config = PipelineConfig::default()
            .apply_vars(|key| vars.get(key).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.root, PathBuf::from("/scratch"));
        assert_eq!(config.max_parallel, 3);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.scheduler().max_parallel, 3);
    }

    #[test]
    fn test_invalid_parallelism() {
        let err = PipelineConfig::default()
            .apply_vars(|key| (key == ENV_MAX_PARALLEL).then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidSetting { .. }));
    }
}
