//! A small spectral reduction pipeline used across tests and benches.
//!
//! ```text
//! raw/table.rdb ─┐
//! raw/{name}.fits ┴─> ingest ─> reinterpolate[name] ─> stack[tag] ─> rassine-master[tag]
//!                                        │                                  ┆ anchors (optional)
//!                                        └──────────────> rassine-spectrum[name]
//! ```
//!
//! `rassine-master` and `rassine-spectrum` share the `rassine` contract at
//! two scopes.

use crate::domain::{ParameterDomain, StaticProbe};
use crate::errors::ConfigurationError;
use crate::registry::{ArtifactCatalog, ArtifactType, Scope, StageDefinition, StageRegistry};

/// Manifest text equivalent to [`spectral_registry`].
pub const SPECTRAL_MANIFEST: &str = r#"
name: spectral
artifacts:
  raw-table: { template: "raw/table.rdb", root: true }
  raw-exposure: { template: "raw/{name}.fits", root: true }
  imported: "imported/spectra.p"
  resampled: "resampled/{name}.p"
  stacked: "stacked/{tag}.p"
  anchors: "rassine/anchors_{tag}.csv"
  normalized: "rassine/{name}.p"
contracts:
  ingest: ["yarara-import", "{input:table}", "{input:exposures}", "-o", "{output:imported}"]
  reinterpolate: ["yarara-reinterpolate", "{input:imported}", "--name", "{name}", "-o", "{output:resampled}"]
  stack: ["yarara-stack", "--tag", "{tag}", "{input:spectra}", "-o", "{output:stacked}"]
  rassine: ["rassine", "{input:spectrum}", "--anchors={input:anchors}", "-o", "{output:normalized}"]
stages:
  ingest:
    inputs:
      - { slot: table, artifactType: raw-table }
      - { slot: exposures, artifactType: raw-exposure, collection: true }
    outputs:
      - { slot: imported, artifactType: imported }
  reinterpolate:
    scope: perName
    inputs:
      - { slot: imported, artifactType: imported }
    outputs:
      - { slot: resampled, artifactType: resampled }
  stack:
    scope: perTag
    inputs:
      - { slot: spectra, artifactType: resampled, collection: true }
    outputs:
      - { slot: stacked, artifactType: stacked }
  rassine-master:
    contract: rassine
    scope: perTag
    inputs:
      - { slot: spectrum, artifactType: stacked }
    outputs:
      - { slot: normalized, artifactType: anchors }
  rassine-spectrum:
    contract: rassine
    scope: perName
    inputs:
      - { slot: spectrum, artifactType: resampled }
      - { slot: anchors, artifactType: anchors, required: false }
    outputs:
      - { slot: normalized, artifactType: normalized }
"#;

/// Artifact types of the spectral pipeline.
///
/// # Errors
///
/// Never fails for the built-in templates; the `Result` mirrors
/// [`ArtifactType::new`].
pub fn spectral_catalog() -> Result<ArtifactCatalog, ConfigurationError> {
    Ok(ArtifactCatalog::new()
        .with(ArtifactType::root("raw-table", "raw/table.rdb")?)
        .with(ArtifactType::root("raw-exposure", "raw/{name}.fits")?)
        .with(ArtifactType::new("imported", "imported/spectra.p")?)
        .with(ArtifactType::new("resampled", "resampled/{name}.p")?)
        .with(ArtifactType::new("stacked", "stacked/{tag}.p")?)
        .with(ArtifactType::new("anchors", "rassine/anchors_{tag}.csv")?)
        .with(ArtifactType::new("normalized", "rassine/{name}.p")?))
}

/// Stage definitions of the spectral pipeline, in declaration order.
#[must_use]
pub fn spectral_stages() -> Vec<StageDefinition> {
    vec![
        StageDefinition::new("ingest")
            .input("table", "raw-table")
            .collection_input("exposures", "raw-exposure")
            .output("imported", "imported"),
        StageDefinition::new("reinterpolate")
            .with_scope(Scope::per_name())
            .input("imported", "imported")
            .output("resampled", "resampled"),
        StageDefinition::new("stack")
            .with_scope(Scope::per_tag())
            .collection_input("spectra", "resampled")
            .output("stacked", "stacked"),
        StageDefinition::new("rassine-master")
            .with_contract("rassine")
            .with_scope(Scope::per_tag())
            .input("spectrum", "stacked")
            .output("normalized", "anchors"),
        StageDefinition::new("rassine-spectrum")
            .with_contract("rassine")
            .with_scope(Scope::per_name())
            .input("spectrum", "resampled")
            .optional_input("anchors", "anchors")
            .output("normalized", "normalized"),
    ]
}

/// The spectral pipeline registry.
///
/// # Errors
///
/// Propagates registration errors.
pub fn spectral_registry() -> Result<StageRegistry, ConfigurationError> {
    let mut registry = StageRegistry::new(spectral_catalog()?);
    for stage in spectral_stages() {
        registry.register(stage)?;
    }
    Ok(registry)
}

/// Three exposures: `T1 = {e1, e2}`, `T2 = {e3}`.
#[must_use]
pub fn spectral_domain() -> ParameterDomain {
    ParameterDomain::new(["e1", "e2", "e3"])
        .with_tag("T1", ["e1", "e2"])
        .with_tag("T2", ["e3"])
}

/// A probe that discovers [`spectral_domain`].
#[must_use]
pub fn spectral_probe() -> StaticProbe {
    StaticProbe::new(["e1", "e2", "e3"])
        .with_tag("T1", ["e1", "e2"])
        .with_tag("T2", ["e3"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StageManifest;

    #[test]
    fn test_manifest_matches_programmatic_registry() {
        let from_manifest = StageManifest::from_yaml_str(SPECTRAL_MANIFEST)
            .unwrap()
            .to_registry()
            .unwrap();
        let built = spectral_registry().unwrap();

        assert_eq!(from_manifest.len(), built.len());
        for stage in built.list_stages() {
            assert_eq!(from_manifest.get(&stage.name), Some(stage), "{}", stage.name);
        }
        assert_eq!(built.stages_for_contract("rassine").len(), 2);
    }
}
