//! Testing utilities for spectraflow pipelines.
//!
//! This module provides:
//! - A scripted executor that records invocations
//! - The spectral reduction fixture pipeline
//! - Assertions over run reports

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_all_succeeded, assert_runs_before, assert_skipped_by, assert_status};
pub use fixtures::{
    spectral_catalog, spectral_domain, spectral_probe, spectral_registry, spectral_stages,
    SPECTRAL_MANIFEST,
};
pub use mocks::ScriptedExecutor;
