//! `spectraflow` command line driver.
//!
//! ```text
//! spectraflow --manifest pipeline.yaml --root /data/harps plan
//! spectraflow --config run.yaml validate
//! spectraflow --config run.yaml --max-parallel 8 run --json
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use spectraflow::prelude::*;
use spectraflow::registry::ScopeKind;
use spectraflow::scheduler::RunReport;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};

/// Expand, validate and run parameterized spectral pipelines.
#[derive(Parser, Debug)]
#[command(name = "spectraflow", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Run configuration file (YAML or JSON)
    #[arg(long, global = true, value_name = "FILE", env = "SPECTRAFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Stage manifest, overriding the configuration
    #[arg(long, global = true, value_name = "FILE")]
    manifest: Option<PathBuf>,

    /// Data root, overriding the configuration
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Maximum number of instances running at once
    #[arg(long, global = true, value_name = "N")]
    max_parallel: Option<usize>,

    /// Log level or filter directive
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Build and validate the graph, then print the batches
    Plan,
    /// Build and validate the graph, then print unresolvable instances
    Validate,
    /// Execute the pipeline
    Run,
}

/// Exit code for configuration and graph construction errors.
const EXIT_INVALID: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Some(info) = err
                .downcast_ref::<SpectraflowError>()
                .and_then(SpectraflowError::error_info)
                .or_else(|| {
                    err.downcast_ref::<ConfigurationError>()
                        .map(ConfigurationError::error_info)
                })
            {
                eprintln!("  code: {}", info.code);
                if let Some(hint) = info.fix_hint {
                    eprintln!("  hint: {hint}");
                }
            }
            ExitCode::from(EXIT_INVALID)
        }
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::default(),
    }
    .apply_env()?;

    if let Some(manifest) = &cli.manifest {
        config.manifest.clone_from(manifest);
    }
    if let Some(root) = &cli.root {
        config.root.clone_from(root);
    }
    if let Some(max_parallel) = cli.max_parallel {
        config.max_parallel = max_parallel.max(1);
    }
    if let Some(level) = &cli.log_level {
        config.log_level.clone_from(level);
    }
    Ok(config)
}

/// Picks the artifact type whose files enumerate exposure names.
fn name_source(config: &PipelineConfig, registry: &StageRegistry) -> Result<ArtifactTemplate> {
    let catalog = registry.catalog();
    let artifact_type = match &config.name_source {
        Some(name) => catalog
            .get(name)
            .ok_or_else(|| anyhow!("name source '{name}' is not a declared artifact type"))?,
        None => catalog
            .roots()
            .find(|t| t.template.placeholders().iter().any(|p| p == ScopeKind::Name.placeholder()))
            .ok_or_else(|| anyhow!("no root artifact type with a {{name}} placeholder; set nameSource"))?,
    };
    debug!(artifact_type = %artifact_type.name, "Using name source");
    Ok(artifact_type.template.clone())
}

/// Runs one subcommand and returns the process exit code.
async fn execute(cli: Cli) -> Result<u8> {
    let config = load_config(&cli)?;
    init_logging(&config.log_level, config.log_format);

    let manifest = StageManifest::from_path(&config.manifest)?;
    let registry = manifest.to_registry()?;
    info!(
        manifest = %config.manifest.display(),
        stages = registry.len(),
        "Loaded manifest"
    );

    let probe = FilesystemProbe::new(&config.root, name_source(&config, &registry)?)?
        .with_tags(config.tags.clone())
        .with_groups(config.groups.clone());
    let pipeline = Pipeline::new(registry).with_config(config.scheduler());
    let domain = pipeline.discover(&probe)?;

    let ctx = RunContext::new(&config.root, domain)
        .with_event_sink(Arc::new(LoggingEventSink::debug()));
    let prepared = pipeline.prepare(&ctx)?;

    match cli.command {
        Command::Plan => {
            print_plan(&prepared.describe(), cli.json)?;
            Ok(0)
        }
        Command::Validate => {
            let validation = prepared.validation();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(validation)?);
            } else if validation.is_clean() {
                println!("{} instances, all resolvable", prepared.graph().len());
            } else {
                for diagnostic in &validation.diagnostics {
                    println!("{diagnostic}");
                }
            }
            Ok(u8::from(!validation.is_clean()))
        }
        Command::Run => {
            let token = Arc::clone(ctx.cancellation());
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    token.cancel("interrupted");
                }
            });

            let executor = CommandExecutor::new(manifest.contracts.clone());
            let report = prepared.execute(Arc::new(executor), &ctx).await;
            print_report(&report, cli.json)?;
            Ok(u8::try_from(report.exit_code()).context("exit code out of range")?)
        }
    }
}

fn print_plan(description: &PlanDescription, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(description)?);
        return Ok(());
    }
    println!(
        "{} instances, {} edges, {} batches (fingerprint {})",
        description.instances,
        description.edges,
        description.batches.len(),
        &description.fingerprint[..12.min(description.fingerprint.len())]
    );
    for (index, batch) in description.batches.iter().enumerate() {
        println!("batch {index}:");
        for key in batch {
            println!("  {key}");
        }
    }
    if !description.excluded.is_empty() {
        println!("excluded:");
        for diagnostic in &description.excluded {
            println!("  {diagnostic}");
        }
    }
    Ok(())
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for outcome in &report.outcomes {
        match outcome.status {
            InstanceStatus::Failed => {
                let message = outcome
                    .failure
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                println!("FAILED  {}: {message}", outcome.key);
            }
            InstanceStatus::Skipped => {
                let origin = report
                    .causal_chain(&outcome.key)
                    .last()
                    .map(|o| o.key.clone())
                    .unwrap_or_default();
                let cause = outcome
                    .skip_cause
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                if origin == outcome.key {
                    println!("SKIPPED {}: {cause}", outcome.key);
                } else {
                    println!("SKIPPED {}: {cause} (origin: {origin})", outcome.key);
                }
            }
            _ => println!("ok      {} ({} ms)", outcome.key, outcome.duration_ms),
        }
    }
    if let Some(reason) = &report.cancelled {
        println!("run cancelled: {reason}");
    }
    println!("{} in {} ms", report.summary(), report.duration_ms);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "spectraflow",
            "--root",
            "/data/harps",
            "--max-parallel",
            "0",
            "plan",
        ]);
        assert_eq!(cli.command, Command::Plan);

        let config = load_config(&cli).unwrap();
        assert_eq!(config.root, PathBuf::from("/data/harps"));
        assert_eq!(config.max_parallel, 1);
    }

    #[test]
    fn test_name_source_defaults_to_first_named_root() {
        let manifest = StageManifest::from_yaml_str(spectraflow::testing::SPECTRAL_MANIFEST).unwrap();
        let registry = manifest.to_registry().unwrap();

        let template = name_source(&PipelineConfig::default(), &registry).unwrap();
        assert_eq!(template.as_str(), "raw/{name}.fits");

        let config = PipelineConfig {
            name_source: Some("missing".to_string()),
            ..PipelineConfig::default()
        };
        assert!(name_source(&config, &registry).is_err());
    }

    #[tokio::test]
    async fn test_plan_against_a_data_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("raw")).unwrap();
        for name in ["e1", "e2"] {
            std::fs::write(dir.path().join(format!("raw/{name}.fits")), b"").unwrap();
        }
        let manifest = dir.path().join("pipeline.yaml");
        std::fs::write(&manifest, spectraflow::testing::SPECTRAL_MANIFEST).unwrap();

        let cli = Cli::parse_from([
            "spectraflow".into(),
            "--manifest".into(),
            manifest.into_os_string(),
            "--root".into(),
            dir.path().as_os_str().to_owned(),
            "plan".into(),
        ]);
        assert_eq!(execute(cli).await.unwrap(), 0);
    }
}
