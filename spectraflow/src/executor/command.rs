//! Runs stage contracts as external commands.

use super::{ExecutionOutcome, ExecutorAdapter, Invocation, OutcomeStatus};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{debug, warn};

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\{([a-z]+)(?::([A-Za-z0-9_-]+))?\}").expect("token pattern is valid")
});

/// Spawns the command registered for an instance's contract.
///
/// Argv templates may use `{name}`, `{tag}`, `{group}`, `{root}`,
/// `{input:slot}` and `{output:slot}`. An argument that is exactly
/// `{input:slot}` expands to one argument per bound artifact, or to nothing
/// for a missing optional slot; embedded in a longer argument the paths are
/// joined with commas.
///
/// Declared outputs left over from an earlier run are removed before the
/// command starts. After it exits, every declared output found on disk is
/// reported as produced.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    contracts: BTreeMap<String, Vec<String>>,
    env: BTreeMap<String, String>,
}

impl CommandExecutor {
    /// Creates an executor from contract argv templates.
    #[must_use]
    pub fn new(contracts: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            contracts,
            env: BTreeMap::new(),
        }
    }

    /// Registers or replaces one contract.
    #[must_use]
    pub fn with_contract<I, S>(mut self, contract: impl Into<String>, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contracts
            .insert(contract.into(), argv.into_iter().map(Into::into).collect());
        self
    }

    /// Sets an environment variable for every spawned command.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Renders the command line for an invocation.
    ///
    /// # Errors
    ///
    /// Returns a message if the contract has no command, or a token is
    /// unknown or unbound.
    pub fn render(&self, invocation: &Invocation) -> Result<Vec<String>, String> {
        let template = self
            .contracts
            .get(&invocation.contract)
            .ok_or_else(|| format!("no command configured for contract '{}'", invocation.contract))?;

        let mut argv = Vec::with_capacity(template.len());
        for arg in template {
            argv.extend(render_arg(arg, invocation)?);
        }
        if argv.is_empty() {
            return Err(format!("command for contract '{}' is empty", invocation.contract));
        }
        Ok(argv)
    }
}

fn render_arg(arg: &str, invocation: &Invocation) -> Result<Vec<String>, String> {
    if let Some(captures) = TOKEN_PATTERN.captures(arg) {
        let whole = captures.get(0).map(|m| m.as_str());
        if whole == Some(arg) && &captures[1] == "input" {
            let slot = captures.get(2).map_or("", |m| m.as_str());
            return input_paths(slot, invocation);
        }
    }

    let mut out = String::new();
    let mut last = 0;
    for captures in TOKEN_PATTERN.captures_iter(arg) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        out.push_str(&arg[last..whole.start()]);
        let slot = captures.get(2).map(|m| m.as_str());
        let value = match (&captures[1], slot) {
            (placeholder @ ("name" | "tag" | "group"), None) => invocation
                .bindings
                .get(placeholder)
                .map(str::to_string)
                .ok_or_else(|| {
                    format!("'{{{placeholder}}}' is not bound for '{}'", invocation.key)
                })?,
            ("root", None) => invocation.root.display().to_string(),
            ("input", Some(slot)) => input_paths(slot, invocation)?.join(","),
            ("output", Some(slot)) => invocation
                .outputs
                .get(slot)
                .map(|a| a.path(&invocation.root).display().to_string())
                .ok_or_else(|| format!("'{}' has no output slot '{slot}'", invocation.stage))?,
            _ => return Err(format!("unknown token '{}' in command", whole.as_str())),
        };
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&arg[last..]);
    Ok(vec![out])
}

fn input_paths(slot: &str, invocation: &Invocation) -> Result<Vec<String>, String> {
    match invocation.inputs.get(slot) {
        Some(artifacts) => Ok(artifacts
            .iter()
            .map(|a| a.path(&invocation.root).display().to_string())
            .collect()),
        None if invocation.is_missing(slot) => Ok(Vec::new()),
        None => Err(format!("'{}' has no input slot '{slot}'", invocation.stage)),
    }
}

#[async_trait]
impl ExecutorAdapter for CommandExecutor {
    async fn run(&self, invocation: &Invocation) -> ExecutionOutcome {
        let argv = match self.render(invocation) {
            Ok(argv) => argv,
            Err(message) => return ExecutionOutcome::failed(message),
        };
        let Some((program, args)) = argv.split_first() else {
            return ExecutionOutcome::failed("empty command");
        };

        for artifact in invocation.outputs.values() {
            let path = artifact.path(&invocation.root);
            if let Some(parent) = path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ExecutionOutcome::failed(format!(
                        "cannot create '{}': {e}",
                        parent.display()
                    ));
                }
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(instance = %invocation.key, output = %artifact, "Removed stale output"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return ExecutionOutcome::failed(format!(
                        "cannot remove stale output '{}': {e}",
                        path.display()
                    ));
                }
            }
        }

        debug!(instance = %invocation.key, command = ?argv, "Spawning stage command");
        let result = Command::new(program)
            .args(args)
            .current_dir(&invocation.root)
            .envs(&self.env)
            .env("SPECTRAFLOW_RUN_ID", invocation.run_id.to_string())
            .env("SPECTRAFLOW_INSTANCE", &invocation.key)
            .stdin(Stdio::null())
            .output()
            .await;
        let output = match result {
            Ok(output) => output,
            Err(e) => return ExecutionOutcome::failed(format!("failed to spawn '{program}': {e}")),
        };

        let mut produced = Vec::new();
        for artifact in invocation.outputs.values() {
            let exists = tokio::fs::try_exists(artifact.path(&invocation.root))
                .await
                .unwrap_or(false);
            if exists {
                produced.push(artifact.clone());
            }
        }

        if output.status.success() {
            return ExecutionOutcome::succeeded(produced);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
        warn!(
            instance = %invocation.key,
            status = %output.status,
            stderr = %detail,
            "Stage command failed"
        );
        ExecutionOutcome {
            status: OutcomeStatus::Failed,
            produced: produced.into_iter().collect(),
            message: Some(format!("'{program}' exited with {}: {detail}", output.status)),
        }
    }
}
