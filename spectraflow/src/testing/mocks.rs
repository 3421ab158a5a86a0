//! Scripted executor for tests.

use crate::cancellation::CancellationToken;
use crate::executor::{ExecutionOutcome, ExecutorAdapter, Invocation};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// An executor that never touches the filesystem.
///
/// Every invocation is recorded. By default each instance reports all of its
/// declared outputs as produced. Targets are matched against the instance
/// key (`stack[tag=T1]`) or the stage name (`stack`).
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    failing: BTreeSet<String>,
    omitting: BTreeSet<String>,
    delay: Option<Duration>,
    cancel_on: Option<(String, Arc<CancellationToken>)>,
    invocations: Mutex<Vec<Invocation>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    /// Creates an executor where everything succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the matching instances fail.
    #[must_use]
    pub fn fail(mut self, target: impl Into<String>) -> Self {
        self.failing.insert(target.into());
        self
    }

    /// Makes the matching instances report success without producing their
    /// outputs.
    #[must_use]
    pub fn omit_outputs(mut self, target: impl Into<String>) -> Self {
        self.omitting.insert(target.into());
        self
    }

    /// Sleeps inside every invocation.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Cancels `token` while the matching instance is running.
    #[must_use]
    pub fn cancel_on(mut self, target: impl Into<String>, token: Arc<CancellationToken>) -> Self {
        self.cancel_on = Some((target.into(), token));
        self
    }

    /// All recorded invocations, in start order.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    /// Keys of the invoked instances, in start order.
    #[must_use]
    pub fn invoked_keys(&self) -> Vec<String> {
        self.invocations.lock().iter().map(|i| i.key.clone()).collect()
    }

    /// The invocation of one instance.
    #[must_use]
    pub fn invocation(&self, key: &str) -> Option<Invocation> {
        self.invocations.lock().iter().find(|i| i.key == key).cloned()
    }

    /// The highest number of invocations that were in flight at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn matches(targets: &BTreeSet<String>, invocation: &Invocation) -> bool {
        targets.contains(&invocation.key) || targets.contains(&invocation.stage)
    }
}

#[async_trait]
impl ExecutorAdapter for ScriptedExecutor {
    async fn run(&self, invocation: &Invocation) -> ExecutionOutcome {
        self.invocations.lock().push(invocation.clone());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        if let Some((target, token)) = &self.cancel_on {
            if target == &invocation.key || target == &invocation.stage {
                token.cancel(format!("cancelled while {} was running", invocation.key));
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if Self::matches(&self.failing, invocation) {
            return ExecutionOutcome::failed(format!("scripted failure of {}", invocation.key));
        }
        if Self::matches(&self.omitting, invocation) {
            return ExecutionOutcome::succeeded(Vec::new());
        }
        ExecutionOutcome::succeeded(invocation.outputs.values().cloned())
    }
}
