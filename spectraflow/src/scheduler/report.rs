//! Run reports.

use crate::core::{Artifact, Bindings, InstanceStatus};
use crate::errors::InstanceFailure;
use crate::graph::{InstanceId, UnresolvedReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why an instance never ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum SkipCause {
    /// The instance was excluded by validation.
    Unresolvable {
        /// Validation reasons.
        reasons: Vec<UnresolvedReason>,
    },
    /// A required producer failed or was skipped.
    ProducerDidNotSucceed {
        /// Producer instance key.
        producer: String,
        /// Producer instance id.
        producer_id: InstanceId,
        /// The producer's final status.
        status: InstanceStatus,
    },
    /// The run was cancelled first.
    Cancelled {
        /// Cancellation reason.
        reason: String,
    },
}

impl fmt::Display for SkipCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolvable { reasons } => {
                let reasons: Vec<String> = reasons.iter().map(ToString::to_string).collect();
                write!(f, "unresolvable: {}", reasons.join("; "))
            }
            Self::ProducerDidNotSucceed {
                producer, status, ..
            } => write!(f, "required producer '{producer}' {status}"),
            Self::Cancelled { reason } => write!(f, "cancelled: {reason}"),
        }
    }
}

/// The final state of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceOutcome {
    /// Instance id.
    pub id: InstanceId,
    /// Instance key.
    pub key: String,
    /// Stage name.
    pub stage: String,
    /// Parameter bindings.
    pub bindings: Bindings,
    /// Final status.
    pub status: InstanceStatus,
    /// Planned batch; `None` for excluded instances.
    pub batch: Option<usize>,
    /// Failure detail for failed or unresolvable instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<InstanceFailure>,
    /// Why the instance was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_cause: Option<SkipCause>,
    /// Optional slots passed to the executor as missing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_optional: Vec<String>,
    /// Artifacts the executor reported.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub produced: Vec<Artifact>,
    /// Time spent in the executor.
    pub duration_ms: u64,
}

/// Instance counts by final status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Total instances.
    pub total: usize,
    /// Succeeded instances.
    pub succeeded: usize,
    /// Failed instances.
    pub failed: usize,
    /// Skipped instances.
    pub skipped: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} instances: {} succeeded, {} failed, {} skipped",
            self.total, self.succeeded, self.failed, self.skipped
        )
    }
}

/// The result of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run id.
    pub run_id: Uuid,
    /// Fingerprint of the executed graph.
    pub fingerprint: String,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution finished.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Cancellation reason, if the run was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<String>,
    /// One outcome per instance, in instance id order.
    pub outcomes: Vec<InstanceOutcome>,
}

impl RunReport {
    fn with_status(&self, status: InstanceStatus) -> Vec<&InstanceOutcome> {
        self.outcomes.iter().filter(|o| o.status == status).collect()
    }

    /// Succeeded instances.
    #[must_use]
    pub fn succeeded(&self) -> Vec<&InstanceOutcome> {
        self.with_status(InstanceStatus::Succeeded)
    }

    /// Failed instances.
    #[must_use]
    pub fn failed(&self) -> Vec<&InstanceOutcome> {
        self.with_status(InstanceStatus::Failed)
    }

    /// Skipped instances.
    #[must_use]
    pub fn skipped(&self) -> Vec<&InstanceOutcome> {
        self.with_status(InstanceStatus::Skipped)
    }

    /// Looks up an instance by key.
    #[must_use]
    pub fn outcome(&self, key: &str) -> Option<&InstanceOutcome> {
        self.outcomes.iter().find(|o| o.key == key)
    }

    /// Counts by status.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.outcomes.len(),
            succeeded: self.succeeded().len(),
            failed: self.failed().len(),
            skipped: self.skipped().len(),
        }
    }

    /// Returns true if every instance succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == InstanceStatus::Succeeded)
    }

    /// Process exit code: 0 on full success, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }

    /// Walks a skipped instance back through its skipped producers.
    ///
    /// The chain starts at `key` and ends at the instance that originated
    /// the skip: a failed producer, an unresolvable instance, or an instance
    /// skipped by cancellation. Empty if `key` is unknown.
    #[must_use]
    pub fn causal_chain(&self, key: &str) -> Vec<&InstanceOutcome> {
        let mut chain = Vec::new();
        let mut current = self.outcome(key);
        while let Some(outcome) = current {
            if chain.iter().any(|o: &&InstanceOutcome| o.id == outcome.id) {
                break;
            }
            chain.push(outcome);
            current = match &outcome.skip_cause {
                Some(SkipCause::ProducerDidNotSucceed { producer_id, .. }) => {
                    self.outcomes.get(producer_id.0).filter(|o| o.id == *producer_id)
                }
                _ => None,
            };
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn outcome(id: usize, key: &str, status: InstanceStatus) -> InstanceOutcome {
        InstanceOutcome {
            id: InstanceId(id),
            key: key.to_string(),
            stage: key.to_string(),
            bindings: Bindings::new(),
            status,
            batch: Some(id),
            failure: None,
            skip_cause: None,
            missing_optional: Vec::new(),
            produced: Vec::new(),
            duration_ms: 0,
        }
    }

    fn skipped_by(id: usize, key: &str, producer: &InstanceOutcome) -> InstanceOutcome {
        InstanceOutcome {
            skip_cause: Some(SkipCause::ProducerDidNotSucceed {
                producer: producer.key.clone(),
                producer_id: producer.id,
                status: producer.status,
            }),
            ..outcome(id, key, InstanceStatus::Skipped)
        }
    }

    fn report(outcomes: Vec<InstanceOutcome>) -> RunReport {
        RunReport {
            run_id: Uuid::nil(),
            fingerprint: String::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 0,
            cancelled: None,
            outcomes,
        }
    }

    #[test]
    fn test_causal_chain_reaches_the_failure() {
        let ingest = outcome(0, "ingest", InstanceStatus::Failed);
        let reinterpolate = skipped_by(1, "reinterpolate", &ingest);
        let stack = skipped_by(2, "stack", &reinterpolate);
        let report = report(vec![ingest, reinterpolate, stack]);

        let chain: Vec<&str> = report
            .causal_chain("stack")
            .iter()
            .map(|o| o.key.as_str())
            .collect();
        assert_eq!(chain, ["stack", "reinterpolate", "ingest"]);
        assert!(report.causal_chain("unknown").is_empty());
    }

    #[test]
    fn test_summary_and_exit_code() {
        let ok = report(vec![outcome(0, "a", InstanceStatus::Succeeded)]);
        assert_eq!(ok.exit_code(), 0);

        let failed = outcome(0, "a", InstanceStatus::Failed);
        let skipped = skipped_by(1, "b", &failed);
        let report = report(vec![failed, skipped, outcome(2, "c", InstanceStatus::Succeeded)]);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(
            report.summary().to_string(),
            "3 instances: 1 succeeded, 1 failed, 1 skipped"
        );
    }

    #[test]
    fn test_skip_cause_serialization() {
        let cause = SkipCause::Cancelled {
            reason: "ctrl-c".to_string(),
        };
        let json = serde_json::to_value(&cause).unwrap();
        assert_eq!(json["cause"], "cancelled");
        assert_eq!(cause.to_string(), "cancelled: ctrl-c");
    }
}
