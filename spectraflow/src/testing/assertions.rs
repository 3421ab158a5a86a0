//! Assertions over run reports.

use crate::core::InstanceStatus;
use crate::scheduler::{RunReport, SkipCause};

/// Asserts the final status of one instance.
pub fn assert_status(report: &RunReport, key: &str, expected: InstanceStatus) {
    let outcome = report
        .outcome(key)
        .unwrap_or_else(|| panic!("No instance '{key}' in report"));
    assert_eq!(
        outcome.status, expected,
        "Expected '{key}' to be {expected}, got {} ({:?})",
        outcome.status, outcome.failure
    );
}

/// Asserts that every instance succeeded.
pub fn assert_all_succeeded(report: &RunReport) {
    let others: Vec<String> = report
        .outcomes
        .iter()
        .filter(|o| o.status != InstanceStatus::Succeeded)
        .map(|o| format!("{} ({})", o.key, o.status))
        .collect();
    assert!(others.is_empty(), "Expected every instance to succeed: {others:?}");
}

/// Asserts that `consumer` was skipped because `producer` did not succeed.
pub fn assert_skipped_by(report: &RunReport, consumer: &str, producer: &str) {
    assert_status(report, consumer, InstanceStatus::Skipped);
    let cause = report.outcome(consumer).and_then(|o| o.skip_cause.clone());
    assert!(
        matches!(&cause, Some(SkipCause::ProducerDidNotSucceed { producer: p, .. }) if p == producer),
        "Expected '{consumer}' to be skipped by '{producer}', got {cause:?}"
    );
}

/// Asserts that `producer` ran in an earlier batch than `consumer`.
pub fn assert_runs_before(report: &RunReport, producer: &str, consumer: &str) {
    let batch = |key: &str| {
        report
            .outcome(key)
            .and_then(|o| o.batch)
            .unwrap_or_else(|| panic!("'{key}' was not scheduled"))
    };
    assert!(
        batch(producer) < batch(consumer),
        "Expected '{producer}' (batch {}) before '{consumer}' (batch {})",
        batch(producer),
        batch(consumer)
    );
}
