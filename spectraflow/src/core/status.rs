//! Instance status and edge kind enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a dependency gates scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// The producer must succeed before the consumer may run.
    Required,
    /// Informational; a missing producer never blocks the consumer.
    Optional,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "required"),
            Self::Optional => write!(f, "optional"),
        }
    }
}

/// The execution status of a stage instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Waiting for its batch.
    #[default]
    Pending,
    /// All required producers succeeded; about to be handed to the executor.
    Ready,
    /// Handed to the executor.
    Running,
    /// The executor reported every declared output.
    Succeeded,
    /// The executor reported an error or missed an output.
    Failed,
    /// Never ran: a required producer did not succeed, the instance was
    /// unresolvable, or the run was cancelled.
    Skipped,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl InstanceStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Returns true if the transition is allowed.
    ///
    /// `pending -> ready -> running -> succeeded|failed`, and any non-terminal
    /// state other than `running` may become `skipped`.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Ready)
                | (Self::Ready, Self::Running)
                | (Self::Running, Self::Succeeded | Self::Failed)
                | (Self::Pending | Self::Ready, Self::Skipped)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_status_display() {
        assert_eq!(InstanceStatus::Pending.to_string(), "pending");
        assert_eq!(InstanceStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(InstanceStatus::Skipped.to_string(), "skipped");
    }

    #[test]
    fn test_instance_status_is_terminal() {
        assert!(InstanceStatus::Succeeded.is_terminal());
        assert!(InstanceStatus::Failed.is_terminal());
        assert!(InstanceStatus::Skipped.is_terminal());
        assert!(!InstanceStatus::Pending.is_terminal());
        assert!(!InstanceStatus::Running.is_terminal());
    }

    #[test]
    fn test_transitions() {
        use InstanceStatus::*;
        assert!(Pending.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Running));
        assert!(Running.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Skipped));
        assert!(!Running.can_transition_to(Skipped));
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Succeeded));
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_string(&InstanceStatus::Succeeded).unwrap();
        assert_eq!(json, r#""succeeded""#);
        let kind: EdgeKind = serde_json::from_str(r#""optional""#).unwrap();
        assert_eq!(kind, EdgeKind::Optional);
    }
}
