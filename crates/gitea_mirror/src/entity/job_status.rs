//! Lifecycle status of a mirror job.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Status of a [`mirror_job`](super::mirror_job) record.
///
/// The status only moves forward:
///
/// ```text
/// pending ──► in_progress ──► mirrored | synced | failed
///    └────────────────────────────────────────► failed
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[sea_orm(string_value = "pending")]
    #[default]
    Pending,
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    /// Terminal success for mirror and retry jobs.
    #[sea_orm(string_value = "mirrored")]
    Mirrored,
    /// Terminal success for sync jobs.
    #[sea_orm(string_value = "synced")]
    Synced,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Mirrored => "mirrored",
            JobStatus::Synced => "synced",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether no further transition is possible from this status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Mirrored | JobStatus::Synced | JobStatus::Failed
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => matches!(next, JobStatus::InProgress | JobStatus::Failed),
            JobStatus::InProgress => next.is_terminal(),
            JobStatus::Mirrored | JobStatus::Synced | JobStatus::Failed => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" | "in-progress" => Ok(JobStatus::InProgress),
            "mirrored" => Ok(JobStatus::Mirrored),
            "synced" => Ok(JobStatus::Synced),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::Iterable;
    use super::*;

    #[test]
    fn pending_moves_to_in_progress_or_failed() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::InProgress));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Mirrored));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn in_progress_moves_only_to_terminal() {
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Mirrored));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Synced));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::InProgress.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::InProgress.can_transition_to(JobStatus::InProgress));
    }

    #[test]
    fn terminal_statuses_are_final() {
        for status in [JobStatus::Mirrored, JobStatus::Synced, JobStatus::Failed] {
            assert!(status.is_terminal());
            for next in JobStatus::iter() {
                assert!(!status.can_transition_to(next), "{status} -> {next}");
            }
        }
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for status in JobStatus::iter() {
            assert_eq!(status.to_string().parse::<JobStatus>(), Ok(status));
        }
        assert!("done".parse::<JobStatus>().is_err());
    }
}
