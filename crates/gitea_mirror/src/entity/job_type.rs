//! Kind of work a mirror job performs.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::job_status::JobStatus;

/// Kind of batch recorded by a job.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// First-time mirror of repositories into Gitea.
    #[sea_orm(string_value = "mirror")]
    #[default]
    Mirror,
    /// Re-sync of repositories that are already mirrored.
    #[sea_orm(string_value = "sync")]
    Sync,
    /// Re-run of the unfinished items of an earlier job.
    #[sea_orm(string_value = "retry")]
    Retry,
}

impl JobType {
    /// Terminal status written when every item of the job succeeds.
    pub fn success_status(self) -> JobStatus {
        match self {
            JobType::Sync => JobStatus::Synced,
            JobType::Mirror | JobType::Retry => JobStatus::Mirrored,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Mirror => write!(f, "mirror"),
            JobType::Sync => write!(f, "sync"),
            JobType::Retry => write!(f, "retry"),
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mirror" => Ok(JobType::Mirror),
            "sync" => Ok(JobType::Sync),
            "retry" => Ok(JobType::Retry),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_status_depends_on_type() {
        assert_eq!(JobType::Mirror.success_status(), JobStatus::Mirrored);
        assert_eq!(JobType::Retry.success_status(), JobStatus::Mirrored);
        assert_eq!(JobType::Sync.success_status(), JobStatus::Synced);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("SYNC".parse::<JobType>(), Ok(JobType::Sync));
        assert!("clone".parse::<JobType>().is_err());
    }
}
