//! Gitea API data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Gitea repository - only the fields the mirror needs.
///
/// API docs: https://docs.gitea.com/api/1.22/#tag/repository/operation/repoGet
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GiteaRepo {
    pub id: i64,
    pub name: String,
    /// "owner/repo".
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
    /// Whether the repository is a pull mirror.
    #[serde(default)]
    pub mirror: bool,
    #[serde(default)]
    pub empty: bool,
    pub html_url: Option<String>,
    pub clone_url: Option<String>,
    /// Last pull-mirror update; null for plain repositories.
    pub mirror_updated: Option<DateTime<Utc>>,
}

/// Response of `GET /version`.
#[derive(Debug, Clone, Deserialize)]
pub struct GiteaVersion {
    pub version: String,
}

/// Body of `POST /repos/migrate`.
///
/// API docs: https://docs.gitea.com/api/1.22/#tag/repository/operation/repoMigrate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrateRepoRequest {
    pub clone_addr: String,
    pub repo_name: String,
    /// User or organization receiving the repository.
    pub repo_owner: String,
    pub mirror: bool,
    pub private: bool,
    /// Source service; `github` enables token auth for the clone.
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Pull interval such as `8h0m0s`; the instance default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror_interval: Option<String>,
}

impl MigrateRepoRequest {
    /// A pull mirror of a GitHub repository.
    pub fn github_mirror(
        clone_addr: impl Into<String>,
        repo_owner: impl Into<String>,
        repo_name: impl Into<String>,
    ) -> Self {
        Self {
            clone_addr: clone_addr.into(),
            repo_name: repo_name.into(),
            repo_owner: repo_owner.into(),
            mirror: true,
            private: false,
            service: "github".to_string(),
            auth_token: None,
            description: None,
            mirror_interval: None,
        }
    }
}

/// Result of a migrate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrateOutcome {
    Created(Box<GiteaRepo>),
    /// A repository with that name already existed; nothing was changed.
    AlreadyExists,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn migrate_request_serializes_without_empty_options() {
        let request = MigrateRepoRequest::github_mirror(
            "https://github.com/rust-lang/rust.git",
            "mirrors",
            "rust",
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "clone_addr": "https://github.com/rust-lang/rust.git",
                "repo_name": "rust",
                "repo_owner": "mirrors",
                "mirror": true,
                "private": false,
                "service": "github",
            })
        );
    }

    #[test]
    fn repo_tolerates_missing_optional_fields() {
        let repo: GiteaRepo = serde_json::from_value(json!({
            "id": 7,
            "name": "rust",
            "full_name": "mirrors/rust",
            "html_url": null,
            "clone_url": null,
            "mirror_updated": null,
            "stars_count": 3
        }))
        .unwrap();
        assert_eq!(repo.full_name, "mirrors/rust");
        assert!(!repo.mirror);
    }
}
