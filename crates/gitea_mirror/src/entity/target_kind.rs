//! What a job acts upon: a single repository or a whole organization.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    #[sea_orm(string_value = "repository")]
    Repository,
    #[sea_orm(string_value = "organization")]
    Organization,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKind::Repository => write!(f, "repository"),
            TargetKind::Organization => write!(f, "organization"),
        }
    }
}

/// Typed view over the `target_kind`/`target_id`/`target_name` columns.
///
/// A job targets either a repository or an organization, never both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetRef {
    Repository { id: String, name: String },
    Organization { id: String, name: String },
}

impl TargetRef {
    pub fn repository(id: impl Into<String>, name: impl Into<String>) -> Self {
        TargetRef::Repository {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn organization(id: impl Into<String>, name: impl Into<String>) -> Self {
        TargetRef::Organization {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            TargetRef::Repository { .. } => TargetKind::Repository,
            TargetRef::Organization { .. } => TargetKind::Organization,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            TargetRef::Repository { id, .. } | TargetRef::Organization { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TargetRef::Repository { name, .. } | TargetRef::Organization { name, .. } => name,
        }
    }

    /// Rebuild from stored columns. Returns `None` unless all three are present.
    pub fn from_columns(
        kind: Option<TargetKind>,
        id: Option<&str>,
        name: Option<&str>,
    ) -> Option<Self> {
        let (kind, id, name) = (kind?, id?, name?);
        Some(match kind {
            TargetKind::Repository => TargetRef::repository(id, name),
            TargetKind::Organization => TargetRef::organization(id, name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_cover_both_variants() {
        let repo = TargetRef::repository("42", "octocat/hello");
        assert_eq!(repo.kind(), TargetKind::Repository);
        assert_eq!(repo.id(), "42");
        assert_eq!(repo.name(), "octocat/hello");

        let org = TargetRef::organization("7", "rust-lang");
        assert_eq!(org.kind(), TargetKind::Organization);
        assert_eq!(org.name(), "rust-lang");
    }

    #[test]
    fn from_columns_requires_every_column() {
        assert_eq!(
            TargetRef::from_columns(Some(TargetKind::Organization), Some("7"), Some("rust-lang")),
            Some(TargetRef::organization("7", "rust-lang"))
        );
        assert_eq!(
            TargetRef::from_columns(Some(TargetKind::Repository), None, Some("x")),
            None
        );
        assert_eq!(TargetRef::from_columns(None, Some("1"), Some("x")), None);
    }
}
