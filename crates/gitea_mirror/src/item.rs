//! Units of work a batch operates on, and the errors an operation may raise.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Something a batch can mirror.
///
/// `item_id` must be stable across runs: it is what checkpoints record and
/// what orphan recovery hands back for a retry.
pub trait MirrorItem {
    fn item_id(&self) -> String;

    /// Human-readable name used in messages and events.
    fn item_name(&self) -> String;
}

/// A GitHub repository to mirror.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
    /// Clone URL; defaults to the public GitHub URL when absent.
    pub clone_url: Option<String>,
    pub private: bool,
}

impl RepositoryRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            clone_url: None,
            private: false,
        }
    }

    /// Parse an `owner/name` slug. Surrounding whitespace and a trailing
    /// `.git` are ignored.
    pub fn parse(slug: &str) -> Option<Self> {
        let slug = slug.trim().trim_end_matches(".git");
        let (owner, name) = slug.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(owner, name))
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn clone_url(&self) -> String {
        self.clone_url
            .clone()
            .unwrap_or_else(|| format!("https://github.com/{}.git", self.full_name()))
    }
}

impl MirrorItem for RepositoryRef {
    fn item_id(&self) -> String {
        self.full_name().to_ascii_lowercase()
    }

    fn item_name(&self) -> String {
        self.full_name()
    }
}

/// A GitHub organization whose repositories are mirrored as one item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrganizationRef {
    pub name: String,
}

impl OrganizationRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl MirrorItem for OrganizationRef {
    fn item_id(&self) -> String {
        format!("org:{}", self.name.to_ascii_lowercase())
    }

    fn item_name(&self) -> String {
        self.name.clone()
    }
}

/// Failure of a single item operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ItemError {
    #[error("API error: {message}")]
    Api { message: String },

    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Authentication required")]
    AuthRequired,

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ItemError {
    #[inline]
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    #[inline]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Missing resources and rejected credentials will fail the same way
    /// every time.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::AuthRequired | Self::NotFound { .. })
    }
}

/// First line of an error message, for progress lines and job messages.
#[inline]
pub fn short_error_message(e: &impl std::error::Error) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}
