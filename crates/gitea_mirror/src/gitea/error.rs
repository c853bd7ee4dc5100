//! Error types for Gitea API operations.

use std::time::Duration;

use thiserror::Error;

use crate::http::HttpError;
use crate::item::ItemError;

/// Errors that can occur when talking to a Gitea instance.
#[derive(Debug, Error)]
pub enum GiteaError {
    /// The request never got an HTTP answer.
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// 429 from the instance or its proxy.
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    /// Authentication failed or token invalid.
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The target repository already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<GiteaError> for ItemError {
    fn from(err: GiteaError) -> Self {
        match err {
            GiteaError::Http(e) => ItemError::network(e.to_string()),
            GiteaError::Json(e) => ItemError::internal(format!("JSON parse error: {e}")),
            GiteaError::Api { status, message } => {
                ItemError::api(format!("HTTP {status}: {}", truncate(&message, 120)))
            }
            GiteaError::RateLimited { retry_after } => ItemError::RateLimited { retry_after },
            GiteaError::Auth(_) => ItemError::AuthRequired,
            GiteaError::NotFound(resource) => ItemError::not_found(resource),
            GiteaError::AlreadyExists(resource) => {
                ItemError::api(format!("already exists: {resource}"))
            }
            GiteaError::Config(message) => ItemError::internal(message),
        }
    }
}

/// Check if an error is a rate limit error.
pub fn is_rate_limit_error(err: &GiteaError) -> bool {
    matches!(
        err,
        GiteaError::RateLimited { .. } | GiteaError::Api { status: 429, .. }
    )
}

fn truncate(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let truncated: String = message.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{truncated}...")
}
