//! Gitea API client.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::GiteaError;
use super::types::{GiteaRepo, GiteaVersion, MigrateOutcome, MigrateRepoRequest};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use crate::rate_limit::ApiRateLimiter;

/// Migrations clone the whole source repository before answering.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Gitea API client. Works against Gitea and Forgejo.
#[derive(Clone)]
pub struct GiteaClient {
    transport: Arc<dyn HttpTransport>,
    host: String,
    token: String,
    rate_limiter: Option<ApiRateLimiter>,
}

impl std::fmt::Debug for GiteaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GiteaClient")
            .field("host", &self.host)
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}

impl GiteaClient {
    /// Create a client for `host` (e.g. "https://git.example.com").
    pub fn new(
        host: &str,
        token: &str,
        rate_limiter: Option<ApiRateLimiter>,
    ) -> Result<Self, GiteaError> {
        if token.trim().is_empty() {
            return Err(GiteaError::Config("Gitea token is empty".to_string()));
        }
        let transport = ReqwestTransport::with_timeout(REQUEST_TIMEOUT)
            .map_err(|e| GiteaError::Config(e.to_string()))?;

        Ok(Self::new_with_transport(
            host,
            token,
            rate_limiter,
            Arc::new(transport),
        ))
    }

    pub fn new_with_transport(
        host: &str,
        token: &str,
        rate_limiter: Option<ApiRateLimiter>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            transport,
            host: host.trim_end_matches('/').to_string(),
            token: token.to_string(),
            rate_limiter,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(ref limiter) = self.rate_limiter {
            limiter.wait().await;
        }
    }

    /// Send an authenticated request and classify error statuses.
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, GiteaError> {
        self.wait_for_rate_limit().await;

        let mut headers = vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Authorization".to_string(), format!("token {}", self.token)),
        ];
        if body.is_some() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }

        let request = HttpRequest {
            method,
            url: format!("{}/api/v1{}", self.host, path),
            headers,
            body: body.unwrap_or_default(),
        };
        let response = self.transport.send(request).await?;
        debug!(method = method.as_str(), path, status = response.status, "Gitea API call");

        if response.is_success() {
            return Ok(response);
        }
        Err(error_for_status(path, &response))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GiteaError> {
        let response = self.request(HttpMethod::Get, path, None).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<HttpResponse, GiteaError> {
        let body = serde_json::to_vec(body)?;
        self.request(HttpMethod::Post, path, Some(body)).await
    }

    /// Server version; doubles as a connectivity and token check.
    pub async fn server_version(&self) -> Result<String, GiteaError> {
        let version: GiteaVersion = self.get("/version").await?;
        Ok(version.version)
    }

    /// Look up a repository. `None` when it does not exist.
    pub async fn get_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<GiteaRepo>, GiteaError> {
        match self.get(&format!("/repos/{owner}/{name}")).await {
            Ok(repo) => Ok(Some(repo)),
            Err(GiteaError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create a repository from a remote source, as a pull mirror when
    /// `request.mirror` is set.
    ///
    /// A 409 answer means the target name is taken and is reported as
    /// [`MigrateOutcome::AlreadyExists`] rather than an error, so running the
    /// same migration twice is harmless.
    pub async fn migrate_repository(
        &self,
        request: &MigrateRepoRequest,
    ) -> Result<MigrateOutcome, GiteaError> {
        match self.post("/repos/migrate", request).await {
            Ok(response) => {
                let repo: GiteaRepo = serde_json::from_slice(&response.body)?;
                Ok(MigrateOutcome::Created(Box::new(repo)))
            }
            Err(GiteaError::AlreadyExists(_)) => Ok(MigrateOutcome::AlreadyExists),
            Err(e) => Err(e),
        }
    }

    /// Ask the instance to pull a mirror now. The sync itself runs on the
    /// server after this returns.
    pub async fn sync_mirror(&self, owner: &str, name: &str) -> Result<(), GiteaError> {
        self.request(
            HttpMethod::Post,
            &format!("/repos/{owner}/{name}/mirror-sync"),
            None,
        )
        .await?;
        Ok(())
    }
}

fn error_for_status(path: &str, response: &HttpResponse) -> GiteaError {
    let message = api_message(response);
    match response.status {
        401 | 403 => GiteaError::Auth(message),
        404 => GiteaError::NotFound(path.to_string()),
        409 => GiteaError::AlreadyExists(message),
        429 => GiteaError::RateLimited {
            retry_after: response
                .header("retry-after")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        },
        status => GiteaError::Api { status, message },
    }
}

/// Gitea errors are `{"message": "..."}`; fall back to the raw body.
fn api_message(response: &HttpResponse) -> String {
    #[derive(serde::Deserialize)]
    struct ApiErrorBody {
        message: String,
    }

    serde_json::from_slice::<ApiErrorBody>(&response.body)
        .map(|b| b.message)
        .unwrap_or_else(|_| response.text())
}
