//! Item operations backed by a Gitea instance.

use std::sync::Arc;

use tracing::{debug, info};

use super::client::GiteaClient;
use super::types::{MigrateOutcome, MigrateRepoRequest};
use crate::item::{ItemError, RepositoryRef};
use crate::key_cache::KeyCache;

/// Where and how repositories are mirrored.
#[derive(Debug, Clone, Default)]
pub struct MirrorOptions {
    /// Gitea user or organization that receives the mirrors.
    pub owner: String,
    /// GitHub token for private sources.
    pub github_token: Option<String>,
    /// Pull interval such as `8h0m0s`.
    pub mirror_interval: Option<String>,
}

/// Mirrors GitHub repositories into one Gitea owner.
///
/// Cheap to clone; batch operations clone it into every item task.
#[derive(Debug, Clone)]
pub struct GiteaMirrorer {
    client: GiteaClient,
    options: Arc<MirrorOptions>,
    /// Source clone URL -> Gitea full name of mirrors known to exist.
    known: Option<Arc<KeyCache<String>>>,
}

impl GiteaMirrorer {
    pub fn new(client: GiteaClient, options: MirrorOptions) -> Self {
        Self {
            client,
            options: Arc::new(options),
            known: None,
        }
    }

    /// Remember created mirrors so repeated batches skip the migrate call.
    ///
    /// The cache is keyed by source URL only; do not share it between
    /// mirrorers with different owners.
    pub fn with_cache(mut self, cache: Arc<KeyCache<String>>) -> Self {
        self.known = Some(cache);
        self
    }

    pub fn client(&self) -> &GiteaClient {
        &self.client
    }

    pub fn migrate_request(&self, repo: &RepositoryRef) -> MigrateRepoRequest {
        MigrateRepoRequest {
            private: repo.private,
            auth_token: self.options.github_token.clone(),
            mirror_interval: self.options.mirror_interval.clone(),
            ..MigrateRepoRequest::github_mirror(repo.clone_url(), &self.options.owner, &repo.name)
        }
    }

    /// Create the pull mirror. An existing repository counts as done.
    pub async fn mirror(&self, repo: RepositoryRef) -> Result<(), ItemError> {
        let Some(cache) = &self.known else {
            return self.migrate(&repo).await.map(drop);
        };

        let target = cache
            .get_or_fetch(&repo.clone_url(), || self.migrate(&repo))
            .await?;
        debug!(source = %repo.full_name(), target = %target, "Mirror in place");
        Ok(())
    }

    /// Returns the Gitea full name of the mirror.
    async fn migrate(&self, repo: &RepositoryRef) -> Result<String, ItemError> {
        let request = self.migrate_request(repo);
        match self.client.migrate_repository(&request).await? {
            MigrateOutcome::Created(created) => {
                info!(source = %repo.full_name(), target = %created.full_name, "Mirror created");
                Ok(created.full_name)
            }
            MigrateOutcome::AlreadyExists => {
                debug!(source = %repo.full_name(), owner = %self.options.owner, "Mirror already exists");
                Ok(format!("{}/{}", self.options.owner, repo.name))
            }
        }
    }

    /// Trigger a pull on an existing mirror.
    pub async fn sync(&self, repo: RepositoryRef) -> Result<(), ItemError> {
        self.client
            .sync_mirror(&self.options.owner, &repo.name)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpMethod, HttpResponse, MockTransport};

    const HOST: &str = "https://git.example.com";

    fn mirrorer(transport: &MockTransport) -> GiteaMirrorer {
        let client = GiteaClient::new_with_transport(HOST, "t", None, Arc::new(transport.clone()));
        GiteaMirrorer::new(
            client,
            MirrorOptions {
                owner: "mirrors".to_string(),
                github_token: Some("ghp_x".to_string()),
                mirror_interval: Some("8h0m0s".to_string()),
            },
        )
    }

    fn status(status: u16) -> HttpResponse {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[test]
    fn migrate_request_carries_options() {
        let m = mirrorer(&MockTransport::new());
        let mut repo = RepositoryRef::new("tokio-rs", "tokio");
        repo.private = true;

        let request = m.migrate_request(&repo);
        assert_eq!(request.clone_addr, "https://github.com/tokio-rs/tokio.git");
        assert_eq!(request.repo_owner, "mirrors");
        assert_eq!(request.repo_name, "tokio");
        assert!(request.mirror);
        assert!(request.private);
        assert_eq!(request.auth_token.as_deref(), Some("ghp_x"));
        assert_eq!(request.mirror_interval.as_deref(), Some("8h0m0s"));
    }

    #[tokio::test]
    async fn existing_mirror_counts_as_success() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Post,
            format!("{HOST}/api/v1/repos/migrate"),
            status(409),
        );

        let result = mirrorer(&transport)
            .mirror(RepositoryRef::new("tokio-rs", "tokio"))
            .await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn cached_mirror_skips_the_api() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Post,
            format!("{HOST}/api/v1/repos/migrate"),
            status(409),
        );
        let cache = Arc::new(KeyCache::new(std::time::Duration::from_secs(60)));
        let m = mirrorer(&transport).with_cache(Arc::clone(&cache));

        m.mirror(RepositoryRef::new("tokio-rs", "tokio")).await.unwrap();
        m.mirror(RepositoryRef::new("tokio-rs", "tokio")).await.unwrap();

        assert_eq!(transport.requests().len(), 1);
        assert_eq!(
            cache.get("https://github.com/tokio-rs/tokio.git").await.as_deref(),
            Some("mirrors/tokio")
        );
    }

    #[tokio::test]
    async fn failed_mirror_is_not_cached() {
        let transport = MockTransport::new();
        let url = format!("{HOST}/api/v1/repos/migrate");
        transport.push_response(HttpMethod::Post, &url, status(500));
        transport.push_response(HttpMethod::Post, &url, status(409));
        let m = mirrorer(&transport)
            .with_cache(Arc::new(KeyCache::new(std::time::Duration::from_secs(60))));

        assert!(m.mirror(RepositoryRef::new("tokio-rs", "tokio")).await.is_err());
        m.mirror(RepositoryRef::new("tokio-rs", "tokio")).await.unwrap();

        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn auth_failure_surfaces_as_item_error() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Post,
            format!("{HOST}/api/v1/repos/migrate"),
            status(403),
        );

        let err = mirrorer(&transport)
            .mirror(RepositoryRef::new("tokio-rs", "tokio"))
            .await
            .unwrap_err();
        assert_eq!(err, ItemError::AuthRequired);
    }

    #[tokio::test]
    async fn sync_targets_the_mirror_owner() {
        let transport = MockTransport::new();
        let url = format!("{HOST}/api/v1/repos/mirrors/tokio/mirror-sync");
        transport.push_response(HttpMethod::Post, &url, status(200));

        mirrorer(&transport)
            .sync(RepositoryRef::new("tokio-rs", "tokio"))
            .await
            .unwrap();
        assert_eq!(transport.requests()[0].url, url);
    }
}
