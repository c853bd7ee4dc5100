//! Thin Gitea adapter: the `repos/migrate` and `mirror-sync` calls a batch
//! needs, plus [`GiteaMirrorer`], which turns them into item operations.
//!
//! ```ignore
//! use gitea_mirror::gitea::{GiteaClient, GiteaMirrorer, MirrorOptions};
//!
//! let client = GiteaClient::new("https://git.example.com", &token, None)?;
//! let mirrorer = GiteaMirrorer::new(client, MirrorOptions { owner: "mirrors".into(), ..Default::default() });
//! let outcome = engine
//!     .run(repos, move |repo| { let m = mirrorer.clone(); async move { m.mirror(repo).await } }, config)
//!     .await?;
//! ```

mod client;
mod error;
mod mirror;
mod types;

pub use client::GiteaClient;
pub use error::{GiteaError, is_rate_limit_error};
pub use mirror::{GiteaMirrorer, MirrorOptions};
pub use types::{GiteaRepo, GiteaVersion, MigrateOutcome, MigrateRepoRequest};
