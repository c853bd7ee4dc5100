use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use console::Term;
use gitea_mirror::batch::{BatchConfig, BatchEngine, BatchOutcome, ItemStatus};
use gitea_mirror::events::SqlEventSink;
use gitea_mirror::gitea::{GiteaClient, GiteaMirrorer, MirrorOptions};
use gitea_mirror::key_cache::KeyCache;
use gitea_mirror::rate_limit::ApiRateLimiter;
use gitea_mirror::retry::RetryPolicy;
use gitea_mirror::{
    ItemError, JobStatus, JobType, MirrorItem, MirrorJobModel, RepositoryRef, SqlJobStore, TargetRef,
};

use super::open_database;
use crate::BatchOptions;
use crate::config::Config;
use crate::progress::ProgressReporter;
use crate::shutdown::shutdown_flag;

/// Failed repositories listed after a run before the rest are summarized.
const MAX_LISTED_FAILURES: usize = 10;

/// How long a created mirror is trusted without asking Gitea again.
const KNOWN_MIRROR_TTL: Duration = Duration::from_secs(600);

/// What to do with each repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    /// Create a pull mirror.
    Mirror,
    /// Refresh an existing mirror.
    Sync,
}

/// One batch the CLI is about to run.
#[derive(Debug)]
pub(crate) struct BatchRequest {
    repos: Vec<RepositoryRef>,
    job_type: JobType,
    operation: Operation,
    owner: Option<String>,
    opts: BatchOptions,
}

impl BatchRequest {
    pub(crate) fn new(
        repos: Vec<RepositoryRef>,
        job_type: JobType,
        operation: Operation,
        owner: Option<String>,
        opts: BatchOptions,
    ) -> Self {
        Self {
            repos,
            job_type,
            operation,
            owner,
            opts,
        }
    }
}

/// Parse `owner/name` slugs and GitHub URLs.
pub(crate) fn parse_repository(input: &str) -> Result<RepositoryRef, String> {
    let trimmed = input.trim();
    let slug = ["https://github.com/", "http://github.com/", "git@github.com:", "github.com/"]
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .unwrap_or(trimmed)
        .trim_end_matches('/');

    RepositoryRef::parse(slug)
        .ok_or_else(|| format!("invalid repository '{input}', expected owner/name"))
}

/// Collect repositories from the command line and an optional list file.
///
/// List files hold one repository per line; blank lines and `#` comments
/// are ignored.
pub(crate) fn load_repositories(
    args: &[String],
    from_file: Option<&Path>,
) -> Result<Vec<RepositoryRef>, Box<dyn std::error::Error>> {
    let mut repos = args
        .iter()
        .map(|arg| parse_repository(arg))
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(path) = from_file {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let repo = parse_repository(line)
                .map_err(|e| format!("{}:{}: {e}", path.display(), idx + 1))?;
            repos.push(repo);
        }
    }

    Ok(repos)
}

/// The job target: the repository itself for single-item batches, the
/// GitHub owner when every repository shares one.
fn batch_target(repos: &[RepositoryRef]) -> Option<TargetRef> {
    match repos {
        [] => None,
        [repo] => Some(TargetRef::repository(repo.item_id(), repo.full_name())),
        [first, rest @ ..] => rest
            .iter()
            .all(|r| r.owner.eq_ignore_ascii_case(&first.owner))
            .then(|| TargetRef::organization(first.owner.to_ascii_lowercase(), first.owner.clone())),
    }
}

/// Merge CLI flags over configured defaults.
fn batch_config(
    job_type: JobType,
    repos: &[RepositoryRef],
    opts: &BatchOptions,
    config: &Config,
) -> BatchConfig {
    let mirror = &config.mirror;
    let retry = RetryPolicy::new(
        opts.max_retries.unwrap_or(mirror.max_retries),
        Duration::from_millis(opts.retry_delay_ms.unwrap_or(mirror.retry_delay_ms)),
    )
    .with_backoff(opts.backoff.unwrap_or(mirror.backoff));

    let user = opts.user.clone().unwrap_or_else(|| config.default_user());
    let mut batch = BatchConfig::new(user, job_type)
        .with_concurrency_limit(opts.concurrency.unwrap_or(mirror.concurrency))
        .with_retry_policy(retry)
        .with_checkpoint_interval(
            opts.checkpoint_interval
                .unwrap_or(mirror.checkpoint_interval),
        )
        .with_retry_if(Arc::new(|e: &ItemError| e.is_transient()));

    if let Some(batch_id) = opts.batch_id {
        batch = batch.with_batch_id(batch_id);
    }
    if let Some(target) = batch_target(repos) {
        batch = batch.with_target(target);
    }
    batch
}

fn build_mirrorer(
    config: &Config,
    owner: Option<String>,
    no_rate_limit: bool,
) -> Result<GiteaMirrorer, Box<dyn std::error::Error>> {
    let host = config.gitea_host()?;
    let token = config.gitea_token()?;
    let owner = owner
        .or_else(|| config.gitea.owner.clone())
        .ok_or("no Gitea owner given; pass --owner or set gitea.owner")?;

    let rate_limiter = if no_rate_limit || config.mirror.no_rate_limit {
        None
    } else {
        Some(ApiRateLimiter::new(config.mirror.requests_per_second))
    };

    let client = GiteaClient::new(&host, &token, rate_limiter)?;
    let mirrorer = GiteaMirrorer::new(
        client,
        MirrorOptions {
            owner,
            github_token: config.github.token.clone(),
            mirror_interval: config.gitea.mirror_interval.clone(),
        },
    )
    .with_cache(Arc::new(KeyCache::new(KNOWN_MIRROR_TTL)));
    Ok(mirrorer)
}

/// Run one mirror or sync batch to completion.
pub(crate) async fn handle_batch(
    request: BatchRequest,
    config: &Config,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let is_tty = Term::stdout().is_term();
    let BatchRequest {
        repos,
        job_type,
        operation,
        owner,
        opts,
    } = request;

    if repos.is_empty() {
        if is_tty {
            println!("Nothing to do.");
        }
        return Ok(());
    }

    let mirrorer = build_mirrorer(config, owner, opts.no_rate_limit)?;
    if opts.no_rate_limit && is_tty {
        eprintln!("Warning: Rate limiting disabled - you may experience API throttling\n");
    }

    let version = mirrorer.client().server_version().await?;
    if is_tty {
        println!("Connected to {} (Gitea {version})", mirrorer.client().host());
    } else {
        tracing::info!(host = %mirrorer.client().host(), version = %version, "Connected to Gitea");
    }

    let db = open_database(database_url).await?;
    let engine = BatchEngine::new(Arc::new(SqlJobStore::new(Arc::clone(&db))))
        .with_event_sink(Arc::new(SqlEventSink::new(db)));

    let label = match operation {
        Operation::Mirror => "Mirroring",
        Operation::Sync => "Syncing",
    };
    let reporter = Arc::new(ProgressReporter::new(label, repos.len()));
    let batch = batch_config(job_type, &repos, &opts, config)
        .with_progress(reporter.progress_callback())
        .with_retry_callback(reporter.retry_callback())
        .with_cancel_flag(shutdown_flag());

    let outcome = match operation {
        Operation::Mirror => {
            engine
                .run(
                    repos,
                    move |repo| {
                        let mirrorer = mirrorer.clone();
                        async move { mirrorer.mirror(repo).await }
                    },
                    batch,
                )
                .await
        }
        Operation::Sync => {
            engine
                .run(
                    repos,
                    move |repo| {
                        let mirrorer = mirrorer.clone();
                        async move { mirrorer.sync(repo).await }
                    },
                    batch,
                )
                .await
        }
    };
    reporter.finish();
    let outcome = outcome?;

    display_outcome(&outcome, is_tty);

    if outcome.is_success() {
        Ok(())
    } else {
        Err(outcome.message.into())
    }
}

/// Print the run summary, failed repositories first.
fn display_outcome(outcome: &BatchOutcome, is_tty: bool) {
    let failures: Vec<_> = outcome
        .outcomes
        .iter()
        .filter(|o| o.status == ItemStatus::Failed)
        .collect();

    if is_tty {
        println!();
        if !failures.is_empty() {
            eprintln!(
                "{}",
                console::style(format!("Failed repositories ({} total):", failures.len()))
                    .yellow()
                    .bold()
            );
            for failure in failures.iter().take(MAX_LISTED_FAILURES) {
                eprintln!(
                    "  - {}: {}",
                    failure.item_name,
                    failure.error.as_deref().unwrap_or("unknown error")
                );
            }
            if failures.len() > MAX_LISTED_FAILURES {
                eprintln!("  ... and {} more", failures.len() - MAX_LISTED_FAILURES);
            }
        }

        let headline = match outcome.status {
            JobStatus::Failed => console::style(&outcome.message).red().bold(),
            _ => console::style(&outcome.message).green().bold(),
        };
        println!("{headline}");
        println!("Job {} (batch {})", outcome.job_id, outcome.batch_id);
        if !outcome.remaining_item_ids.is_empty() {
            println!(
                "{} repositories left; retry with: gitea-mirror jobs retry {}",
                outcome.remaining_item_ids.len(),
                outcome.job_id
            );
        }
    } else {
        tracing::info!(
            job_id = %outcome.job_id,
            batch_id = %outcome.batch_id,
            status = %outcome.status,
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            skipped = outcome.skipped(),
            remaining = outcome.remaining_item_ids.len(),
            "{}",
            outcome.message
        );
    }
}

/// Rebuild the unfinished repositories of `job` as a retry batch.
pub(crate) fn retry_request(
    job: &MirrorJobModel,
    owner: Option<String>,
    mut opts: BatchOptions,
) -> Result<BatchRequest, Box<dyn std::error::Error>> {
    if job.is_running() {
        return Err(format!(
            "job {} is still running; if its process died, run `gitea-mirror recover` first",
            job.id
        )
        .into());
    }

    let names = failed_item_names(job.details.as_ref());
    let all: Vec<RepositoryRef> = job
        .item_ids()
        .iter()
        .map(|id| {
            let display = names
                .iter()
                .find(|(item_id, _)| item_id == id)
                .map_or(id.as_str(), |(_, name)| name.as_str());
            parse_repository(display)
        })
        .collect::<Result<_, _>>()?;
    let repos = gitea_mirror::batch::retry_items(job, all);

    let operation = match job.job_type {
        JobType::Sync => Operation::Sync,
        JobType::Mirror | JobType::Retry => Operation::Mirror,
    };
    opts.batch_id = opts.batch_id.or(job.batch_id);
    if opts.user.is_none() {
        opts.user = Some(job.owner_id.clone());
    }

    Ok(BatchRequest::new(repos, JobType::Retry, operation, owner, opts))
}

/// `(item_id, item_name)` pairs recorded for failed items.
///
/// Ids are lowercased; names keep the case the user typed.
fn failed_item_names(details: Option<&serde_json::Value>) -> Vec<(String, String)> {
    details
        .and_then(|d| d.get("failed_items"))
        .and_then(|items| items.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some((
                        item.get("item_id")?.as_str()?.to_string(),
                        item.get("item_name")?.as_str()?.to_string(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}
