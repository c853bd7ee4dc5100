//! gitea-mirror CLI - mirror GitHub repositories into Gitea in resumable batches.

mod commands;
mod config;
mod progress;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::Term;
use gitea_mirror::retry::Backoff;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::commands::OutputFormat;

#[derive(Parser)]
#[command(name = "gitea-mirror")]
#[command(version)]
#[command(about = "Mirror GitHub repositories into Gitea")]
#[command(
    long_about = "gitea-mirror creates and refreshes pull mirrors of GitHub repositories on a \
Gitea or Forgejo instance. Every run is recorded as a job with durable checkpoints, so an \
interrupted batch can be inspected and its unfinished repositories retried."
)]
#[command(after_long_help = r#"EXAMPLES
    Mirror two repositories into the "mirrors" organization:
        $ gitea-mirror mirror rust-lang/rust tokio-rs/tokio --owner mirrors

    Mirror a list of repositories, six at a time:
        $ gitea-mirror mirror --from-file repos.txt -c 6

    Re-sync existing mirrors:
        $ gitea-mirror sync rust-lang/rust tokio-rs/tokio

    Retry what an earlier job left unfinished:
        $ gitea-mirror jobs retry 6f1c2d9e-...

CONFIGURATION
    gitea-mirror reads configuration from:
      1. ~/.config/gitea-mirror/config.toml (or $XDG_CONFIG_HOME/gitea-mirror/config.toml)
      2. ./gitea-mirror.toml
      3. Environment variables (GITEA_MIRROR_* prefix, sections split by "__")
      4. .env file in current directory

ENVIRONMENT VARIABLES
    GITEA_MIRROR_DATABASE__URL   Database connection string (default: ~/.local/state/gitea-mirror/gitea-mirror.db)
    GITEA_MIRROR_GITEA__HOST     Gitea/Forgejo base URL
    GITEA_MIRROR_GITEA__TOKEN    Gitea/Forgejo access token
    GITEA_MIRROR_GITEA__OWNER    User or organization that receives the mirrors
    GITEA_MIRROR_GITHUB__TOKEN   GitHub token for private sources
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror GitHub repositories into Gitea
    #[cfg(feature = "gitea")]
    Mirror {
        #[command(flatten)]
        repos: RepoSelection,

        /// Gitea user or organization that receives the mirrors (default from config)
        #[arg(short = 'o', long)]
        owner: Option<String>,

        #[command(flatten)]
        batch_opts: BatchOptions,
    },
    /// Trigger a sync of repositories that are already mirrored
    #[cfg(feature = "gitea")]
    Sync {
        #[command(flatten)]
        repos: RepoSelection,

        /// Gitea owner of the mirrors (default from config)
        #[arg(short = 'o', long)]
        owner: Option<String>,

        #[command(flatten)]
        batch_opts: BatchOptions,
    },
    /// Inspect and retry recorded jobs
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },
    /// Fail jobs left running by a process that no longer exists
    Recover {
        /// Minutes without a checkpoint before a running job counts as orphaned
        #[arg(short, long, default_value_t = 30)]
        minutes: i64,

        /// Fail every running job; only safe when no other gitea-mirror process is running
        #[arg(long, conflicts_with = "minutes")]
        all: bool,
    },
    /// Delete a user's job and event history
    Purge {
        /// Owner whose history is deleted
        #[arg(short, long)]
        user: String,

        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
    /// Fresh install - drop all tables and reapply migrations
    Fresh,
}

#[derive(Subcommand)]
enum JobsAction {
    /// List recent jobs
    List {
        /// Only jobs owned by this user
        #[arg(short, long, conflicts_with = "batch")]
        user: Option<String>,

        /// Only jobs of this batch
        #[arg(short, long)]
        batch: Option<Uuid>,

        /// Maximum number of jobs to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u64,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// List running jobs with no checkpoint for a while
    Stalled {
        /// Minutes without a checkpoint before a running job counts as stalled
        #[arg(short, long, default_value_t = 30)]
        minutes: i64,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Count jobs per status
    Stats,
    /// Show one job with its failures and remaining items
    Show {
        id: Uuid,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Re-run the unfinished repositories of a failed job
    #[cfg(feature = "gitea")]
    Retry {
        id: Uuid,

        /// Gitea owner of the mirrors (default from config)
        #[arg(short = 'o', long)]
        owner: Option<String>,

        #[command(flatten)]
        batch_opts: BatchOptions,
    },
}

/// Repositories to process, as `owner/name`.
#[derive(Debug, Clone, clap::Args)]
struct RepoSelection {
    /// Repositories as owner/name - can specify multiple
    #[arg(required_unless_present = "from_file")]
    repos: Vec<String>,

    /// Read repositories from a file, one owner/name per line
    #[arg(short = 'f', long)]
    from_file: Option<PathBuf>,
}

/// Batch options shared by every command that runs a batch.
#[derive(Debug, Clone, clap::Args)]
struct BatchOptions {
    /// Owner recorded on the job (default from config or $USER)
    #[arg(short, long)]
    user: Option<String>,

    /// Maximum repositories in flight (default from config or 3)
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,

    /// Retries per repository after the first attempt (default from config or 2)
    #[arg(short = 'r', long)]
    max_retries: Option<u32>,

    /// Base wait between attempts in milliseconds (default from config or 2000)
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// How the wait grows between attempts: fixed or linear
    #[arg(long)]
    backoff: Option<Backoff>,

    /// Write a checkpoint every N finished repositories (default from config or 3)
    #[arg(short = 'k', long)]
    checkpoint_interval: Option<usize>,

    /// Group this job under an existing batch id
    #[arg(long)]
    batch_id: Option<Uuid>,

    /// Disable proactive rate limiting (may cause API throttling)
    #[arg(short = 'R', long)]
    no_rate_limit: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Set up graceful shutdown handler (Ctrl+C)
    shutdown::setup_shutdown_handler();

    // Structured logging only when not attached to a TTY
    if !Term::stdout().is_term() {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("gitea_mirror=info,gitea_mirror_cli=info"),
        };

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    // Load configuration (config file -> env vars -> defaults)
    let config = config::Config::load();

    let cli = Cli::parse();

    let database_url = config
        .database_url()
        .ok_or("Could not determine a database URL; set database.url")?;

    // Ensure the database directory exists for SQLite
    if database_url.starts_with("sqlite://") {
        let db_path = database_url.trim_start_matches("sqlite://");
        // Strip query parameters (e.g., ?mode=rwc) before path operations
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        let db_path = std::path::Path::new(db_path);

        if db_path.is_relative() && !db_path.as_os_str().is_empty() {
            tracing::warn!(
                "Database path '{}' is relative - behavior depends on current directory. \
                 Consider using an absolute path.",
                db_path.display()
            );
        }

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
    }

    match cli.command {
        #[cfg(feature = "gitea")]
        Commands::Mirror {
            repos,
            owner,
            batch_opts,
        } => {
            let repos = commands::mirror::load_repositories(&repos.repos, repos.from_file.as_deref())?;
            let request = commands::mirror::BatchRequest::new(
                repos,
                gitea_mirror::JobType::Mirror,
                commands::mirror::Operation::Mirror,
                owner,
                batch_opts,
            );
            commands::mirror::handle_batch(request, &config, &database_url).await?;
        }
        #[cfg(feature = "gitea")]
        Commands::Sync {
            repos,
            owner,
            batch_opts,
        } => {
            let repos = commands::mirror::load_repositories(&repos.repos, repos.from_file.as_deref())?;
            let request = commands::mirror::BatchRequest::new(
                repos,
                gitea_mirror::JobType::Sync,
                commands::mirror::Operation::Sync,
                owner,
                batch_opts,
            );
            commands::mirror::handle_batch(request, &config, &database_url).await?;
        }
        Commands::Jobs { action } => {
            commands::jobs::handle_jobs(action, &config, &database_url).await?;
        }
        Commands::Recover { minutes, all } => {
            commands::maintenance::handle_recover(minutes, all, &database_url).await?;
        }
        Commands::Purge { user, yes } => {
            commands::maintenance::handle_purge(&user, yes, &database_url).await?;
        }
        Commands::Migrate { action } => {
            commands::migrate::handle_migrate(action, &database_url).await?;
        }
    }

    Ok(())
}
