use std::sync::Arc;

use clap::ValueEnum;
use sea_orm::DatabaseConnection;

pub(crate) mod jobs;
pub(crate) mod maintenance;
pub(crate) mod migrate;

#[cfg(feature = "gitea")]
pub(crate) mod mirror;

/// Upper bound for idle-time flags; keeps the cutoff arithmetic in range.
pub(crate) const MAX_IDLE_MINUTES: i64 = 60 * 24 * 365;

/// Output format for job listings.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Display as a formatted table (default)
    #[default]
    Table,
    /// Display as JSON
    Json,
}

/// Connect and bring the schema up to date.
pub(crate) async fn open_database(
    database_url: &str,
) -> Result<Arc<DatabaseConnection>, Box<dyn std::error::Error>> {
    let db = gitea_mirror::connect_and_migrate(database_url).await?;
    Ok(Arc::new(db))
}
