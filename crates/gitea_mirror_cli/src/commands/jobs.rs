use chrono::{Duration, Utc};
use console::Term;
use gitea_mirror::store::{
    count_by_status, find_by_batch, find_by_user, find_recent, find_stalled, get_job,
};
use gitea_mirror::{JobStatus, MirrorJobModel};
use sea_orm::Iterable;
use serde::Serialize;

use super::{MAX_IDLE_MINUTES, OutputFormat, open_database};
use crate::JobsAction;
use crate::config::Config;

/// Messages longer than this are cut in table output.
const MESSAGE_WIDTH: usize = 60;

pub(crate) async fn handle_jobs(
    action: JobsAction,
    config: &Config,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(not(feature = "gitea"))]
    let _ = config;

    match action {
        JobsAction::List {
            user,
            batch,
            limit,
            output,
        } => {
            let db = open_database(database_url).await?;
            let mut jobs = match (user, batch) {
                (Some(user), _) => find_by_user(db.as_ref(), &user, limit).await?,
                (None, Some(batch_id)) => find_by_batch(db.as_ref(), batch_id).await?,
                (None, None) => find_recent(db.as_ref(), limit).await?,
            };
            jobs.truncate(limit as usize);

            if jobs.is_empty() && Term::stdout().is_term() {
                println!("No jobs found.");
                return Ok(());
            }
            JobRow::print_many(jobs.iter().map(JobRow::from).collect(), output);
        }
        JobsAction::Stalled { minutes, output } => {
            let db = open_database(database_url).await?;
            let cutoff = Utc::now() - Duration::minutes(minutes.clamp(0, MAX_IDLE_MINUTES));
            let jobs = find_stalled(db.as_ref(), cutoff).await?;

            if jobs.is_empty() && Term::stdout().is_term() {
                println!("No running job has gone {minutes} minutes without a checkpoint.");
                return Ok(());
            }
            JobRow::print_many(jobs.iter().map(JobRow::from).collect(), output);
        }
        JobsAction::Stats => {
            let db = open_database(database_url).await?;
            for status in JobStatus::iter() {
                let count = count_by_status(db.as_ref(), status).await?;
                println!("{:<12} {count}", status.to_string());
            }
        }
        JobsAction::Show { id, output } => {
            let db = open_database(database_url).await?;
            let job = get_job(db.as_ref(), id).await?;
            JobDetail::from(&job).print(output);
        }
        #[cfg(feature = "gitea")]
        JobsAction::Retry {
            id,
            owner,
            batch_opts,
        } => {
            let db = open_database(database_url).await?;
            let job = get_job(db.as_ref(), id).await?;
            drop(db);

            let request = super::mirror::retry_request(&job, owner, batch_opts)?;
            super::mirror::handle_batch(request, config, database_url).await?;
        }
    }

    Ok(())
}

/// One line of `jobs list`.
#[derive(Debug, Clone, Serialize, tabled::Tabled)]
pub(crate) struct JobRow {
    #[tabled(rename = "Job")]
    id: String,
    #[tabled(rename = "User")]
    owner: String,
    #[tabled(rename = "Type")]
    job_type: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Progress")]
    progress: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&MirrorJobModel> for JobRow {
    fn from(job: &MirrorJobModel) -> Self {
        Self {
            id: job.id.to_string(),
            owner: job.owner_id.clone(),
            job_type: job.job_type.to_string(),
            status: job.status.to_string(),
            progress: format!(
                "{}/{} ({}%)",
                job.completed_items,
                job.total_items,
                job.progress_percent()
            ),
            created: job.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            message: truncate(&job.message, MESSAGE_WIDTH),
        }
    }
}

impl JobRow {
    pub(crate) fn print_many(rows: Vec<Self>, format: OutputFormat) {
        match format {
            OutputFormat::Table => {
                let mut table = tabled::Table::new(rows);
                table.with(tabled::settings::Style::rounded());
                println!("{}", table);
            }
            OutputFormat::Json => print_json(&rows),
        }
    }
}

/// Everything `jobs show` prints about one job.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct JobDetail {
    #[serde(flatten)]
    job: MirrorJobModel,
    progress_percent: u8,
    remaining_item_ids: Vec<String>,
}

impl From<&MirrorJobModel> for JobDetail {
    fn from(job: &MirrorJobModel) -> Self {
        Self {
            job: job.clone(),
            progress_percent: job.progress_percent(),
            remaining_item_ids: job.remaining_item_ids(),
        }
    }
}

impl JobDetail {
    pub(crate) fn print(&self, format: OutputFormat) {
        match format {
            OutputFormat::Json => print_json(self),
            OutputFormat::Table => {
                let job = &self.job;
                let mut table = tabled::Table::new(vec![JobRow::from(job)]);
                table.with(tabled::settings::Style::rounded());
                println!("{}", table);

                if let Some(batch_id) = job.batch_id {
                    println!("Batch:     {batch_id}");
                }
                if let Some(target) = job.target() {
                    println!("Target:    {} ({})", target.name(), target.kind());
                }
                if let Some(started) = job.started_at {
                    println!("Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
                }
                if let Some(completed) = job.completed_at {
                    println!("Completed: {}", completed.format("%Y-%m-%d %H:%M:%S"));
                }
                if let Some(checkpoint) = job.last_checkpoint {
                    println!("Checkpoint: {}", checkpoint.format("%Y-%m-%d %H:%M:%S"));
                }
                println!("Message:   {}", job.message);

                for (name, error) in failed_items(job) {
                    println!("  ✗ {name}: {error}");
                }
                if !self.remaining_item_ids.is_empty() && !job.is_running() {
                    println!(
                        "{} item(s) unfinished; retry with: gitea-mirror jobs retry {}",
                        self.remaining_item_ids.len(),
                        job.id
                    );
                }
            }
        }
    }
}

/// `(item_name, error)` of every failed item recorded in the job details.
fn failed_items(job: &MirrorJobModel) -> Vec<(String, String)> {
    job.details
        .as_ref()
        .and_then(|d| d.get("failed_items"))
        .and_then(|items| items.as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    let field = |key: &str| {
                        item.get(key)
                            .and_then(|v| v.as_str())
                            .unwrap_or("?")
                            .to_string()
                    };
                    (field("item_name"), field("error"))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "Failed to serialize output"),
    }
}

fn truncate(message: &str, width: usize) -> String {
    if message.chars().count() <= width {
        return message.to_string();
    }
    let cut: String = message.chars().take(width.saturating_sub(1)).collect();
    format!("{cut}…")
}
