use chrono::{Duration, Utc};
use console::Term;
use gitea_mirror::SqlJobStore;
use gitea_mirror::batch::{ActiveJobs, RecoveredJob, recover_orphaned_jobs, recover_stale_jobs};
use gitea_mirror::store::purge_user_history;

use super::{MAX_IDLE_MINUTES, open_database};

/// Fail running jobs whose process is gone.
///
/// By default only jobs without a checkpoint for `idle_minutes` count as
/// orphaned, so batches another gitea-mirror process is still driving are
/// left alone. `all` fails every running job and is only safe when no other
/// process uses the database.
pub(crate) async fn handle_recover(
    idle_minutes: i64,
    all: bool,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_database(database_url).await?;
    let store = SqlJobStore::new(db);
    // This process owns no jobs.
    let active = ActiveJobs::new();

    let recovered = if all {
        recover_orphaned_jobs(&store, &active).await?
    } else {
        let cutoff = Utc::now() - Duration::minutes(idle_minutes.clamp(0, MAX_IDLE_MINUTES));
        recover_stale_jobs(&store, &active, cutoff).await?
    };
    report_recovered(&recovered, Term::stdout().is_term());
    Ok(())
}

fn report_recovered(recovered: &[RecoveredJob], is_tty: bool) {
    if !is_tty {
        // recover_orphaned_jobs already logs each job
        return;
    }
    if recovered.is_empty() {
        println!("No orphaned jobs.");
        return;
    }

    println!("Recovered {} orphaned job(s):", recovered.len());
    for job in recovered {
        println!(
            "  {} ({}): {}/{} done, {} to retry",
            job.job_id,
            job.owner_id,
            job.completed_items,
            job.total_items,
            job.remaining_item_ids.len()
        );
    }
    println!("Retry one with: gitea-mirror jobs retry <ID>");
}

pub(crate) async fn handle_purge(
    user: &str,
    yes: bool,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let term = Term::stdout();
    if !yes {
        if !term.is_term() {
            return Err("refusing to purge without --yes when not attached to a terminal".into());
        }
        term.write_line(&format!(
            "Delete every job and event of '{user}'? Type the user name to confirm:"
        ))?;
        let answer = term.read_line()?;
        if answer.trim() != user {
            println!("Aborted.");
            return Ok(());
        }
    }

    let db = open_database(database_url).await?;
    let report = purge_user_history(&db, user).await?;

    if term.is_term() {
        println!(
            "Deleted {} job(s) and {} event(s) for '{}'",
            report.jobs_deleted, report.events_deleted, user
        );
        if report.force_completed > 0 {
            println!(
                "  {} running job(s) were force-completed first",
                report.force_completed
            );
        }
    } else {
        tracing::info!(
            user = %user,
            jobs_deleted = report.jobs_deleted,
            events_deleted = report.events_deleted,
            force_completed = report.force_completed,
            "Purged history"
        );
    }
    Ok(())
}
