//! Database connection utilities.

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};

/// Pragmas applied to every SQLite connection.
///
/// WAL lets the event poller read while a batch is checkpointing, and the
/// busy timeout absorbs lock contention between the orchestrator and the
/// event drain task.
const SQLITE_PRAGMAS: [&str; 4] = [
    "PRAGMA journal_mode=WAL",
    "PRAGMA busy_timeout=5000",
    "PRAGMA synchronous=NORMAL",
    "PRAGMA foreign_keys=ON",
];

async fn configure_sqlite(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    for pragma in SQLITE_PRAGMAS {
        db.execute(Statement::from_string(backend, pragma.to_string()))
            .await?;
    }
    Ok(())
}

fn is_sqlite_file_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite://")
}

/// Establish a connection to the job database.
///
/// File-backed SQLite databases get WAL journaling, a 5 second busy timeout
/// and `synchronous=NORMAL`.
///
/// # Errors
/// Returns `DbErr` if the connection cannot be established.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(database_url).await?;
    if is_sqlite_file_url(database_url) {
        configure_sqlite(&db).await?;
    }
    Ok(db)
}

/// Connect and bring the schema up to date.
///
/// # Example
/// ```ignore
/// let db = gitea_mirror::connect_and_migrate("sqlite://gitea-mirror.db?mode=rwc").await?;
/// ```
#[cfg(feature = "migrate")]
pub async fn connect_and_migrate(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    use sea_orm_migration::MigratorTrait;

    let db = connect(database_url).await?;
    crate::migration::Migrator::up(&db, None).await?;
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    #[tokio::test]
    async fn configure_sqlite_runs_every_pragma() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results(SQLITE_PRAGMAS.map(|_| MockExecResult {
                rows_affected: 0,
                last_insert_id: 0,
            }))
            .into_connection();

        configure_sqlite(&db)
            .await
            .expect("mock sqlite pragma execs should succeed");

        let log = db.into_transaction_log();
        assert_eq!(log.len(), SQLITE_PRAGMAS.len());
    }

    #[test]
    fn only_file_urls_get_pragmas() {
        assert!(is_sqlite_file_url("sqlite://state/gitea-mirror.db?mode=rwc"));
        assert!(!is_sqlite_file_url("sqlite::memory:"));
        assert!(!is_sqlite_file_url("postgres:///gitea_mirror"));
    }

    #[tokio::test]
    async fn connect_rejects_unknown_scheme() {
        let err = connect("not-a-database-url")
            .await
            .expect_err("invalid URL should error");
        assert!(!err.to_string().is_empty());
    }
}
