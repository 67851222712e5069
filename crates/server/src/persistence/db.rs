//! Sqlite connection pool and migration runner. Splits the migration file on
//! `;` and executes each statement individually, so `CREATE ... IF NOT
//! EXISTS` re-runs are cheap no-ops; a failing `CREATE` statement is
//! fail-fast, anything else is logged and skipped.

use std::path::Path;

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::{info, warn};

use crate::error::PersistError;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub async fn init_database(db_path: &str, max_connections: u32) -> Result<Database, sqlx::Error> {
    if db_path != ":memory:" {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| {
                    sqlx::Error::Io(source)
                })?;
            }
        }
    }

    let db_url = if db_path == ":memory:" {
        "sqlite::memory:".to_string()
    } else {
        format!("sqlite:{db_path}?mode=rwc")
    };

    info!(%db_path, "connecting to database");
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&db_url)
        .await?;

    run_migrations(&pool).await?;

    Ok(Database { pool })
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let migration_sql = include_str!("../../migrations/001_init.sql");
    info!("running database migrations");

    for statement in migration_sql.split(';') {
        let statement: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }

        if let Err(err) = sqlx::query(statement).execute(pool).await {
            let err_str = err.to_string();
            if err_str.contains("already exists") {
                continue;
            }
            if statement.to_uppercase().starts_with("CREATE") {
                return Err(err);
            }
            warn!(%err, "migration statement failed");
        }
    }

    info!("database migrations complete");
    Ok(())
}

/// Clears the incidents table, leaving snapshots untouched — the admin
/// purge command scopes to intrusion history only.
pub async fn purge_incidents(pool: &SqlitePool) -> Result<(), PersistError> {
    sqlx::query("DELETE FROM incidents").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_creates_expected_tables() {
        let db = init_database(":memory:", 1).await.unwrap();
        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='snapshots'",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(result.0, 1);
    }
}
