//! SQLite connection setup and schema migrations for the upload ledger.

use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use std::{path::Path, str::FromStr, time::Duration};

const MIGRATIONS: &[(&str, &str)] = &[("0001_init", include_str!("../migrations/0001_init.sql"))];

/// Open the ledger database, creating the file and its parent directory
/// when missing.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let opts = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database url `{}`", database_url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        // Writers from the server and a cron-driven sweep wait instead of failing.
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(opts)
        .await
        .with_context(|| format!("connecting to {}", database_url))?;

    Ok(pool)
}

/// Apply the embedded migrations. Every statement is idempotent.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        let statements = sql
            .split(';')
            .map(strip_comments)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running migration {} ({} statements)", name, statements.len());

        for stmt in statements {
            tracing::debug!("Executing migration SQL: {}", stmt);
            sqlx::query(&stmt)
                .execute(db)
                .await
                .with_context(|| format!("migration {} failed", name))?;
        }
    }
    Ok(())
}

fn strip_comments(chunk: &str) -> String {
    chunk
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn connect_creates_file_and_migrations_are_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("meta").join("ledger.db");
        let url = format!("sqlite://{}", path.display());

        let pool = connect(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
        assert!(path.exists());

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'uploads'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(tables, 1);
    }
}
