use sqlx::Connection;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use tracing::info;

/// Ordered schema migrations. Each entry runs once, inside its own transaction.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../migrations/001_initial.sql"))];

/// Create and initialize a SQLite connection pool with WAL mode.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    info!("database connected: {}", database_url);
    Ok(pool)
}

/// Run all pending migrations against the database.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (\
            version     INTEGER PRIMARY KEY, \
            applied_at  TEXT NOT NULL DEFAULT (datetime('now'))\
        )",
    )
    .execute(pool)
    .await?;

    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(pool)
            .await?;

    for &(version, sql) in MIGRATIONS {
        if version <= current_version {
            continue;
        }
        info!("applying migration {version}...");
        let mut conn = pool.acquire().await?;
        // Schema text and version row commit together or not at all.
        let mut tx = conn.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    let final_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0);
    info!("database migrations applied (version: {final_version})");
    Ok(())
}
