//! Database schema migrations
//!
//! Versioned, idempotent upgrades for databases created by older builds.
//! `CREATE TABLE IF NOT EXISTS` in [`crate::db::init`] always describes the
//! newest schema; migrations bring existing tables up to it.
//!
//! # Migration Guidelines
//!
//! 1. Never modify existing migrations
//! 2. Always add a new migration function for each schema change
//! 3. Check before altering, so a migration can run twice safely

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// Increment this when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: add the optimistic `version` column to snapshots
///
/// Snapshot tables created before batch recalculation existed have no
/// version counter.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    if !column_exists(pool, "snapshots", "version").await? {
        sqlx::query("ALTER TABLE snapshots ADD COLUMN version INTEGER NOT NULL DEFAULT 0")
            .execute(pool)
            .await?;
        info!("  Added version column to snapshots table");
    }
    Ok(())
}

/// Migration v2: index for latest-snapshot-per-component queries
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_snapshots_athlete_level
        ON snapshots(athlete_id, play_level, metric, test_date)
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn column_exists(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
        .bind(table)
        .bind(column)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn create_version_table(pool: &SqlitePool) {
        sqlx::query(
            r#"
            CREATE TABLE schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_get_schema_version_no_table() {
        let pool = setup_test_db().await;
        assert_eq!(get_schema_version(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_v1_adds_version_column_to_legacy_snapshots() {
        let pool = setup_test_db().await;
        create_version_table(&pool).await;

        sqlx::query(
            r#"
            CREATE TABLE snapshots (
                id INTEGER PRIMARY KEY,
                athlete_id TEXT,
                metric TEXT,
                play_level TEXT,
                test_date TEXT
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"
            INSERT INTO snapshots (athlete_id, metric, play_level, test_date)
            VALUES ('a', 'm', 'Pro', '2024-01-01')
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        run_migrations(&pool).await.unwrap();

        assert!(column_exists(&pool, "snapshots", "version").await.unwrap());
        let version: i64 = sqlx::query_scalar("SELECT version FROM snapshots")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, 0);
        assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = setup_test_db().await;
        create_version_table(&pool).await;
        sqlx::query(
            r#"
            CREATE TABLE snapshots (
                id INTEGER PRIMARY KEY,
                athlete_id TEXT,
                metric TEXT,
                play_level TEXT,
                test_date TEXT,
                version INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        run_migrations(&pool).await.unwrap();
        migrate_v1(&pool).await.unwrap();
        migrate_v2(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
    }
}
