//! Database initialization
//!
//! Creates the database on first run, applies the schema, runs versioned
//! migrations and fills in default settings. Every step is idempotent, so
//! opening an existing database goes through the same path.

use crate::catalog::Metric;
use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

const PLAY_LEVEL_CHECK: &str = "('Youth', 'High School', 'College', 'Pro')";
/// Settings key for the lock retry budget of ledger and threshold writes
pub const MAX_LOCK_WAIT_SETTING: &str = "rebuild_max_lock_wait_ms";

const COHORT_CHECK: &str = "('Youth', 'High School', 'College', 'Pro', 'Overall')";

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL lets threshold readers see the last committed table while a
    // rebuild is writing the next one
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema_version_table(&pool).await?;
    create_settings_table(&pool).await?;
    create_metric_definitions_table(&pool).await?;
    create_athletes_table(&pool).await?;
    create_athlete_tests_table(&pool).await?;
    create_seed_values_table(&pool).await?;
    create_contributions_table(&pool).await?;
    create_thresholds_table(&pool).await?;
    create_snapshots_table(&pool).await?;
    create_composites_table(&pool).await?;

    crate::db::migrations::run_migrations(&pool).await?;

    init_default_settings(&pool).await?;

    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores runtime configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the metric definitions table and register the static catalog
///
/// Definitions are immutable: existing rows are never touched.
async fn create_metric_definitions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metric_definitions (
            name TEXT PRIMARY KEY,
            test_type TEXT NOT NULL CHECK (test_type IN ('CMJ', 'SJ', 'HJ', 'PPU', 'IMTP')),
            display_name TEXT NOT NULL,
            unit TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    for metric in Metric::ALL {
        let def = metric.definition();
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO metric_definitions (name, test_type, display_name, unit)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(def.name)
        .bind(def.test_type.as_str())
        .bind(def.display_name)
        .bind(def.unit)
        .execute(pool)
        .await?;
    }

    Ok(())
}

async fn create_athletes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS athletes (
            athlete_id TEXT PRIMARY KEY,
            play_level TEXT CHECK (play_level IS NULL OR play_level IN {levels}),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
        levels = PLAY_LEVEL_CHECK
    ))
    .execute(pool)
    .await?;

    Ok(())
}

/// Registry of tests seen per athlete, used to count prior qualifying tests
async fn create_athlete_tests_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS athlete_tests (
            athlete_id TEXT NOT NULL,
            test_id TEXT NOT NULL,
            test_type TEXT NOT NULL,
            play_level TEXT NOT NULL CHECK (play_level IN {levels}),
            test_date TEXT NOT NULL,
            qualifying INTEGER NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (athlete_id, test_id, test_type)
        )
        "#,
        levels = PLAY_LEVEL_CHECK
    ))
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_athlete_tests_level
        ON athlete_tests(athlete_id, test_type, play_level)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_seed_values_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS seed_values (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            metric TEXT NOT NULL REFERENCES metric_definitions(name),
            play_level TEXT NOT NULL CHECK (play_level IN {levels}),
            value REAL NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
        levels = PLAY_LEVEL_CHECK
    ))
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_seed_values_pair ON seed_values(metric, play_level)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Contribution ledger: at most one row per (athlete, metric, play level)
async fn create_contributions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS contributions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            athlete_id TEXT NOT NULL,
            metric TEXT NOT NULL REFERENCES metric_definitions(name),
            play_level TEXT NOT NULL CHECK (play_level IN {levels}),
            value REAL NOT NULL,
            test_id TEXT NOT NULL,
            test_date TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (athlete_id, metric, play_level)
        )
        "#,
        levels = PLAY_LEVEL_CHECK
    ))
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_contributions_pair
        ON contributions(metric, play_level)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_thresholds_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS thresholds (
            metric TEXT NOT NULL REFERENCES metric_definitions(name),
            cohort TEXT NOT NULL CHECK (cohort IN {cohorts}),
            percentile INTEGER NOT NULL CHECK (percentile >= 0 AND percentile <= 100),
            value REAL,
            population INTEGER NOT NULL CHECK (population >= 0),
            rebuilt_at TEXT NOT NULL,
            PRIMARY KEY (metric, cohort, percentile)
        )
        "#,
        cohorts = COHORT_CHECK
    ))
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_snapshots_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            athlete_id TEXT NOT NULL,
            test_id TEXT NOT NULL,
            test_type TEXT NOT NULL,
            metric TEXT NOT NULL REFERENCES metric_definitions(name),
            value REAL NOT NULL,
            play_level TEXT NOT NULL CHECK (play_level IN {levels}),
            test_date TEXT NOT NULL,
            percentile_level INTEGER
                CHECK (percentile_level IS NULL OR percentile_level BETWEEN 0 AND 100),
            percentile_overall INTEGER
                CHECK (percentile_overall IS NULL OR percentile_overall BETWEEN 0 AND 100),
            version INTEGER NOT NULL DEFAULT 0,
            recorded_at TEXT NOT NULL,
            UNIQUE (athlete_id, metric, test_id, play_level)
        )
        "#,
        levels = PLAY_LEVEL_CHECK
    ))
    .execute(pool)
    .await?;

    Ok(())
}

/// Composite log: one row per (athlete, play level, calendar day)
async fn create_composites_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS composites (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            athlete_id TEXT NOT NULL,
            play_level TEXT NOT NULL CHECK (play_level IN {levels}),
            test_date TEXT NOT NULL,
            test_day TEXT NOT NULL,
            percentile_level REAL NOT NULL,
            percentile_overall REAL NOT NULL,
            component_count INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (athlete_id, play_level, test_day)
        )
        "#,
        levels = PLAY_LEVEL_CHECK
    ))
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or repair default settings
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(
        pool,
        MAX_LOCK_WAIT_SETTING,
        &crate::config::DEFAULT_MAX_LOCK_WAIT_MS.to_string(),
    )
    .await?;

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset to the default.
async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match value {
        None => {
            // INSERT OR IGNORE covers two processes initializing at once
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;
            info!("Initialized setting '{}' with default value: {}", key, default_value);
        }
        Some(None) => {
            sqlx::query(
                "UPDATE settings SET value = ?, updated_at = CURRENT_TIMESTAMP WHERE key = ?",
            )
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;
            warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
        }
        Some(Some(_)) => {}
    }

    Ok(())
}

/// Read a numeric setting, falling back to `default` when absent or unparsable
pub async fn load_setting_u64(pool: &SqlitePool, key: &str, default: u64) -> Result<u64> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    Ok(match value.flatten() {
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Setting '{}' has invalid value '{}', using {}", key, raw, default);
                default
            }
        },
        None => default,
    })
}
