//! Athlete registry
//!
//! Tracks the current play level of each athlete the engine has seen.
//! Historical levels live on snapshot rows, never here.

use rankpool_common::{PlayLevel, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Register an athlete, filling in the play level if none is stored yet
///
/// An existing level is never overwritten here; level changes go through
/// [`set_play_level`].
pub async fn ensure_athlete(
    pool: &SqlitePool,
    athlete_id: Uuid,
    play_level: Option<PlayLevel>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO athletes (athlete_id, play_level)
        VALUES (?, ?)
        ON CONFLICT(athlete_id) DO UPDATE SET
            play_level = COALESCE(athletes.play_level, excluded.play_level),
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(athlete_id.to_string())
    .bind(play_level.map(|l| l.as_str()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Current play level, `None` when the athlete is unknown or has no level
pub async fn current_play_level(pool: &SqlitePool, athlete_id: Uuid) -> Result<Option<PlayLevel>> {
    let level: Option<Option<String>> =
        sqlx::query_scalar("SELECT play_level FROM athletes WHERE athlete_id = ?")
            .bind(athlete_id.to_string())
            .fetch_optional(pool)
            .await?;

    level.flatten().map(|raw| raw.parse()).transpose()
}

/// Set the athlete's current play level, returning the previous one
pub async fn set_play_level(
    pool: &SqlitePool,
    athlete_id: Uuid,
    level: PlayLevel,
) -> Result<Option<PlayLevel>> {
    let previous = current_play_level(pool, athlete_id).await?;

    sqlx::query(
        r#"
        INSERT INTO athletes (athlete_id, play_level)
        VALUES (?, ?)
        ON CONFLICT(athlete_id) DO UPDATE SET
            play_level = excluded.play_level,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(athlete_id.to_string())
    .bind(level.as_str())
    .execute(pool)
    .await?;

    Ok(previous)
}
