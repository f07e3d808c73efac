//! Test ingestion and per-athlete endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rankpool_common::db::{CompositeRow, ContributionRow, SnapshotRow};
use rankpool_common::{Metric, PlayLevel, TestType};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{ApiResult, AppState};
use crate::composite::CompositeOutcome;
use crate::engine::{LevelChangeReport, ReconcileReport};
use crate::pipeline::{ProcessReport, TestRecord};
use crate::snapshot::{RecalculateSummary, SnapshotFilter};

/// POST /api/tests
pub async fn post_test(
    State(state): State<AppState>,
    Json(record): Json<TestRecord>,
) -> ApiResult<Json<ProcessReport>> {
    let report = state.engine.process(&record).await?;
    Ok(Json(report))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub level: Option<PlayLevel>,
    pub test_type: Option<TestType>,
}

/// GET /api/athletes/:id/snapshots?level=..&test_type=..
pub async fn get_snapshots(
    State(state): State<AppState>,
    Path(athlete_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Vec<SnapshotRow>>> {
    let filter = SnapshotFilter {
        play_level: params.level,
        test_type: params.test_type,
    };
    Ok(Json(state.engine.snapshot_history(athlete_id, &filter).await?))
}

/// GET /api/athletes/:id/composites?level=..
pub async fn get_composites(
    State(state): State<AppState>,
    Path(athlete_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Vec<CompositeRow>>> {
    Ok(Json(state.engine.composite_history(athlete_id, params.level).await?))
}

/// GET /api/athletes/:id/percentiles?level=..
///
/// Latest snapshot per metric; the level defaults to the athlete's current one.
pub async fn get_current_percentiles(
    State(state): State<AppState>,
    Path(athlete_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Vec<SnapshotRow>>> {
    Ok(Json(state.engine.current_percentiles(athlete_id, params.level).await?))
}

/// GET /api/athletes/:id/contributions
pub async fn get_contributions(
    State(state): State<AppState>,
    Path(athlete_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ContributionRow>>> {
    Ok(Json(state.engine.contributions(athlete_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PlayLevelRequest {
    pub play_level: PlayLevel,
}

/// PUT /api/athletes/:id/play-level
pub async fn put_play_level(
    State(state): State<AppState>,
    Path(athlete_id): Path<Uuid>,
    Json(request): Json<PlayLevelRequest>,
) -> ApiResult<Json<LevelChangeReport>> {
    Ok(Json(state.engine.change_play_level(athlete_id, request.play_level).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct RecalculateRequest {
    pub play_level: Option<PlayLevel>,
    pub test_ids: Option<Vec<String>>,
}

/// POST /api/athletes/:id/recalculate
pub async fn post_recalculate(
    State(state): State<AppState>,
    Path(athlete_id): Path<Uuid>,
    Json(request): Json<RecalculateRequest>,
) -> ApiResult<Json<RecalculateSummary>> {
    let summary = state
        .engine
        .recalculate(athlete_id, request.play_level, request.test_ids.as_deref())
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Default, Deserialize)]
pub struct CompositeRequest {
    pub play_level: Option<PlayLevel>,
    pub as_of: Option<DateTime<Utc>>,
}

/// POST /api/athletes/:id/composite
///
/// 201 with the new row, 200 when that day already had one, 422 with the
/// missing and mismatched components when the set is incomplete.
pub async fn post_composite(
    State(state): State<AppState>,
    Path(athlete_id): Path<Uuid>,
    Json(request): Json<CompositeRequest>,
) -> ApiResult<Response> {
    let outcome = state
        .engine
        .compute_composite(athlete_id, request.play_level, request.as_of)
        .await?;

    let response = match outcome {
        CompositeOutcome::Written(row) => {
            (StatusCode::CREATED, Json(json!({ "composite": row }))).into_response()
        }
        CompositeOutcome::AlreadyRecorded(row) => (
            StatusCode::OK,
            Json(json!({ "composite": row, "already_recorded": true })),
        )
            .into_response(),
        CompositeOutcome::Incomplete(shortfall) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "error": {
                    "code": "composite_incomplete",
                    "message": format!(
                        "{} of 6 components ranked against {}, {} against Overall",
                        shortfall.level_count, shortfall.play_level, shortfall.overall_count
                    ),
                },
                "shortfall": shortfall,
            })),
        )
            .into_response(),
    };

    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub metric: Metric,
    pub play_level: PlayLevel,
}

/// POST /api/athletes/:id/contributions/reconcile
pub async fn post_reconcile(
    State(state): State<AppState>,
    Path(athlete_id): Path<Uuid>,
    Json(request): Json<ReconcileRequest>,
) -> ApiResult<Json<ReconcileReport>> {
    let report = state
        .engine
        .reconcile(athlete_id, request.metric, request.play_level)
        .await?;
    Ok(Json(report))
}
