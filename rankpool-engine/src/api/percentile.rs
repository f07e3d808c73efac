//! Percentile lookup and threshold table endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use rankpool_common::db::ThresholdRow;
use rankpool_common::{Cohort, Metric};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiResult, AppState};

/// Query parameters for GET /api/percentile
#[derive(Debug, Deserialize)]
pub struct PercentileQueryParams {
    pub metric: Metric,
    /// Play level or `Overall`
    pub level: Cohort,
    pub value: f64,
}

#[derive(Debug, Serialize)]
pub struct PercentileResponse {
    pub metric: Metric,
    pub level: Cohort,
    pub value: f64,
    /// `null` when the population is empty
    pub percentile: Option<u8>,
}

/// GET /api/percentile?metric=..&level=..&value=..
pub async fn get_percentile(
    State(state): State<AppState>,
    Query(params): Query<PercentileQueryParams>,
) -> ApiResult<Json<PercentileResponse>> {
    let percentile = state
        .engine
        .percentile(params.value, params.metric, params.level)
        .await?;

    Ok(Json(PercentileResponse {
        metric: params.metric,
        level: params.level,
        value: params.value,
        percentile,
    }))
}

#[derive(Debug, Serialize)]
pub struct ThresholdTableResponse {
    pub metric: Metric,
    pub level: Cohort,
    pub population: i64,
    pub rows: Vec<ThresholdRow>,
}

/// GET /api/thresholds/:metric/:level
pub async fn get_threshold_table(
    State(state): State<AppState>,
    Path((metric, level)): Path<(String, String)>,
) -> ApiResult<Json<ThresholdTableResponse>> {
    let metric: Metric = metric.parse().map_err(ApiError::from)?;
    let level: Cohort = level.parse().map_err(ApiError::from)?;

    let rows = state.engine.threshold_table(metric, level).await?;
    let population = rows.first().map(|r| r.population).unwrap_or(0);

    Ok(Json(ThresholdTableResponse {
        metric,
        level,
        population,
        rows,
    }))
}
