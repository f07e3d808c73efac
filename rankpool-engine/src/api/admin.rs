//! Maintenance endpoints

use axum::{extract::State, Json};
use serde::Serialize;

use super::{ApiResult, AppState};
use crate::thresholds::RebuildStats;

#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    pub tables: usize,
    pub populated: usize,
    pub stats: Vec<RebuildStats>,
}

/// POST /api/admin/rebuild
///
/// Rebuilds every threshold table from the seed pool and the ledger.
pub async fn post_rebuild(State(state): State<AppState>) -> ApiResult<Json<RebuildResponse>> {
    let stats = state.engine.rebuild_all().await?;

    Ok(Json(RebuildResponse {
        tables: stats.len(),
        populated: stats.iter().filter(|s| s.population > 0).count(),
        stats,
    }))
}
