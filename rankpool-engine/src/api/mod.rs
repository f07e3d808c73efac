//! HTTP API for the ranking engine

pub mod admin;
pub mod athletes;
pub mod health;
pub mod percentile;


use crate::engine::Engine;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use thiserror::Error;

pub use health::health_routes;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/percentile", get(percentile::get_percentile))
        .route("/api/thresholds/:metric/:level", get(percentile::get_threshold_table))
        .route("/api/tests", post(athletes::post_test))
        .route("/api/athletes/:id/snapshots", get(athletes::get_snapshots))
        .route("/api/athletes/:id/composites", get(athletes::get_composites))
        .route("/api/athletes/:id/percentiles", get(athletes::get_current_percentiles))
        .route("/api/athletes/:id/contributions", get(athletes::get_contributions))
        .route("/api/athletes/:id/play-level", put(athletes::put_play_level))
        .route("/api/athletes/:id/recalculate", post(athletes::post_recalculate))
        .route("/api/athletes/:id/composite", post(athletes::post_composite))
        .route("/api/athletes/:id/contributions/reconcile", post(athletes::post_reconcile))
        .route("/api/admin/rebuild", post(admin::post_rebuild));

    Router::new().merge(api).merge(health_routes()).with_state(state)
}

/// Handler error, rendered as `{"error": {"code", "message"}}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Writer contention outlasted the retry budget
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl From<rankpool_common::Error> for ApiError {
    fn from(err: rankpool_common::Error) -> Self {
        use rankpool_common::Error;

        if err.is_lock_contention() {
            return ApiError::Conflict(err.to_string());
        }
        match err {
            Error::InvalidInput(msg) | Error::Csv(msg) | Error::Config(msg) => {
                ApiError::BadRequest(msg)
            }
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::Internal(msg) if msg.contains("database locked") => ApiError::Conflict(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
