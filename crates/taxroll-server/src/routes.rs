use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;

use taxroll_core::error::AppError;

use crate::dto::{ErrorResponse, HealthResponse, VersionResponse};
use crate::error::ApiError;
use crate::state::AppState;

/// Build the full router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/v1/properties/{id}", get(get_property))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

pub async fn get_property(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let property_id: i64 = id
        .trim()
        .parse()
        .map_err(|_| AppError::MalformedInput(format!("property id is not numeric: {id}")))?;

    match state.db.property_repo().get(property_id).await? {
        Some(record) => Ok(axum::Json(record).into_response()),
        None => {
            let body =
                ErrorResponse::new("not_found", format!("Property not found: {property_id}"));
            Ok((StatusCode::NOT_FOUND, axum::Json(body)).into_response())
        }
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

pub async fn version() -> impl IntoResponse {
    axum::Json(VersionResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_status = match state.db.property_repo().health_check().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            "error"
        }
    };

    let status = if db_status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if db_status == "ok" {
            "healthy"
        } else {
            "unhealthy"
        },
        database: db_status,
    };

    (status, axum::Json(response))
}
