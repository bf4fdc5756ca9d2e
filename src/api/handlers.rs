//! Request handlers for the proxy-facing endpoints

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::error::ApiError;
use super::routes::ApiState;
use crate::errors::RouteplaneError;
use crate::VERSION;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: VERSION.to_string(),
        }),
    )
}

/// The merged dynamic configuration the proxy polls.
///
/// The body is the document's canonical serialization, so unchanged inputs
/// produce an identical response.
pub async fn proxy_config_handler(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let document = state.merger.get_merged_config().await.map_err(|e| {
        error!(error = %e, "Failed to build proxy configuration");
        ApiError::from(e)
    })?;

    let body = document.to_json_bytes().map_err(RouteplaneError::from)?;

    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}
