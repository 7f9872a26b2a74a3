//! Request handlers for the image API

use super::{
    error::{ApiError, ApiResult},
    AppState,
};
use crate::services::{ImageRequest, ImageResponse, ImageService};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub profile: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Liveness probe, also reports whether the model is resident
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model_loaded: state.service.model_loaded(),
        profile: state.config.profile.as_str(),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn remove_background(
    State(state): State<AppState>,
    payload: Result<Json<ImageRequest>, JsonRejection>,
) -> ApiResult<Json<ImageResponse>> {
    let Json(request) = payload?;
    let image_base64 = request.require_image()?.to_string();

    let encoded = run_blocking(state.service, move |service| {
        service.remove_background(&image_base64)
    })
    .await?;

    Ok(Json(ImageResponse::success(encoded)))
}

pub async fn change_background(
    State(state): State<AppState>,
    payload: Result<Json<ImageRequest>, JsonRejection>,
) -> ApiResult<Json<ImageResponse>> {
    let Json(request) = payload?;
    let image_base64 = request.require_image()?.to_string();
    let background = request.background()?;

    let encoded = run_blocking(state.service, move |service| {
        service.change_background(&image_base64, &background)
    })
    .await?;

    Ok(Json(ImageResponse::success(encoded)))
}

/// Run CPU-bound work off the async executor
async fn run_blocking<T, F>(service: Arc<ImageService>, work: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&ImageService) -> crate::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || work(&service))
        .await
        .map_err(|e| ApiError::internal(format!("Processing task failed: {e}")))?
        .map_err(ApiError::from)
}
