//! Router assembly for the image API

use super::{handlers, ApiError, AppState};
use axum::{
    body::{Body, Bytes, HttpBody},
    extract::DefaultBodyLimit,
    http::{header, Method, Response, StatusCode},
    middleware::map_response,
    response::IntoResponse,
    routing::{get, post},
    BoxError, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

/// Build the API router
///
/// The body limit comes from the server profile and replaces axum's default.
/// Requests refused on `Content-Length` alone still get the JSON envelope.
pub fn create_router(state: AppState) -> Router {
    let max_body_bytes = state.config.max_body_bytes;

    Router::new()
        .route("/health", get(handlers::health))
        .route("/remove_background", post(handlers::remove_background))
        .route("/change_background", post(handlers::change_background))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(map_response(envelope_oversized_body))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

async fn envelope_oversized_body<B>(response: Response<B>) -> axum::response::Response
where
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    if response.status() == StatusCode::PAYLOAD_TOO_LARGE && !is_json {
        return ApiError::PayloadTooLarge("Request body exceeds the size limit".to_string())
            .into_response();
    }
    response.map(Body::new)
}

/// Browsers on any origin may call the API
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
        ])
}
