use axum::{
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
};

pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        "ok",
    )
}
