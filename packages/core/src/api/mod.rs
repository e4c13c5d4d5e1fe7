//! Operator HTTP API.
//!
//! Routes:
//! - `POST   /api/registry`          register a sensor
//! - `DELETE /api/registry/:id`      deregister a sensor
//! - `GET    /api/wids-sensors`      list registered sensors
//! - `GET    /api/alerts?archived=`  list alerts by archive flag
//! - `PUT    /api/alerts/:id`        archive or restore an alert
//! - `GET    /api/wids-sensors/:id/{cpu,memory,disk}?hours=`
//! - `GET    /api/packet-counters` and the other series, see [`telemetry`]
//! - `GET    /api/nearby-networks`, `/api/pan-identifiers`
//! - `GET    /api/short-addresses?panid=`, `/api/topology/:panid?hours=`
//! - `GET    /api/archived-files`, `/api/archived-files/:folder/:file`
//! - `GET    /health`, `GET /metrics`

pub mod alerts;
pub mod archive;
pub mod health;
pub mod registry;
pub mod telemetry;
pub mod topology;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, MatchedPath, Path, Query, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};

use crate::cursor::SharedCursors;
use crate::directory::SensorDirectory;
use crate::metrics::AppMetrics;
use crate::repository::AggregatorRepository;
use crate::retention::PcapArchive;
use crate::types::MetricKind;
use telemetry::{HoursQuery, Resource, SeriesQuery};

/// Shared state for every route.
#[derive(Clone)]
pub struct ApiState {
    pub repository: Arc<AggregatorRepository>,
    pub directory: SensorDirectory,
    pub cursors: SharedCursors,
    pub metrics: Arc<AppMetrics>,
    /// Archived captures; `None` when archiving is not configured.
    pub archive: Option<PcapArchive>,
}

/// Error body shape shared by all handlers: `{"error": "..."}`.
pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

/// Malformed JSON bodies are client errors like any other invalid field.
pub(crate) fn bad_body(rejection: JsonRejection) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, rejection.body_text())
}

pub(crate) fn internal_error(err: impl std::fmt::Display) -> ApiError {
    tracing::error!("Request failed: {}", err);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

/// Build the full router. `origin` restricts CORS to one origin; `None`
/// allows any.
pub fn create_router(state: ApiState, origin: Option<HeaderValue>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);
    let cors = match origin {
        Some(origin) => cors.allow_origin(origin),
        None => cors.allow_origin(Any),
    };

    let mut router: Router<ApiState> = Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(metrics_handler))
        .route("/api/registry", post(registry::register_sensor))
        .route("/api/registry/:id", delete(registry::deregister_sensor))
        .route("/api/wids-sensors", get(registry::list_sensors))
        .route("/api/alerts", get(alerts::list_alerts))
        .route("/api/alerts/:id", put(alerts::update_alert))
        .route("/api/nearby-networks", get(topology::nearby_networks))
        .route("/api/pan-identifiers", get(topology::pan_identifiers))
        .route("/api/short-addresses", get(topology::short_addresses))
        .route("/api/topology/:id", get(topology::topology))
        .route("/api/archived-files", get(archive::list_archived_files))
        .route(
            "/api/archived-files/:folder/:file",
            get(archive::download_archived_file),
        );

    for resource in Resource::ALL {
        router = router.route(
            resource.route(),
            get(
                move |state: State<ApiState>, id: Path<String>, query: Query<HoursQuery>| {
                    telemetry::utilization(resource, state, id, query)
                },
            ),
        );
    }
    for kind in MetricKind::ALL {
        router = router.route(
            telemetry::series_route(kind),
            get(move |state: State<ApiState>, query: Query<SeriesQuery>| {
                telemetry::series(kind, state, query)
            }),
        );
    }

    router
        .route_layer(middleware::from_fn_with_state(state.metrics.clone(), track_http))
        .layer(cors)
        .with_state(state)
}

/// `GET /metrics`: Prometheus text exposition.
async fn metrics_handler(State(state): State<ApiState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            Body::from(body),
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Count and time every matched request.
async fn track_http(State(metrics): State<Arc<AppMetrics>>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let started = Instant::now();
    let response = next.run(request).await;

    metrics
        .http_requests_total
        .with_label_values(&[method.as_str(), path.as_str(), response.status().as_str()])
        .inc();
    metrics
        .http_request_duration
        .observe(started.elapsed().as_secs_f64());

    response
}
