//! Sensor registration.
//!
//! Every successful change refreshes the [`SensorDirectory`] so the next
//! poll tick sees it. A newly registered sensor also gets its cursors
//! seeded from any rows already stored for its id.
//!
//! [`SensorDirectory`]: crate::directory::SensorDirectory

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};

use super::{api_error, bad_body, internal_error, ApiError, ApiState};
use crate::cursor::seed_cursors;
use crate::repository::is_unique_violation;
use crate::types::Sensor;
use crate::validation::{is_valid_sensor_api, is_valid_sensor_id};

async fn refresh_directory(state: &ApiState) -> Result<(), ApiError> {
    let count = state.directory.refresh(&state.repository).await.map_err(internal_error)?;
    state.metrics.registered_sensors.set(count as f64);
    Ok(())
}

/// `POST /api/registry`
pub async fn register_sensor(
    State(state): State<ApiState>,
    payload: Result<Json<Sensor>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(sensor) = payload.map_err(bad_body)?;
    if !is_valid_sensor_id(&sensor.id) {
        return Err(api_error(StatusCode::BAD_REQUEST, "Invalid wids_sensor_id"));
    }
    if !is_valid_sensor_api(&sensor.api) {
        return Err(api_error(StatusCode::BAD_REQUEST, "Invalid wids_sensor_api"));
    }

    let conflict = state.repository.sensor_conflicts(&sensor).await.map_err(internal_error)?;
    if conflict {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "The provided WIDS sensor ID or API is already registered",
        ));
    }

    match state.repository.insert_sensor(&sensor).await {
        Ok(()) => {}
        Err(err) if is_unique_violation(&err) => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "The provided WIDS sensor ID or API is already registered",
            ));
        }
        Err(err) => return Err(internal_error(err)),
    }

    tracing::info!(sensor = %sensor.id, api = %sensor.api, "Sensor registered");
    refresh_directory(&state).await?;
    seed_cursors(&state.repository, &state.cursors, &sensor)
        .await
        .map_err(internal_error)?;

    Ok(StatusCode::OK)
}

/// `DELETE /api/registry/:id`
pub async fn deregister_sensor(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !is_valid_sensor_id(&id) {
        return Err(api_error(StatusCode::BAD_REQUEST, "Invalid wids_sensor_id"));
    }

    let removed = state.repository.delete_sensor(&id).await.map_err(internal_error)?;
    if !removed {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("No WIDS sensor registered as '{}'", id),
        ));
    }

    tracing::info!(sensor = %id, "Sensor deregistered");
    refresh_directory(&state).await?;
    state.cursors.write().await.forget(&id);

    Ok(StatusCode::OK)
}

/// `GET /api/wids-sensors`
pub async fn list_sensors(State(state): State<ApiState>) -> Result<Json<Vec<Sensor>>, ApiError> {
    let sensors = state.repository.list_sensors().await.map_err(internal_error)?;
    Ok(Json(sensors))
}
