//! Operator alert endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::{api_error, bad_body, internal_error, ApiError, ApiState};
use crate::validation::is_valid_alert_id;

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    pub archived: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAlertRequest {
    pub archived: bool,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AlertSummary {
    pub alert_id: String,
    pub message: String,
}

/// `GET /api/alerts?archived=true|false`
pub async fn list_alerts(
    State(state): State<ApiState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<Vec<AlertSummary>>, ApiError> {
    let archived = match query.archived.as_deref() {
        Some("true") => true,
        Some("false") => false,
        _ => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "Query parameter 'archived' must be 'true' or 'false'",
            ))
        }
    };

    let alerts = state.repository.list_alerts(archived).await.map_err(internal_error)?;
    Ok(Json(
        alerts
            .into_iter()
            .map(|alert| AlertSummary {
                alert_id: alert.alert_id,
                message: alert.message,
            })
            .collect(),
    ))
}

/// `PUT /api/alerts/:id`
pub async fn update_alert(
    State(state): State<ApiState>,
    Path(alert_id): Path<String>,
    payload: Result<Json<UpdateAlertRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    if !is_valid_alert_id(&alert_id) {
        return Err(api_error(StatusCode::BAD_REQUEST, "Invalid alert_id"));
    }
    let Json(body) = payload.map_err(bad_body)?;

    let updated = state
        .repository
        .set_alert_archived(&alert_id, body.archived)
        .await
        .map_err(internal_error)?;
    if !updated {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Alert {} not found", alert_id),
        ));
    }

    tracing::info!(alert_id = %alert_id, archived = body.archived, "Alert updated");
    Ok(StatusCode::OK)
}
