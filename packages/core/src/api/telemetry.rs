//! Chart reads over stored telemetry: sensor utilization and the
//! per-network time series.
//!
//! Every series is returned as `[{x, y}]` with `x` in epoch milliseconds.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{api_error, internal_error, ApiError, ApiState};
use crate::repository::{DeviceFilter, SeriesFilter};
use crate::types::{MetricKind, UtilizationSample};
use crate::validation::{is_valid_sensor_id, parse_hours};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartPoint {
    pub x: f64,
    pub y: f64,
}

impl ChartPoint {
    fn at(timestamp: f64, y: f64) -> Self {
        Self {
            x: timestamp * 1000.0,
            y,
        }
    }
}

/// Resource columns of a utilization sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Cpu,
    Memory,
    Disk,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Cpu, Resource::Memory, Resource::Disk];

    pub fn route(self) -> &'static str {
        match self {
            Resource::Cpu => "/api/wids-sensors/:id/cpu",
            Resource::Memory => "/api/wids-sensors/:id/memory",
            Resource::Disk => "/api/wids-sensors/:id/disk",
        }
    }

    fn value(self, sample: &UtilizationSample) -> f64 {
        match self {
            Resource::Cpu => sample.cpu_percent,
            Resource::Memory => sample.memory_percent,
            Resource::Disk => sample.disk_percent,
        }
    }
}

/// Operator route serving one time series.
pub fn series_route(kind: MetricKind) -> &'static str {
    match kind {
        MetricKind::PacketCounters => "/api/packet-counters",
        MetricKind::ByteCounters => "/api/byte-counters",
        MetricKind::MacSeqnums => "/api/mac-seqnum",
        MetricKind::BeaconSeqnums => "/api/beacon-seqnum",
        MetricKind::NwkSeqnums => "/api/nwk-seqnum",
        MetricKind::NwkAuxSeqnums => "/api/nwkaux-seqnum",
        MetricKind::BatteryPercentages => "/api/battery-percentages",
    }
}

#[derive(Debug, Deserialize)]
pub struct HoursQuery {
    pub hours: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeriesQuery {
    pub sensor: Option<String>,
    pub hours: Option<String>,
    pub srcpanid: Option<String>,
    pub srcshortaddr: Option<String>,
}

/// Start of the look-back window, or 400 when `hours` is missing or not a
/// positive number.
pub(crate) fn window_start(hours: Option<&str>) -> Result<f64, ApiError> {
    let hours = hours.and_then(parse_hours).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            "Query parameter 'hours' must be a positive number",
        )
    })?;
    let now = Utc::now().timestamp_millis() as f64 / 1000.0;
    Ok(now - hours * 3600.0)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// `GET /api/wids-sensors/:id/{cpu,memory,disk}?hours=`
pub async fn utilization(
    resource: Resource,
    State(state): State<ApiState>,
    Path(sensor_id): Path<String>,
    Query(query): Query<HoursQuery>,
) -> Result<Json<Vec<ChartPoint>>, ApiError> {
    if !is_valid_sensor_id(&sensor_id) {
        return Err(api_error(StatusCode::BAD_REQUEST, "Invalid wids_sensor_id"));
    }
    let since = window_start(query.hours.as_deref())?;

    let samples = state
        .repository
        .fetch_utilization_since(&sensor_id, since)
        .await
        .map_err(internal_error)?;
    Ok(Json(
        samples
            .iter()
            .map(|sample| ChartPoint::at(sample.epoch_timestamp, resource.value(sample)))
            .collect(),
    ))
}

/// `GET /api/<series>?sensor=&hours=&srcpanid=&srcshortaddr=`
///
/// Counters without `srcshortaddr` read the network-aggregate rows; every
/// other series needs a device.
pub async fn series(
    kind: MetricKind,
    State(state): State<ApiState>,
    Query(query): Query<SeriesQuery>,
) -> Result<Json<Vec<ChartPoint>>, ApiError> {
    let sensor_id = query.sensor.unwrap_or_default();
    if !is_valid_sensor_id(&sensor_id) {
        return Err(api_error(StatusCode::BAD_REQUEST, "Invalid sensor"));
    }
    let since = window_start(query.hours.as_deref())?;
    let src_pan_id = non_empty(query.srcpanid)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing srcpanid"))?;
    let device = match non_empty(query.srcshortaddr) {
        Some(addr) => DeviceFilter::Device(addr),
        None if kind.is_hierarchical() => DeviceFilter::NetworkAggregate,
        None => return Err(api_error(StatusCode::BAD_REQUEST, "Missing srcshortaddr")),
    };

    let filter = SeriesFilter {
        since: Some(since),
        src_pan_id: Some(src_pan_id),
        device,
    };
    let rows = state
        .repository
        .fetch_timeseries(kind, &sensor_id, &filter)
        .await
        .map_err(internal_error)?;
    Ok(Json(
        rows.iter()
            .map(|row| ChartPoint::at(row.timestamp, row.value))
            .collect(),
    ))
}
