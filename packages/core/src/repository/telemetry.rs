use super::AggregatorRepository;
use crate::types::{MetricKind, TimeseriesRow, UtilizationSample};

/// Which device rows of a time series to return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeviceFilter {
    #[default]
    Any,
    /// Only network-aggregate rows (`srcshortaddr IS NULL`).
    NetworkAggregate,
    Device(String),
}

/// Narrowing applied on top of the sensor id when reading a time series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesFilter {
    /// Lower bound on `epoch_timestamp`, inclusive.
    pub since: Option<f64>,
    pub src_pan_id: Option<String>,
    pub device: DeviceFilter,
}

impl AggregatorRepository {
    /// Insert one time series row. Callers insert rows independently so a
    /// rejected row never blocks its siblings.
    pub async fn insert_timeseries_row(
        &self,
        kind: MetricKind,
        row: &TimeseriesRow,
    ) -> Result<(), sqlx::Error> {
        let sql = format!(
            "INSERT INTO {} (wids_sensor_id, epoch_timestamp, srcpanid, srcshortaddr, {})
             VALUES (?, ?, ?, ?, ?)",
            kind.table(),
            kind.value_column()
        );

        sqlx::query(&sql)
            .bind(&row.sensor_id)
            .bind(row.timestamp)
            .bind(&row.src_pan_id)
            .bind(&row.src_short_addr)
            .bind(row.value)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Rows of `kind` for `sensor_id` matching `filter`, oldest first.
    pub async fn fetch_timeseries(
        &self,
        kind: MetricKind,
        sensor_id: &str,
        filter: &SeriesFilter,
    ) -> Result<Vec<TimeseriesRow>, sqlx::Error> {
        let mut conditions = vec!["wids_sensor_id = ?"];
        if filter.since.is_some() {
            conditions.push("epoch_timestamp >= ?");
        }
        if filter.src_pan_id.is_some() {
            conditions.push("srcpanid = ?");
        }
        match filter.device {
            DeviceFilter::Any => {}
            DeviceFilter::NetworkAggregate => conditions.push("srcshortaddr IS NULL"),
            DeviceFilter::Device(_) => conditions.push("srcshortaddr = ?"),
        }

        let sql = format!(
            "SELECT wids_sensor_id, epoch_timestamp, srcpanid, srcshortaddr,
                    CAST({} AS REAL) AS value
             FROM {}
             WHERE {}
             ORDER BY epoch_timestamp ASC, rowid ASC",
            kind.value_column(),
            kind.table(),
            conditions.join(" AND ")
        );

        let mut query = sqlx::query(&sql).bind(sensor_id);
        if let Some(since) = filter.since {
            query = query.bind(since);
        }
        if let Some(pan) = &filter.src_pan_id {
            query = query.bind(pan);
        }
        if let DeviceFilter::Device(addr) = &filter.device {
            query = query.bind(addr);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let points = rows
            .into_iter()
            .filter_map(|row| {
                use sqlx::Row;
                Some(TimeseriesRow {
                    sensor_id: row.try_get("wids_sensor_id").ok()?,
                    timestamp: row.try_get("epoch_timestamp").ok()?,
                    src_pan_id: row.try_get("srcpanid").ok()?,
                    src_short_addr: row.try_get("srcshortaddr").ok()?,
                    value: row.try_get("value").ok()?,
                })
            })
            .collect();

        Ok(points)
    }

    pub async fn insert_utilization(
        &self,
        sensor_id: &str,
        sample: &UtilizationSample,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO wids_utilization
             (wids_sensor_id, epoch_timestamp, cpu_percent, memory_percent, disk_percent)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(sensor_id)
        .bind(sample.epoch_timestamp)
        .bind(sample.cpu_percent)
        .bind(sample.memory_percent)
        .bind(sample.disk_percent)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Utilization samples for `sensor_id` with timestamp >= `since`.
    pub async fn fetch_utilization_since(
        &self,
        sensor_id: &str,
        since: f64,
    ) -> Result<Vec<UtilizationSample>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT epoch_timestamp, cpu_percent, memory_percent, disk_percent
             FROM wids_utilization
             WHERE wids_sensor_id = ? AND epoch_timestamp >= ?
             ORDER BY epoch_timestamp ASC",
        )
        .bind(sensor_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let samples = rows
            .into_iter()
            .filter_map(|row| {
                use sqlx::Row;
                Some(UtilizationSample {
                    epoch_timestamp: row.try_get("epoch_timestamp").ok()?,
                    cpu_percent: row.try_get("cpu_percent").ok()?,
                    memory_percent: row.try_get("memory_percent").ok()?,
                    disk_percent: row.try_get("disk_percent").ok()?,
                })
            })
            .collect();

        Ok(samples)
    }
}
