use super::AggregatorRepository;
use crate::types::{Alert, AlertCandidate, RawEvent};

impl AggregatorRepository {
    // ---- Raw events ----

    /// Insert a raw event and return its row id.
    pub async fn insert_event(
        &self,
        sensor_id: &str,
        timestamp: f64,
        description: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO wids_events (wids_sensor_id, epoch_timestamp, description)
             VALUES (?, ?, ?)",
        )
        .bind(sensor_id)
        .bind(timestamp)
        .bind(description)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Events not yet claimed by an inspection pass, oldest first.
    pub async fn list_uninspected_events(&self) -> Result<Vec<RawEvent>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT row_id, wids_sensor_id, epoch_timestamp, description, inspected
             FROM wids_events
             WHERE inspected = 0
             ORDER BY epoch_timestamp ASC, row_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let events = rows
            .into_iter()
            .filter_map(|row| {
                use sqlx::Row;
                Some(RawEvent {
                    row_id: row.try_get("row_id").ok()?,
                    sensor_id: row.try_get("wids_sensor_id").ok()?,
                    timestamp: row.try_get("epoch_timestamp").ok()?,
                    description: row.try_get("description").ok()?,
                    inspected: row.try_get("inspected").ok()?,
                })
            })
            .collect();

        Ok(events)
    }

    /// Claim an event for the calling inspection pass. Only the first caller
    /// for a given row sees `true`.
    pub async fn mark_event_inspected(&self, row_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE wids_events SET inspected = 1 WHERE row_id = ? AND inspected = 0")
            .bind(row_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ---- Operator alerts ----

    /// Timestamp of the newest alert carrying exactly `message`.
    pub async fn max_alert_timestamp(&self, message: &str) -> Result<Option<f64>, sqlx::Error> {
        let row = sqlx::query("SELECT MAX(epoch_timestamp) AS max_ts FROM nsm_alerts WHERE message = ?")
            .bind(message)
            .fetch_one(&self.pool)
            .await?;

        use sqlx::Row;
        Ok(row.try_get::<Option<f64>, _>("max_ts").ok().flatten())
    }

    pub async fn insert_alert(&self, candidate: &AlertCandidate) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO nsm_alerts (alert_id, message, epoch_timestamp) VALUES (?, ?, ?)")
            .bind(&candidate.alert_id)
            .bind(&candidate.message)
            .bind(candidate.timestamp)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Largest `<epoch>` among stored `HG<epoch>E<n>` ids.
    pub async fn max_alert_epoch(&self) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT MAX(CAST(substr(alert_id, 3, instr(alert_id, 'E') - 3) AS INTEGER)) AS epoch
             FROM nsm_alerts",
        )
        .fetch_one(&self.pool)
        .await?;

        use sqlx::Row;
        Ok(row.try_get::<Option<i64>, _>("epoch").ok().flatten())
    }

    /// Largest `<n>` among stored ids of the form `HG<epoch>E<n>`.
    pub async fn max_alert_index(&self, epoch: i64) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT MAX(CAST(substr(alert_id, instr(alert_id, 'E') + 1) AS INTEGER)) AS idx
             FROM nsm_alerts WHERE alert_id LIKE ?",
        )
        .bind(format!("HG{}E%", epoch))
        .fetch_one(&self.pool)
        .await?;

        use sqlx::Row;
        Ok(row.try_get::<Option<i64>, _>("idx").ok().flatten())
    }

    /// Alerts the digest has not delivered yet, newest id first.
    pub async fn list_unnotified_alerts(&self) -> Result<Vec<Alert>, sqlx::Error> {
        self.query_alerts(
            "SELECT alert_id, message, epoch_timestamp, archived, notified
             FROM nsm_alerts WHERE notified = 0 ORDER BY alert_id DESC",
            None,
        )
        .await
    }

    pub async fn mark_alert_notified(&self, alert_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE nsm_alerts SET notified = 1 WHERE alert_id = ?")
            .bind(alert_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Alerts filtered by archive flag, ordered by id descending.
    pub async fn list_alerts(&self, archived: bool) -> Result<Vec<Alert>, sqlx::Error> {
        self.query_alerts(
            "SELECT alert_id, message, epoch_timestamp, archived, notified
             FROM nsm_alerts WHERE archived = ? ORDER BY alert_id DESC",
            Some(archived),
        )
        .await
    }

    pub async fn find_alert(&self, alert_id: &str) -> Result<Option<Alert>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT alert_id, message, epoch_timestamp, archived, notified
             FROM nsm_alerts WHERE alert_id = ?",
        )
        .bind(alert_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|row| alert_from_row(&row)))
    }

    /// Returns `true` if the alert exists.
    pub async fn set_alert_archived(&self, alert_id: &str, archived: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE nsm_alerts SET archived = ? WHERE alert_id = ?")
            .bind(archived)
            .bind(alert_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query_alerts(&self, sql: &str, archived: Option<bool>) -> Result<Vec<Alert>, sqlx::Error> {
        let mut query = sqlx::query(sql);
        if let Some(archived) = archived {
            query = query.bind(archived);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().filter_map(alert_from_row).collect())
    }
}

fn alert_from_row(row: &sqlx::sqlite::SqliteRow) -> Option<Alert> {
    use sqlx::Row;
    Some(Alert {
        alert_id: row.try_get("alert_id").ok()?,
        message: row.try_get("message").ok()?,
        timestamp: row.try_get("epoch_timestamp").ok()?,
        archived: row.try_get("archived").ok()?,
        notified: row.try_get("notified").ok()?,
    })
}
