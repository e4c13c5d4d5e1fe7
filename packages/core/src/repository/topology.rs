use sqlx::{Sqlite, Transaction};

use super::AggregatorRepository;
use crate::types::{
    ExtendedAddressRow, NetworkRow, ObservationSet, PairRow, ShortAddressRow, TopologyRow,
    TopologyTable,
};

/// Which rows of a topology table to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyScope<'a> {
    /// One sensor's current snapshot.
    Sensor(&'a str),
    /// Every sensor's rows for one PAN. Extended addresses carry no PAN, so
    /// for that table this reads every row.
    Pan(&'a str),
    All,
}

/// Result of replacing one sensor's snapshot of one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotOutcome {
    pub deleted: u64,
    pub inserted: usize,
    pub failed: usize,
}

impl AggregatorRepository {
    /// Replace every row of `table` belonging to `sensor_id` with `rows`.
    ///
    /// Delete and reinsert share one transaction, so readers see either the
    /// previous snapshot or the new one. A row the store rejects is logged
    /// and skipped; its siblings still commit.
    pub async fn replace_snapshot(
        &self,
        table: TopologyTable,
        sensor_id: &str,
        rows: &[TopologyRow],
    ) -> Result<SnapshotOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let delete_sql = format!("DELETE FROM {} WHERE wids_sensor_id = ?", table.table());
        let deleted = sqlx::query(&delete_sql)
            .bind(sensor_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let mut outcome = SnapshotOutcome {
            deleted,
            ..SnapshotOutcome::default()
        };

        for row in rows.iter().filter(|row| row.table() == table) {
            match insert_topology_row(&mut tx, sensor_id, row).await {
                Ok(()) => outcome.inserted += 1,
                Err(err) => {
                    outcome.failed += 1;
                    tracing::warn!(
                        sensor = sensor_id,
                        table = table.table(),
                        "Rejected snapshot row: {}",
                        err
                    );
                }
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Rows of `table` within `scope`, in insertion order.
    pub async fn fetch_topology(
        &self,
        table: TopologyTable,
        scope: TopologyScope<'_>,
    ) -> Result<Vec<TopologyRow>, sqlx::Error> {
        let (condition, bound) = match scope {
            TopologyScope::Sensor(sensor_id) => ("WHERE wids_sensor_id = ?", Some(sensor_id)),
            TopologyScope::Pan(panid) if table.has_panid() => ("WHERE panid = ?", Some(panid)),
            TopologyScope::Pan(_) | TopologyScope::All => ("", None),
        };
        let sql = format!("SELECT * FROM {} {} ORDER BY rowid ASC", table.table(), condition);

        let mut query = sqlx::query(&sql);
        if let Some(value) = bound {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let snapshot = rows
            .into_iter()
            .filter_map(|row| {
                use sqlx::Row;
                let set = |column: &str| -> Option<ObservationSet> {
                    let raw: String = row.try_get(column).ok()?;
                    Some(ObservationSet::from_column(&raw))
                };
                Some(match table {
                    TopologyTable::Networks => TopologyRow::Network(NetworkRow {
                        panid: row.try_get("panid").ok()?,
                        epidset: set("epidset")?,
                        earliest: row.try_get("earliest").ok()?,
                        latest: row.try_get("latest").ok()?,
                    }),
                    TopologyTable::ShortAddresses => TopologyRow::ShortAddress(ShortAddressRow {
                        panid: row.try_get("panid").ok()?,
                        shortaddr: row.try_get("shortaddr").ok()?,
                        altset: set("altset")?,
                        macset: set("macset")?,
                        nwkset: set("nwkset")?,
                        earliest: row.try_get("earliest").ok()?,
                        latest: row.try_get("latest").ok()?,
                    }),
                    TopologyTable::ExtendedAddresses => {
                        TopologyRow::ExtendedAddress(ExtendedAddressRow {
                            extendedaddr: row.try_get("extendedaddr").ok()?,
                            altset: set("altset")?,
                            macset: set("macset")?,
                            nwkset: set("nwkset")?,
                            earliest: row.try_get("earliest").ok()?,
                            latest: row.try_get("latest").ok()?,
                        })
                    }
                    TopologyTable::Pairs => TopologyRow::Pair(PairRow {
                        panid: row.try_get("panid").ok()?,
                        srcaddr: row.try_get("srcaddr").ok()?,
                        dstaddr: row.try_get("dstaddr").ok()?,
                        earliest: row.try_get("earliest").ok()?,
                        latest: row.try_get("latest").ok()?,
                    }),
                })
            })
            .collect();

        Ok(snapshot)
    }
}

async fn insert_topology_row(
    tx: &mut Transaction<'_, Sqlite>,
    sensor_id: &str,
    row: &TopologyRow,
) -> Result<(), sqlx::Error> {
    match row {
        TopologyRow::Network(network) => {
            sqlx::query(
                "INSERT INTO wids_networks (wids_sensor_id, panid, epidset, earliest, latest)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(sensor_id)
            .bind(&network.panid)
            .bind(network.epidset.to_column())
            .bind(network.earliest)
            .bind(network.latest)
            .execute(&mut **tx)
            .await?;
        }
        TopologyRow::ShortAddress(short) => {
            sqlx::query(
                "INSERT INTO wids_short_addresses
                 (wids_sensor_id, panid, shortaddr, altset, macset, nwkset, earliest, latest)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(sensor_id)
            .bind(&short.panid)
            .bind(&short.shortaddr)
            .bind(short.altset.to_column())
            .bind(short.macset.to_column())
            .bind(short.nwkset.to_column())
            .bind(short.earliest)
            .bind(short.latest)
            .execute(&mut **tx)
            .await?;
        }
        TopologyRow::ExtendedAddress(extended) => {
            sqlx::query(
                "INSERT INTO wids_extended_addresses
                 (wids_sensor_id, extendedaddr, altset, macset, nwkset, earliest, latest)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(sensor_id)
            .bind(&extended.extendedaddr)
            .bind(extended.altset.to_column())
            .bind(extended.macset.to_column())
            .bind(extended.nwkset.to_column())
            .bind(extended.earliest)
            .bind(extended.latest)
            .execute(&mut **tx)
            .await?;
        }
        TopologyRow::Pair(pair) => {
            sqlx::query(
                "INSERT INTO wids_pairs (wids_sensor_id, panid, srcaddr, dstaddr, earliest, latest)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(sensor_id)
            .bind(&pair.panid)
            .bind(&pair.srcaddr)
            .bind(&pair.dstaddr)
            .bind(pair.earliest)
            .bind(pair.latest)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}
