//! SQLite pool construction and schema management.
//!
//! Migrations under `migrations/` are embedded at compile time and applied
//! every time a pool is created, so tests get a fully-initialised schema
//! from `create_pool("sqlite::memory:")`.

use std::str::FromStr;
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::error::AppError;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Every table owned by the aggregator, in drop order.
pub const TABLES: &[&str] = &[
    "network_keys",
    "link_keys",
    "wids_sensors",
    "wids_utilization",
    "wids_networks",
    "wids_short_addresses",
    "wids_extended_addresses",
    "wids_pairs",
    "wids_packet_counters",
    "wids_byte_counters",
    "wids_mac_seqnums",
    "wids_beacon_seqnums",
    "wids_nwk_seqnums",
    "wids_nwkaux_seqnums",
    "wids_battery_percentages",
    "wids_events",
    "nsm_alerts",
];

/// Open a pool for `database_url` and apply all pending migrations.
///
/// In-memory databases are pinned to a single long-lived connection;
/// otherwise each pooled connection would see its own empty database.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, AppError> {
    let pool = connect(database_url).await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

/// Open a pool without touching the schema.
pub async fn connect(database_url: &str) -> Result<SqlitePool, AppError> {
    let options = SqliteConnectOptions::from_str(database_url)?;

    let pool = if is_in_memory(database_url) {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(
                options
                    .journal_mode(SqliteJournalMode::Wal)
                    .busy_timeout(Duration::from_secs(5)),
            )
            .await?
    };

    Ok(pool)
}

/// Drop every aggregator table, including the migration ledger, so the
/// next `create_pool` starts from scratch.
pub async fn drop_all(pool: &SqlitePool) -> Result<(), AppError> {
    for table in TABLES.iter().chain(std::iter::once(&"_sqlx_migrations")) {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(pool)
            .await?;
    }
    Ok(())
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}
