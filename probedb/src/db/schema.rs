//! Table definitions
//!
//! Statements are idempotent (`IF NOT EXISTS`) so that a step interrupted
//! by a failed migration can be rerun safely.

use std::net::IpAddr;

use futures::future::BoxFuture;
use sqlx::SqliteConnection;

use super::models::ip_sort_key;
use crate::error::DbContext;
use crate::{Error, Result};

/// Tables keyed by the reporting probe's address
const ADDRESSED_TABLES: &[&str] = &[
    "t_block_delays",
    "t_head_delays",
    "t_aggregate_attestations",
    "t_attestation_summaries",
];

/// t_metadata stores durable key/value scalars as JSON text
pub(crate) const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS t_metadata (
    f_key   TEXT NOT NULL PRIMARY KEY,
    f_value TEXT NOT NULL
)
"#;

pub(crate) const CREATE_BLOCK_DELAYS: &str = r#"
CREATE TABLE IF NOT EXISTS t_block_delays (
    f_ip_addr TEXT NOT NULL,
    -- address family byte then octets, orders by address value
    f_ip_key  BLOB NOT NULL,
    f_source  TEXT NOT NULL,
    f_method  TEXT NOT NULL,
    f_slot    INTEGER NOT NULL CHECK (f_slot >= 0),
    -- delay in milliseconds
    f_delay   INTEGER NOT NULL CHECK (f_delay >= 0)
)
"#;

pub(crate) const INDEX_BLOCK_DELAYS: &str = "CREATE UNIQUE INDEX IF NOT EXISTS i_block_delays_1 ON t_block_delays(f_ip_addr, f_source, f_method, f_slot)";

pub(crate) const CREATE_HEAD_DELAYS: &str = r#"
CREATE TABLE IF NOT EXISTS t_head_delays (
    f_ip_addr TEXT NOT NULL,
    -- address family byte then octets, orders by address value
    f_ip_key  BLOB NOT NULL,
    f_source  TEXT NOT NULL,
    f_method  TEXT NOT NULL,
    f_slot    INTEGER NOT NULL CHECK (f_slot >= 0),
    -- delay in milliseconds
    f_delay   INTEGER NOT NULL CHECK (f_delay >= 0)
)
"#;

pub(crate) const INDEX_HEAD_DELAYS: &str = "CREATE UNIQUE INDEX IF NOT EXISTS i_head_delays_1 ON t_head_delays(f_ip_addr, f_source, f_method, f_slot)";

pub(crate) const CREATE_AGGREGATE_ATTESTATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS t_aggregate_attestations (
    f_ip_addr           TEXT NOT NULL,
    -- address family byte then octets, orders by address value
    f_ip_key            BLOB NOT NULL,
    f_source            TEXT NOT NULL,
    f_method            TEXT NOT NULL,
    f_slot              INTEGER NOT NULL CHECK (f_slot >= 0),
    f_committee_index   INTEGER NOT NULL CHECK (f_committee_index >= 0),
    f_aggregation_bits  BLOB NOT NULL,
    f_beacon_block_root BLOB NOT NULL,
    f_source_root       BLOB NOT NULL,
    f_target_root       BLOB NOT NULL,
    -- delay in milliseconds
    f_delay             INTEGER NOT NULL CHECK (f_delay >= 0)
)
"#;

pub(crate) const INDEX_AGGREGATE_ATTESTATIONS: &str = "CREATE UNIQUE INDEX IF NOT EXISTS i_aggregate_attestations_1 ON t_aggregate_attestations(f_ip_addr, f_source, f_method, f_slot, f_committee_index, f_aggregation_bits)";

pub(crate) const CREATE_ATTESTATION_SUMMARIES: &str = r#"
CREATE TABLE IF NOT EXISTS t_attestation_summaries (
    f_ip_addr           TEXT NOT NULL,
    -- address family byte then octets, orders by address value
    f_ip_key            BLOB NOT NULL,
    f_source            TEXT NOT NULL,
    f_method            TEXT NOT NULL,
    f_slot              INTEGER NOT NULL CHECK (f_slot >= 0),
    f_committee_index   INTEGER NOT NULL CHECK (f_committee_index >= 0),
    f_beacon_block_root BLOB NOT NULL,
    f_source_root       BLOB NOT NULL,
    f_target_root       BLOB NOT NULL,
    -- JSON array of 120 hex-encoded bit-vectors
    f_attester_buckets  TEXT NOT NULL
)
"#;

pub(crate) const INDEX_ATTESTATION_SUMMARIES: &str = "CREATE UNIQUE INDEX IF NOT EXISTS i_attestation_summaries_1 ON t_attestation_summaries(f_ip_addr, f_source, f_method, f_slot, f_committee_index, f_beacon_block_root, f_source_root, f_target_root)";

/// Every table at the current schema version, in creation order
pub(crate) const BASELINE: &[&str] = &[
    CREATE_METADATA,
    CREATE_BLOCK_DELAYS,
    INDEX_BLOCK_DELAYS,
    CREATE_HEAD_DELAYS,
    INDEX_HEAD_DELAYS,
    CREATE_AGGREGATE_ATTESTATIONS,
    INDEX_AGGREGATE_ATTESTATIONS,
    CREATE_ATTESTATION_SUMMARIES,
    INDEX_ATTESTATION_SUMMARIES,
];

pub(crate) async fn execute_all(conn: &mut SqliteConnection, statements: &[&str]) -> Result<()> {
    for statement in statements {
        sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .db_context("failed to execute schema statement")?;
    }
    Ok(())
}

pub(crate) fn create_delays(conn: &mut SqliteConnection) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        execute_all(
            conn,
            &[CREATE_BLOCK_DELAYS, INDEX_BLOCK_DELAYS, CREATE_HEAD_DELAYS, INDEX_HEAD_DELAYS],
        )
        .await
    })
}

pub(crate) fn create_aggregate_attestations(conn: &mut SqliteConnection) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        execute_all(conn, &[CREATE_AGGREGATE_ATTESTATIONS, INDEX_AGGREGATE_ATTESTATIONS]).await
    })
}

pub(crate) fn create_attestation_summaries(conn: &mut SqliteConnection) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        execute_all(conn, &[CREATE_ATTESTATION_SUMMARIES, INDEX_ATTESTATION_SUMMARIES]).await
    })
}

/// Add and fill `f_ip_key` on tables created before it existed
pub(crate) fn add_ip_sort_keys(conn: &mut SqliteConnection) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        for table in ADDRESSED_TABLES {
            add_ip_sort_key(&mut *conn, table).await?;
        }
        Ok(())
    })
}

async fn add_ip_sort_key(conn: &mut SqliteConnection, table: &str) -> Result<()> {
    if !column_exists(&mut *conn, table, "f_ip_key").await? {
        sqlx::query(&format!(
            "ALTER TABLE {} ADD COLUMN f_ip_key BLOB NOT NULL DEFAULT x''",
            table
        ))
        .execute(&mut *conn)
        .await
        .db_context("failed to add address sort key column")?;
    }

    let addresses: Vec<String> = sqlx::query_scalar(&format!(
        "SELECT DISTINCT f_ip_addr FROM {} WHERE f_ip_key = x''",
        table
    ))
    .fetch_all(&mut *conn)
    .await
    .db_context("failed to list addresses without sort key")?;

    for address in addresses {
        let ip: IpAddr = address
            .parse()
            .map_err(|_| Error::CorruptRow(format!("invalid IP address {:?} in {}", address, table)))?;
        sqlx::query(&format!("UPDATE {} SET f_ip_key = ? WHERE f_ip_addr = ?", table))
            .bind(ip_sort_key(ip))
            .bind(&address)
            .execute(&mut *conn)
            .await
            .db_context("failed to fill address sort key")?;
    }
    Ok(())
}

/// Existence of a table in the main schema
pub(crate) async fn table_exists(conn: &mut SqliteConnection, table: &str) -> Result<bool> {
    sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name=?
        )
        "#,
    )
    .bind(table)
    .fetch_one(&mut *conn)
    .await
    .db_context("failed to check presence of table")
}

/// Existence of a column in a table
pub(crate) async fn column_exists(conn: &mut SqliteConnection, table: &str, column: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
        .bind(table)
        .bind(column)
        .fetch_one(&mut *conn)
        .await
        .db_context("failed to check presence of column")?;
    Ok(count > 0)
}
