//! Aggregate attestations
//!
//! Insert-once: the first write for a key is kept and later duplicates are
//! silently ignored.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::filters::AggregateAttestationFilter;
use super::models::{ip_sort_key, normalize_ip, AggregateAttestation};
use super::query::{push_limit, push_order, trace_query, Predicates};
use super::{rows, ProbeDb, ProbeTx};
use crate::error::DbContext;
use crate::Result;

impl ProbeDb {
    /// Store an aggregate attestation unless one with the same key exists
    pub async fn set_aggregate_attestation(
        &self,
        tx: Option<&mut ProbeTx>,
        attestation: &AggregateAttestation,
    ) -> Result<()> {
        let mut scope = self.scope(tx, "set_aggregate_attestation").await?;
        let result = insert_aggregate_attestation(scope.conn(), attestation).await;
        scope.finish(result).await
    }

    /// Aggregate attestations matching a filter
    pub async fn aggregate_attestations(
        &self,
        tx: Option<&mut ProbeTx>,
        filter: &AggregateAttestationFilter,
    ) -> Result<Vec<AggregateAttestation>> {
        let mut scope = self.scope(tx, "aggregate_attestations").await?;
        let result = select_aggregate_attestations(scope.conn(), filter).await;
        scope.finish(result).await
    }
}

async fn insert_aggregate_attestation(
    conn: &mut SqliteConnection,
    attestation: &AggregateAttestation,
) -> Result<()> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO t_aggregate_attestations (
            f_ip_addr,
            f_ip_key,
            f_source,
            f_method,
            f_slot,
            f_committee_index,
            f_aggregation_bits,
            f_beacon_block_root,
            f_source_root,
            f_target_root,
            f_delay
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (f_ip_addr, f_source, f_method, f_slot, f_committee_index, f_aggregation_bits) DO NOTHING
        "#,
    )
    .bind(normalize_ip(attestation.ip_addr).to_string())
    .bind(ip_sort_key(attestation.ip_addr))
    .bind(&attestation.source)
    .bind(&attestation.method)
    .bind(attestation.slot)
    .bind(attestation.committee_index)
    .bind(&attestation.aggregation_bits)
    .bind(&attestation.beacon_block_root)
    .bind(&attestation.source_root)
    .bind(&attestation.target_root)
    .bind(attestation.delay_ms)
    .execute(&mut *conn)
    .await
    .db_context("failed to set aggregate attestation")?
    .rows_affected();

    if inserted == 0 {
        tracing::trace!(
            source = %attestation.source,
            slot = attestation.slot,
            committee_index = attestation.committee_index,
            "Duplicate aggregate attestation ignored"
        );
    }
    Ok(())
}

pub(crate) fn aggregate_attestation_query(
    filter: &AggregateAttestationFilter,
) -> (QueryBuilder<'static, Sqlite>, Predicates) {
    let mut predicates = Predicates::new();
    predicates
        .ip("f_ip_addr", filter.ip_addr)
        .any_text("f_source", &filter.sources)
        .any_text("f_method", &filter.methods)
        .slot_range("f_slot", filter.from, filter.to);

    let mut qb = QueryBuilder::new(
        "SELECT f_ip_addr, f_source, f_method, f_slot, f_committee_index, f_aggregation_bits, \
         f_beacon_block_root, f_source_root, f_target_root, f_delay FROM t_aggregate_attestations",
    );
    predicates.push_where(&mut qb);
    push_order(&mut qb, "f_slot", filter.order, &["f_method", "f_ip_key", "f_source", "f_committee_index"]);
    push_limit(&mut qb, filter.limit);
    (qb, predicates)
}

async fn select_aggregate_attestations(
    conn: &mut SqliteConnection,
    filter: &AggregateAttestationFilter,
) -> Result<Vec<AggregateAttestation>> {
    let (mut qb, predicates) = aggregate_attestation_query(filter);
    trace_query(&qb, &predicates);

    let records = qb
        .build()
        .fetch_all(&mut *conn)
        .await
        .db_context("failed to obtain aggregate attestations")?;

    records
        .iter()
        .map(|row| -> Result<AggregateAttestation> {
            Ok(AggregateAttestation {
                ip_addr: rows::ip(row, 0)?,
                source: rows::text(row, 1)?,
                method: rows::text(row, 2)?,
                slot: rows::uint(row, 3)?,
                committee_index: rows::uint(row, 4)?,
                aggregation_bits: rows::bytes(row, 5)?,
                beacon_block_root: rows::bytes(row, 6)?,
                source_root: rows::bytes(row, 7)?,
                target_root: rows::bytes(row, 8)?,
                delay_ms: rows::uint(row, 9)?,
            })
        })
        .collect()
}
