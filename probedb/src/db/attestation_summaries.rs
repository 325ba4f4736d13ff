//! Attestation summaries
//!
//! One summary per (origin, slot, committee, vote). Like aggregate
//! attestations they are insert-once.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::filters::AttestationSummaryFilter;
use super::models::{ip_sort_key, normalize_ip, AttestationSummary, AttesterBuckets};
use super::query::{push_limit, push_order, trace_query, Predicates};
use super::{rows, ProbeDb, ProbeTx};
use crate::error::DbContext;
use crate::Result;

impl ProbeDb {
    /// Store an attestation summary unless one with the same key exists
    pub async fn set_attestation_summary(
        &self,
        tx: Option<&mut ProbeTx>,
        summary: &AttestationSummary,
    ) -> Result<()> {
        let mut scope = self.scope(tx, "set_attestation_summary").await?;
        let result = insert_attestation_summary(scope.conn(), summary).await;
        scope.finish(result).await
    }

    pub async fn attestation_summaries(
        &self,
        tx: Option<&mut ProbeTx>,
        filter: &AttestationSummaryFilter,
    ) -> Result<Vec<AttestationSummary>> {
        let mut scope = self.scope(tx, "attestation_summaries").await?;
        let result = select_attestation_summaries(scope.conn(), filter).await;
        scope.finish(result).await
    }
}

async fn insert_attestation_summary(
    conn: &mut SqliteConnection,
    summary: &AttestationSummary,
) -> Result<()> {
    let buckets = summary.attester_buckets.to_column()?;
    let inserted = sqlx::query(
        r#"
        INSERT INTO t_attestation_summaries (
            f_ip_addr,
            f_ip_key,
            f_source,
            f_method,
            f_slot,
            f_committee_index,
            f_beacon_block_root,
            f_source_root,
            f_target_root,
            f_attester_buckets
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (f_ip_addr, f_source, f_method, f_slot, f_committee_index, f_beacon_block_root, f_source_root, f_target_root) DO NOTHING
        "#,
    )
    .bind(normalize_ip(summary.ip_addr).to_string())
    .bind(ip_sort_key(summary.ip_addr))
    .bind(&summary.source)
    .bind(&summary.method)
    .bind(summary.slot)
    .bind(summary.committee_index)
    .bind(&summary.beacon_block_root)
    .bind(&summary.source_root)
    .bind(&summary.target_root)
    .bind(buckets)
    .execute(&mut *conn)
    .await
    .db_context("failed to set attestation summary")?
    .rows_affected();

    if inserted == 0 {
        tracing::trace!(
            source = %summary.source,
            slot = summary.slot,
            committee_index = summary.committee_index,
            "Duplicate attestation summary ignored"
        );
    }
    Ok(())
}

pub(crate) fn attestation_summary_query(
    filter: &AttestationSummaryFilter,
) -> (QueryBuilder<'static, Sqlite>, Predicates) {
    let mut predicates = Predicates::new();
    predicates
        .ip("f_ip_addr", filter.ip_addr)
        .any_text("f_source", &filter.sources)
        .any_text("f_method", &filter.methods)
        .slot_range("f_slot", filter.from, filter.to);

    let mut qb = QueryBuilder::new(
        "SELECT f_ip_addr, f_source, f_method, f_slot, f_committee_index, f_beacon_block_root, \
         f_source_root, f_target_root, f_attester_buckets FROM t_attestation_summaries",
    );
    predicates.push_where(&mut qb);
    push_order(&mut qb, "f_slot", filter.order, &["f_method", "f_ip_key", "f_source", "f_committee_index"]);
    push_limit(&mut qb, filter.limit);
    (qb, predicates)
}

async fn select_attestation_summaries(
    conn: &mut SqliteConnection,
    filter: &AttestationSummaryFilter,
) -> Result<Vec<AttestationSummary>> {
    let (mut qb, predicates) = attestation_summary_query(filter);
    trace_query(&qb, &predicates);

    let records = qb
        .build()
        .fetch_all(&mut *conn)
        .await
        .db_context("failed to obtain attestation summaries")?;

    records
        .iter()
        .map(|row| -> Result<AttestationSummary> {
            Ok(AttestationSummary {
                ip_addr: rows::ip(row, 0)?,
                source: rows::text(row, 1)?,
                method: rows::text(row, 2)?,
                slot: rows::uint(row, 3)?,
                committee_index: rows::uint(row, 4)?,
                beacon_block_root: rows::bytes(row, 5)?,
                source_root: rows::bytes(row, 6)?,
                target_root: rows::bytes(row, 7)?,
                attester_buckets: AttesterBuckets::from_column(&rows::text(row, 8)?)?,
            })
        })
        .collect()
}
