//! Block and head delays
//!
//! Writes are upserts: re-delivering a key replaces its delay, so the most
//! recent observation wins.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::filters::{DelayFilter, Selection};
use super::models::{ip_sort_key, normalize_ip, Delay, DelayKind, DelayValue};
use super::query::{push_order, trace_query, Predicates};
use super::{rows, ProbeDb, ProbeTx};
use crate::error::DbContext;
use crate::Result;

impl ProbeDb {
    /// Set a block delay
    pub async fn set_block_delay(&self, tx: Option<&mut ProbeTx>, delay: &Delay) -> Result<()> {
        self.set_delay(tx, DelayKind::Block, delay).await
    }

    /// Set a head delay
    pub async fn set_head_delay(&self, tx: Option<&mut ProbeTx>, delay: &Delay) -> Result<()> {
        self.set_delay(tx, DelayKind::Head, delay).await
    }

    pub async fn set_delay(&self, tx: Option<&mut ProbeTx>, kind: DelayKind, delay: &Delay) -> Result<()> {
        let mut scope = self.scope(tx, "set_delay").await?;
        let result = upsert_delay(scope.conn(), kind, delay).await;
        scope.finish(result).await
    }

    pub async fn block_delays(&self, tx: Option<&mut ProbeTx>, filter: &DelayFilter) -> Result<Vec<DelayValue>> {
        self.delays(tx, DelayKind::Block, filter).await
    }

    pub async fn head_delays(&self, tx: Option<&mut ProbeTx>, filter: &DelayFilter) -> Result<Vec<DelayValue>> {
        self.delays(tx, DelayKind::Head, filter).await
    }

    /// Delays matching a filter
    ///
    /// Aggregate selections return one value per slot. `Selection::All`
    /// returns every row, ordered by slot, then method, IP address and source.
    pub async fn delays(
        &self,
        tx: Option<&mut ProbeTx>,
        kind: DelayKind,
        filter: &DelayFilter,
    ) -> Result<Vec<DelayValue>> {
        let mut scope = self.scope(tx, "delays").await?;
        let result = select_delays(scope.conn(), kind, filter).await;
        scope.finish(result).await
    }
}

async fn upsert_delay(conn: &mut SqliteConnection, kind: DelayKind, delay: &Delay) -> Result<()> {
    let sql = format!(
        r#"
        INSERT INTO {} (f_ip_addr, f_ip_key, f_source, f_method, f_slot, f_delay)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (f_ip_addr, f_source, f_method, f_slot) DO UPDATE
        SET f_delay = excluded.f_delay
        "#,
        kind.table()
    );
    sqlx::query(&sql)
        .bind(normalize_ip(delay.ip_addr).to_string())
        .bind(ip_sort_key(delay.ip_addr))
        .bind(&delay.source)
        .bind(&delay.method)
        .bind(delay.slot)
        .bind(delay.delay_ms)
        .execute(&mut *conn)
        .await
        .db_context("failed to set delay")?;

    tracing::trace!(
        kind = kind.as_str(),
        source = %delay.source,
        method = %delay.method,
        slot = delay.slot,
        delay_ms = delay.delay_ms,
        "Delay stored"
    );
    Ok(())
}

fn delay_predicates(filter: &DelayFilter) -> Predicates {
    let mut predicates = Predicates::new();
    predicates
        .ip("f_ip_addr", filter.ip_addr)
        .text("f_source", filter.source.as_deref())
        .text("f_method", filter.method.as_deref())
        .slot_range("f_slot", filter.from, filter.to);
    predicates
}

/// Build the statement for a delay query
pub(crate) fn delay_query(kind: DelayKind, filter: &DelayFilter) -> (QueryBuilder<'static, Sqlite>, Predicates) {
    let predicates = delay_predicates(filter);
    let table = kind.table();

    let mut qb = QueryBuilder::new("");
    match filter.selection {
        Selection::Minimum | Selection::Maximum => {
            let aggregate = if filter.selection == Selection::Minimum { "MIN" } else { "MAX" };
            qb.push("SELECT f_slot, ")
                .push(aggregate)
                .push("(f_delay) FROM ")
                .push(table);
            predicates.push_where(&mut qb);
            qb.push(" GROUP BY f_slot");
            push_order(&mut qb, "f_slot", filter.order, &[]);
        }
        Selection::Median => {
            // Average of the one (odd count) or two (even count) middle
            // values per slot: continuous 50th percentile.
            qb.push(
                "SELECT f_slot, AVG(f_delay) FROM (SELECT f_slot, f_delay, \
                 ROW_NUMBER() OVER (PARTITION BY f_slot ORDER BY f_delay) AS f_rank, \
                 COUNT(*) OVER (PARTITION BY f_slot) AS f_count FROM ",
            )
            .push(table);
            predicates.push_where(&mut qb);
            qb.push(") WHERE f_rank IN ((f_count + 1) / 2, (f_count + 2) / 2) GROUP BY f_slot");
            push_order(&mut qb, "f_slot", filter.order, &[]);
        }
        Selection::All => {
            qb.push("SELECT f_slot, f_delay, f_ip_addr, f_source, f_method FROM ")
                .push(table);
            predicates.push_where(&mut qb);
            push_order(&mut qb, "f_slot", filter.order, &["f_method", "f_ip_key", "f_source"]);
        }
    }
    (qb, predicates)
}

async fn select_delays(
    conn: &mut SqliteConnection,
    kind: DelayKind,
    filter: &DelayFilter,
) -> Result<Vec<DelayValue>> {
    let (mut qb, predicates) = delay_query(kind, filter);
    trace_query(&qb, &predicates);

    let records = qb
        .build()
        .fetch_all(&mut *conn)
        .await
        .db_context("failed to obtain delays")?;

    records
        .iter()
        .map(|row| -> Result<DelayValue> {
            match filter.selection {
                Selection::Minimum | Selection::Maximum => {
                    Ok(DelayValue::aggregate(rows::uint(row, 0)?, rows::uint(row, 1)?))
                }
                Selection::Median => Ok(DelayValue::aggregate(
                    rows::uint(row, 0)?,
                    rows::rounded_uint(row, 1)?,
                )),
                Selection::All => Ok(DelayValue {
                    slot: rows::uint(row, 0)?,
                    delay_ms: rows::uint(row, 1)?,
                    ip_addr: Some(rows::ip(row, 2)?),
                    source: Some(rows::text(row, 3)?),
                    method: Some(rows::text(row, 4)?),
                }),
            }
        })
        .collect()
}
