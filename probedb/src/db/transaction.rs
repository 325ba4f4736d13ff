//! Transaction scopes
//!
//! A [`ProbeTx`] is an explicit transaction handle obtained from
//! [`ProbeDb::begin_tx`](super::ProbeDb::begin_tx). Store operations take an
//! `Option<&mut ProbeTx>`:
//! - `Some(tx)`: the operation runs on the caller's transaction and never
//!   commits or rolls it back.
//! - `None`: the operation opens a local transaction, commits it on success
//!   and rolls it back on error.
//!
//! Caller transactions take the write lock when they begin, so concurrent
//! writers queue behind the busy timeout rather than failing mid-way. Local
//! transactions stay deferred; each runs a single statement.
//!
//! Dropping a `ProbeTx` without committing rolls it back and returns the
//! connection to the pool.

use std::time::Instant;

use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};

use crate::error::DbContext;
use crate::Result;

/// Connection waits above this are reported as pool saturation
const SLOW_ACQUIRE_MS: u128 = 1000;
/// Connections held above this are reported as long transactions
const LONG_HOLD_MS: u128 = 2000;

/// Caller-owned transaction bound to one pooled connection
pub struct ProbeTx {
    tx: Option<Transaction<'static, Sqlite>>,
    caller: &'static str,
    acquired_at: Instant,
}

impl ProbeTx {
    /// Deferred transaction, for operations whose first statement decides
    /// the lock they need
    pub(crate) async fn begin(pool: &SqlitePool, caller: &'static str) -> Result<Self> {
        Self::start(pool, caller, false).await
    }

    /// Transaction holding the write lock from the start
    ///
    /// A deferred transaction that reads and later writes fails with
    /// SQLITE_BUSY once another connection has committed in between; taking
    /// the lock up front makes it wait out the busy timeout instead.
    pub(crate) async fn begin_immediate(pool: &SqlitePool, caller: &'static str) -> Result<Self> {
        Self::start(pool, caller, true).await
    }

    async fn start(pool: &SqlitePool, caller: &'static str, immediate: bool) -> Result<Self> {
        let start = Instant::now();

        tracing::debug!(caller = caller, immediate = immediate, "Connection acquisition requested");

        let tx = if immediate {
            pool.begin_with("BEGIN IMMEDIATE").await
        } else {
            pool.begin().await
        }
        .db_context("failed to begin transaction")?;

        let wait_ms = start.elapsed().as_millis();
        if wait_ms > SLOW_ACQUIRE_MS {
            tracing::warn!(
                caller = caller,
                wait_ms = wait_ms,
                "Slow connection acquisition, pool may be saturated"
            );
        } else {
            tracing::debug!(caller = caller, wait_ms = wait_ms, "Connection acquired");
        }

        Ok(Self {
            tx: Some(tx),
            caller,
            acquired_at: Instant::now(),
        })
    }

    /// Commit the transaction and release the connection
    pub async fn commit(mut self) -> Result<()> {
        let held_ms = self.acquired_at.elapsed().as_millis();
        if let Some(tx) = self.tx.take() {
            tx.commit().await.db_context("failed to commit transaction")?;
        }
        self.log_release("commit", held_ms);
        Ok(())
    }

    /// Roll the transaction back and release the connection
    pub async fn rollback(mut self) -> Result<()> {
        let held_ms = self.acquired_at.elapsed().as_millis();
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.db_context("failed to roll back transaction")?;
        }
        self.log_release("rollback", held_ms);
        Ok(())
    }

    pub(crate) fn conn(&mut self) -> &mut SqliteConnection {
        // Only commit/rollback take the transaction, and both consume self.
        self.tx.as_deref_mut().expect("transaction already consumed")
    }

    fn log_release(&self, how: &'static str, held_ms: u128) {
        if held_ms > LONG_HOLD_MS {
            tracing::warn!(
                caller = self.caller,
                held_ms = held_ms,
                how = how,
                "Long transaction, connection held for extended period"
            );
        } else {
            tracing::debug!(caller = self.caller, held_ms = held_ms, how = how, "Connection released");
        }
    }
}

impl Drop for ProbeTx {
    fn drop(&mut self) {
        if self.tx.is_some() {
            let held_ms = self.acquired_at.elapsed().as_millis();
            self.log_release("drop", held_ms);
        }
    }
}

impl std::fmt::Debug for ProbeTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeTx")
            .field("caller", &self.caller)
            .field("active", &self.tx.is_some())
            .finish()
    }
}

/// Transaction an operation runs on: borrowed from the caller or local
pub(crate) enum TxScope<'a> {
    Caller(&'a mut ProbeTx),
    Local(ProbeTx),
}

impl<'a> TxScope<'a> {
    pub(crate) async fn open(
        pool: &SqlitePool,
        tx: Option<&'a mut ProbeTx>,
        caller: &'static str,
    ) -> Result<Self> {
        match tx {
            Some(tx) => Ok(TxScope::Caller(tx)),
            None => Ok(TxScope::Local(ProbeTx::begin(pool, caller).await?)),
        }
    }

    pub(crate) fn conn(&mut self) -> &mut SqliteConnection {
        match self {
            TxScope::Caller(tx) => tx.conn(),
            TxScope::Local(tx) => tx.conn(),
        }
    }

    /// Settle a local transaction according to the operation's result.
    ///
    /// Caller transactions are left untouched.
    pub(crate) async fn finish<T>(self, result: Result<T>) -> Result<T> {
        let tx = match self {
            TxScope::Caller(_) => return result,
            TxScope::Local(tx) => tx,
        };
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Failed to roll back local transaction");
                }
                Err(e)
            }
        }
    }
}
