//! Probe data store
//!
//! [`ProbeDb`] wraps the connection pool. Writers, readers, metadata
//! accessors and the migration runner are implemented on it in the
//! submodules, one file per record kind.

use sqlx::SqlitePool;

pub mod aggregate_attestations;
pub mod attestation_summaries;
pub mod delays;
pub mod filters;
pub mod init;
pub mod metadata;
pub mod migrations;
pub mod models;
pub(crate) mod query;
pub(crate) mod rows;
pub(crate) mod schema;
pub mod transaction;

pub use filters::*;
pub use init::*;
pub use migrations::SCHEMA_VERSION;
pub use models::*;
pub use transaction::ProbeTx;

use crate::error::DbContext;
use crate::Result;
use transaction::TxScope;

/// Handle to the probe database
///
/// Cheap to clone; all clones share one pool.
#[derive(Debug, Clone)]
pub struct ProbeDb {
    pool: SqlitePool,
}

impl ProbeDb {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run a trivial statement to confirm the database answers
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .db_context("failed to reach database")?;
        Ok(())
    }

    /// Begin a caller-owned transaction
    ///
    /// Pass the returned handle to store operations to group them
    /// atomically, then [`ProbeTx::commit`] it. Dropping it instead rolls
    /// everything back.
    ///
    /// Waits, up to the busy timeout, while another connection holds the
    /// write lock. Other writes wait for this transaction in the same way.
    pub async fn begin_tx(&self) -> Result<ProbeTx> {
        ProbeTx::begin_immediate(&self.pool, "caller").await
    }

    /// Commit a caller-owned transaction
    pub async fn commit_tx(&self, tx: ProbeTx) -> Result<()> {
        tx.commit().await
    }

    pub(crate) async fn scope<'a>(
        &self,
        tx: Option<&'a mut ProbeTx>,
        caller: &'static str,
    ) -> Result<TxScope<'a>> {
        TxScope::open(&self.pool, tx, caller).await
    }
}
