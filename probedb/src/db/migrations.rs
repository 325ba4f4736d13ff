//! Database schema migrations
//!
//! The schema version is persisted under the `"schema"` metadata key as
//! `{"version": N}`. [`ProbeDb::upgrade`] brings a fresh or stale database
//! to [`SCHEMA_VERSION`]:
//!
//! - no metadata table: create every table and record the current version
//! - version behind: run each registered step for every newer version, then
//!   record the new version, all in one transaction
//! - version current: nothing to do
//! - version ahead: warn and leave the database untouched
//!
//! A failed step rolls the whole transaction back, so the recorded version
//! stays where it was and the next start retries from the same point.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing steps** - databases already past them will not rerun them
//! 2. **Always add a new version** - append an [`Upgrade`] to [`UPGRADES`] and bump [`SCHEMA_VERSION`]
//! 3. **Keep steps idempotent** - use `IF NOT EXISTS` and check columns before `ALTER TABLE`
//! 4. **Keep the baseline current** - a fresh database is created from `schema::BASELINE`

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use super::{schema, ProbeDb, ProbeTx};
use crate::error::JsonContext;
use crate::{Error, Result};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding an upgrade
pub const SCHEMA_VERSION: u64 = 3;

const SCHEMA_KEY: &str = "schema";

type StepFn = for<'c> fn(&'c mut SqliteConnection) -> BoxFuture<'c, Result<()>>;

/// One named, idempotent migration action
pub(crate) struct Step {
    pub(crate) name: &'static str,
    pub(crate) run: StepFn,
}

/// Steps bringing the schema from `version - 1` to `version`
pub(crate) struct Upgrade {
    pub(crate) version: u64,
    pub(crate) steps: &'static [Step],
}

/// Ordered registry of upgrades, oldest first
pub(crate) static UPGRADES: &[Upgrade] = &[
    Upgrade {
        version: 1,
        steps: &[Step {
            name: "create delay tables",
            run: schema::create_delays,
        }],
    },
    Upgrade {
        version: 2,
        steps: &[
            Step {
                name: "create aggregate attestations",
                run: schema::create_aggregate_attestations,
            },
            Step {
                name: "create attestation summaries",
                run: schema::create_attestation_summaries,
            },
        ],
    },
    Upgrade {
        version: 3,
        steps: &[Step {
            name: "add address sort keys",
            run: schema::add_ip_sort_keys,
        }],
    },
];

#[derive(Debug, Serialize, Deserialize)]
struct SchemaMetadata {
    version: u64,
}

impl ProbeDb {
    /// Bring the database to the current schema version
    ///
    /// Safe to call on every start.
    pub async fn upgrade(&self) -> Result<()> {
        let mut tx = ProbeTx::begin_immediate(&self.pool, "upgrade").await?;

        if !schema::table_exists(tx.conn(), "t_metadata").await? {
            info!(version = SCHEMA_VERSION, "Initialising database schema");
            schema::execute_all(tx.conn(), schema::BASELINE).await?;
            self.set_schema_version(Some(&mut tx), SCHEMA_VERSION).await?;
            tx.commit().await?;
            return Ok(());
        }

        for column in ["f_key", "f_value"] {
            if !schema::column_exists(tx.conn(), "t_metadata", column).await? {
                return Err(Error::InconsistentSchema(format!(
                    "metadata table is missing column {}",
                    column
                )));
            }
        }

        let current = self.schema_version(Some(&mut tx)).await?;
        if current == SCHEMA_VERSION {
            debug!(version = current, "Database schema is up to date");
            return Ok(());
        }
        if current > SCHEMA_VERSION {
            warn!(
                database_version = current,
                code_version = SCHEMA_VERSION,
                "Database schema is newer than this code, not upgrading"
            );
            return Ok(());
        }

        info!(from = current, to = SCHEMA_VERSION, "Upgrading database schema");
        if let Err(e) = apply_upgrades(&mut tx, current).await {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Failed to roll back schema upgrade");
            }
            return Err(e);
        }
        self.set_schema_version(Some(&mut tx), SCHEMA_VERSION).await?;
        tx.commit().await?;

        info!(version = SCHEMA_VERSION, "Database schema upgrade complete");
        Ok(())
    }

    /// Persisted schema version, 0 when none has been recorded
    pub async fn schema_version(&self, tx: Option<&mut ProbeTx>) -> Result<u64> {
        match self.metadata(tx, SCHEMA_KEY).await? {
            Some(value) => {
                let schema: SchemaMetadata =
                    serde_json::from_value(value).json_context("failed to decode schema metadata")?;
                Ok(schema.version)
            }
            None => Ok(0),
        }
    }

    pub async fn set_schema_version(&self, tx: Option<&mut ProbeTx>, version: u64) -> Result<()> {
        let value = serde_json::to_value(SchemaMetadata { version })
            .json_context("failed to encode schema metadata")?;
        self.set_metadata(tx, SCHEMA_KEY, &value).await
    }
}

async fn apply_upgrades(tx: &mut ProbeTx, current: u64) -> Result<()> {
    for upgrade in UPGRADES
        .iter()
        .filter(|u| u.version > current && u.version <= SCHEMA_VERSION)
    {
        info!(version = upgrade.version, "Applying schema upgrade");
        for step in upgrade.steps {
            info!(version = upgrade.version, step = step.name, "Running migration step");
            (step.run)(tx.conn()).await.map_err(|e| Error::Migration {
                version: upgrade.version,
                step: step.name,
                source: Box::new(e),
            })?;
        }
    }
    Ok(())
}
