//! Database initialization
//!
//! Opens (creating when missing) the SQLite database, then runs the
//! migration runner before handing out the store.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::info;

use super::ProbeDb;
use crate::config::StoreConfig;
use crate::error::DbContext;
use crate::Result;

/// Open the database described by `config` and bring its schema up to date
pub async fn init_database(config: &StoreConfig) -> Result<ProbeDb> {
    let db_path = &config.database;
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    // WAL lets readers keep their snapshot while a writer is active
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(config.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .db_context("failed to open database")?;

    if newly_created {
        info!(path = %db_path.display(), "Initialized new database");
    } else {
        info!(path = %db_path.display(), "Opened existing database");
    }

    let db = ProbeDb::new(pool);
    db.upgrade().await?;
    Ok(db)
}
