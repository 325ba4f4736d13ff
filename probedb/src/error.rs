//! Common error types for the probe data store

use thiserror::Error;

/// Common result type for probe store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the probe store
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error, tagged with the failing operation
    #[error("{context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding of a stored value failed
    #[error("{context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid caller input (bucket index out of range, too many buckets)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Order value outside the known set
    #[error("no order specified: {0}")]
    UnknownOrder(String),

    /// Selection value outside the known set
    #[error("no selection specified: {0}")]
    UnknownSelection(String),

    /// Stored row cannot be represented as a model value
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// Schema is in a state the migration runner cannot reason about
    #[error("database in inconsistent state, cannot continue: {0}")]
    InconsistentSchema(String),

    /// A migration step failed; the migration transaction was rolled back
    #[error("failed to upgrade to schema version {version} ({step}): {source}")]
    Migration {
        version: u64,
        step: &'static str,
        #[source]
        source: Box<Error>,
    },
}

/// Attach a static operation description to a `sqlx` result
pub(crate) trait DbContext<T> {
    fn db_context(self, context: &'static str) -> Result<T>;
}

impl<T> DbContext<T> for std::result::Result<T, sqlx::Error> {
    fn db_context(self, context: &'static str) -> Result<T> {
        self.map_err(|source| Error::Database { context, source })
    }
}

/// Attach a static operation description to a `serde_json` result
pub(crate) trait JsonContext<T> {
    fn json_context(self, context: &'static str) -> Result<T>;
}

impl<T> JsonContext<T> for std::result::Result<T, serde_json::Error> {
    fn json_context(self, context: &'static str) -> Result<T> {
        self.map_err(|source| Error::Json { context, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_carries_context() {
        let result: std::result::Result<(), sqlx::Error> = Err(sqlx::Error::RowNotFound);
        let err = result.db_context("failed to set head delay").unwrap_err();
        assert!(err.to_string().starts_with("failed to set head delay: "));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_unknown_order_message() {
        let err = Error::UnknownOrder("sideways".to_string());
        assert_eq!(err.to_string(), "no order specified: sideways");
    }
}
