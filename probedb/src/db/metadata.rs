//! Durable key/value metadata
//!
//! Used by the migration runner for its schema version marker; any other
//! component needing a persisted scalar can reuse it.

use serde_json::Value;

use super::{ProbeDb, ProbeTx};
use crate::error::{DbContext, JsonContext};
use crate::Result;

impl ProbeDb {
    /// Set a metadata key to a JSON value, replacing any previous value
    pub async fn set_metadata(&self, tx: Option<&mut ProbeTx>, key: &str, value: &Value) -> Result<()> {
        let mut scope = self.scope(tx, "set_metadata").await?;
        let result: Result<()> = async {
            let encoded = serde_json::to_string(value).json_context("failed to encode metadata")?;
            sqlx::query(
                r#"
                INSERT INTO t_metadata (f_key, f_value)
                VALUES (?, ?)
                ON CONFLICT (f_key) DO UPDATE
                SET f_value = excluded.f_value
                "#,
            )
            .bind(key)
            .bind(encoded)
            .execute(&mut *scope.conn())
            .await
            .db_context("failed to set metadata")?;
            Ok(())
        }
        .await;
        scope.finish(result).await
    }

    /// JSON value of a metadata key, `None` when the key is absent
    pub async fn metadata(&self, tx: Option<&mut ProbeTx>, key: &str) -> Result<Option<Value>> {
        let mut scope = self.scope(tx, "metadata").await?;
        let result: Result<Option<Value>> = async {
            let stored: Option<String> =
                sqlx::query_scalar("SELECT f_value FROM t_metadata WHERE f_key = ?")
                    .bind(key)
                    .fetch_optional(&mut *scope.conn())
                    .await
                    .db_context("failed to obtain metadata")?;
            stored
                .map(|s| serde_json::from_str(&s).json_context("failed to decode metadata"))
                .transpose()
        }
        .await;
        scope.finish(result).await
    }
}
