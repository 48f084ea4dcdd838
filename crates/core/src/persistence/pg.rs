use sqlx::PgPool;
use sqlx::types::Json;

use super::{PipelineSnapshot, SnapshotStore};
use crate::error::CoreError;

/// Key of the snapshot row used when none is given.
pub const DEFAULT_SNAPSHOT_KEY: &str = "pipeline";

/// Snapshot stored as a JSONB row in `cogito_snapshots`.
#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
    key: String,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_key(pool, DEFAULT_SNAPSHOT_KEY)
    }

    pub fn with_key(pool: PgPool, key: impl Into<String>) -> Self {
        Self { pool, key: key.into() }
    }
}

#[async_trait::async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn load(&self) -> Result<Option<PipelineSnapshot>, CoreError> {
        let row: Option<(Json<PipelineSnapshot>,)> =
            sqlx::query_as("SELECT body FROM cogito_snapshots WHERE key = $1")
                .bind(&self.key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(Json(snapshot),)| snapshot))
    }

    async fn save(&self, snapshot: &PipelineSnapshot) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO cogito_snapshots (key, body, saved_at) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO UPDATE SET body = EXCLUDED.body, saved_at = EXCLUDED.saved_at",
        )
        .bind(&self.key)
        .bind(Json(snapshot))
        .bind(snapshot.saved_at)
        .execute(&self.pool)
        .await?;
        tracing::debug!(key = %self.key, "snapshot saved");
        Ok(())
    }
}
