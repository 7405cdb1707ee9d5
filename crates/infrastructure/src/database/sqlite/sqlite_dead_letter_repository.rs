use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use gateway_domain::{DeadLetter, DeadLetterRepository};
use gateway_errors::{GatewayError, GatewayResult};

pub struct SqliteDeadLetterRepository {
    pool: SqlitePool,
}

impl SqliteDeadLetterRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_dead_letter(row: &sqlx::sqlite::SqliteRow) -> GatewayResult<DeadLetter> {
        let snapshot_column: String = row.try_get("attempts_snapshot")?;
        Ok(DeadLetter {
            id: row.try_get("id")?,
            request_id: row.try_get("request_id")?,
            reason: row.try_get("reason")?,
            attempts_snapshot: serde_json::from_str(&snapshot_column)
                .unwrap_or(serde_json::Value::Array(Vec::new())),
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl DeadLetterRepository for SqliteDeadLetterRepository {
    async fn record(&self, dead_letter: &DeadLetter) -> GatewayResult<DeadLetter> {
        let snapshot = serde_json::to_string(&dead_letter.attempts_snapshot)?;
        let row = sqlx::query(
            r#"
            INSERT INTO dead_letters (request_id, reason, attempts_snapshot, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, request_id, reason, attempts_snapshot, created_at
            "#,
        )
        .bind(dead_letter.request_id)
        .bind(dead_letter.reason)
        .bind(snapshot)
        .bind(dead_letter.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(GatewayError::Database)?;

        let created = Self::row_to_dead_letter(&row)?;
        debug!(
            "写入死信: 请求 {} 原因 {}",
            created.request_id,
            created.reason.as_str()
        );
        Ok(created)
    }

    async fn get_by_request_id(&self, request_id: i64) -> GatewayResult<Option<DeadLetter>> {
        let row = sqlx::query(
            "SELECT id, request_id, reason, attempts_snapshot, created_at
             FROM dead_letters WHERE request_id = $1",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(GatewayError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_dead_letter(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, limit: i64) -> GatewayResult<Vec<DeadLetter>> {
        let rows = sqlx::query(
            "SELECT id, request_id, reason, attempts_snapshot, created_at
             FROM dead_letters ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await
        .map_err(GatewayError::Database)?;

        rows.iter().map(Self::row_to_dead_letter).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::test_support::test_pool;
    use gateway_domain::DeadLetterReason;

    async fn seed_request(pool: &SqlitePool) {
        sqlx::query(
            "INSERT INTO sms_requests (phone, text, status, created_at, updated_at)
             VALUES ('010', 'x', 'FAILED_PERMANENT', '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
        )
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_record_and_read_back() {
        let pool = test_pool().await;
        seed_request(&pool).await;
        let repo = SqliteDeadLetterRepository::new(pool);

        let dead_letter = DeadLetter::new(1, DeadLetterReason::MaxAttemptsExceeded, &[]);
        let created = repo.record(&dead_letter).await.unwrap();
        assert!(created.id > 0);
        assert_eq!(created.reason, DeadLetterReason::MaxAttemptsExceeded);

        let loaded = repo.get_by_request_id(1).await.unwrap().unwrap();
        assert_eq!(loaded.id, created.id);
        assert!(loaded.attempts_snapshot.as_array().unwrap().is_empty());

        assert!(repo.get_by_request_id(2).await.unwrap().is_none());

        let listed = repo.list(10).await.unwrap();
        assert_eq!(listed.len(), 1);
    }
}
