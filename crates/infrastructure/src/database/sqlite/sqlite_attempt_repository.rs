use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use gateway_domain::{Attempt, AttemptRepository};
use gateway_errors::{GatewayError, GatewayResult};

pub struct SqliteAttemptRepository {
    pool: SqlitePool,
}

impl SqliteAttemptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_attempt(row: &sqlx::sqlite::SqliteRow) -> GatewayResult<Attempt> {
        Ok(Attempt {
            id: row.try_get("id")?,
            request_id: row.try_get("request_id")?,
            provider_id: row.try_get("provider_id")?,
            status: row.try_get("status")?,
            http_status: row.try_get("http_status")?,
            response_body: row.try_get("response_body")?,
            error_message: row.try_get("error_message")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
        })
    }
}

#[async_trait]
impl AttemptRepository for SqliteAttemptRepository {
    async fn append(&self, attempt: &Attempt) -> GatewayResult<Attempt> {
        let row = sqlx::query(
            r#"
            INSERT INTO attempts (request_id, provider_id, status, http_status, response_body, error_message, started_at, ended_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, request_id, provider_id, status, http_status, response_body, error_message, started_at, ended_at
            "#,
        )
        .bind(attempt.request_id)
        .bind(&attempt.provider_id)
        .bind(attempt.status)
        .bind(attempt.http_status)
        .bind(&attempt.response_body)
        .bind(&attempt.error_message)
        .bind(attempt.started_at)
        .bind(attempt.ended_at)
        .fetch_one(&self.pool)
        .await
        .map_err(GatewayError::Database)?;

        let created = Self::row_to_attempt(&row)?;
        debug!(
            "记录投递尝试: 请求 {} 服务商 {} 结果 {:?}",
            created.request_id, created.provider_id, created.status
        );
        Ok(created)
    }

    async fn get_by_request_id(&self, request_id: i64) -> GatewayResult<Vec<Attempt>> {
        let rows = sqlx::query(
            "SELECT id, request_id, provider_id, status, http_status, response_body, error_message, started_at, ended_at
             FROM attempts WHERE request_id = $1 ORDER BY id ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
        .map_err(GatewayError::Database)?;

        rows.iter().map(Self::row_to_attempt).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::test_support::test_pool;
    use chrono::Utc;
    use gateway_domain::AttemptStatus;

    fn attempt(request_id: i64, provider_id: &str, status: AttemptStatus) -> Attempt {
        Attempt {
            id: 0,
            request_id,
            provider_id: provider_id.to_string(),
            status,
            http_status: Some(200),
            response_body: Some("{}".to_string()),
            error_message: None,
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_append_and_list_ordered() {
        let pool = test_pool().await;
        // 外键列需要父行存在
        sqlx::query(
            "INSERT INTO sms_requests (phone, text, status, created_at, updated_at)
             VALUES ('010', 'x', 'PENDING', '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let repo = SqliteAttemptRepository::new(pool);

        let first = repo
            .append(&attempt(1, "provider1", AttemptStatus::ErrorTransient))
            .await
            .unwrap();
        let second = repo
            .append(&attempt(1, "provider2", AttemptStatus::Ok))
            .await
            .unwrap();

        // id 在同一请求内单调递增
        assert!(second.id > first.id);

        let attempts = repo.get_by_request_id(1).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].provider_id, "provider1");
        assert_eq!(attempts[0].status, AttemptStatus::ErrorTransient);
        assert_eq!(attempts[1].provider_id, "provider2");
        assert_eq!(attempts[1].status, AttemptStatus::Ok);

        assert!(repo.get_by_request_id(999).await.unwrap().is_empty());
    }
}
