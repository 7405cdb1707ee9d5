use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use gateway_domain::{
    RequestFilter, RequestStats, RequestStatus, SmsRequest, SmsRequestRepository,
};
use gateway_errors::{GatewayError, GatewayResult};

pub struct SqliteSmsRequestRepository {
    pool: SqlitePool,
}

impl SqliteSmsRequestRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> GatewayResult<SmsRequest> {
        let excluded_column: String = row.try_get("excluded_providers")?;
        Ok(SmsRequest {
            id: row.try_get("id")?,
            phone: row.try_get("phone")?,
            text: row.try_get("text")?,
            status: row.try_get("status")?,
            attempts_count: row.try_get("attempts_count")?,
            last_provider_id: row.try_get("last_provider_id")?,
            excluded_providers: SmsRequest::parse_excluded_providers(&excluded_column),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// 终态不可变更；更新0行时区分"不存在"与"已终态"
    async fn terminal_guard_error(&self, id: i64) -> GatewayError {
        match self.get_by_id(id).await {
            Ok(Some(_)) => {
                GatewayError::database_error(format!("请求 {id} 已处于终态，拒绝更新"))
            }
            _ => GatewayError::request_not_found(id),
        }
    }
}

#[async_trait]
impl SmsRequestRepository for SqliteSmsRequestRepository {
    #[instrument(skip(self, text))]
    async fn create(&self, phone: &str, text: &str) -> GatewayResult<SmsRequest> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO sms_requests (phone, text, status, attempts_count, excluded_providers, created_at, updated_at)
            VALUES ($1, $2, 'PENDING', 0, '', $3, $3)
            RETURNING id, phone, text, status, attempts_count, last_provider_id, excluded_providers, created_at, updated_at
            "#,
        )
        .bind(phone)
        .bind(text)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(GatewayError::Database)?;

        let request = Self::row_to_request(&row)?;
        debug!("创建短信请求成功: ID {}", request.id);
        Ok(request)
    }

    async fn get_by_id(&self, id: i64) -> GatewayResult<Option<SmsRequest>> {
        let row = sqlx::query(
            "SELECT id, phone, text, status, attempts_count, last_provider_id, excluded_providers, created_at, updated_at
             FROM sms_requests WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(GatewayError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_request(&row)?)),
            None => Ok(None),
        }
    }

    async fn mark_in_flight(&self, id: i64, provider_id: &str) -> GatewayResult<SmsRequest> {
        let row = sqlx::query(
            r#"
            UPDATE sms_requests
            SET status = 'IN_FLIGHT', last_provider_id = $2, attempts_count = attempts_count + 1, updated_at = $3
            WHERE id = $1 AND status NOT IN ('SUCCEEDED', 'FAILED_PERMANENT')
            RETURNING id, phone, text, status, attempts_count, last_provider_id, excluded_providers, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(provider_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(GatewayError::Database)?;

        match row {
            Some(row) => {
                let request = Self::row_to_request(&row)?;
                debug!(
                    "请求 {} 进入在途状态, 服务商 {}, 第 {} 次尝试",
                    id, provider_id, request.attempts_count
                );
                Ok(request)
            }
            None => Err(self.terminal_guard_error(id).await),
        }
    }

    async fn mark_succeeded(&self, id: i64) -> GatewayResult<()> {
        let result = sqlx::query(
            "UPDATE sms_requests SET status = 'SUCCEEDED', updated_at = $2
             WHERE id = $1 AND status NOT IN ('SUCCEEDED', 'FAILED_PERMANENT')",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(GatewayError::Database)?;

        if result.rows_affected() == 0 {
            return Err(self.terminal_guard_error(id).await);
        }

        debug!("请求 {} 标记为投递成功", id);
        Ok(())
    }

    async fn mark_failed_permanent(&self, id: i64) -> GatewayResult<()> {
        let result = sqlx::query(
            "UPDATE sms_requests SET status = 'FAILED_PERMANENT', updated_at = $2
             WHERE id = $1 AND status NOT IN ('SUCCEEDED', 'FAILED_PERMANENT')",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(GatewayError::Database)?;

        if result.rows_affected() == 0 {
            return Err(self.terminal_guard_error(id).await);
        }

        debug!("请求 {} 标记为永久失败", id);
        Ok(())
    }

    async fn update_excluded_providers(
        &self,
        id: i64,
        excluded: &[String],
    ) -> GatewayResult<()> {
        let column = excluded.join(",");
        let result = sqlx::query(
            "UPDATE sms_requests SET excluded_providers = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(column)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(GatewayError::Database)?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::request_not_found(id));
        }
        Ok(())
    }

    async fn list(&self, filter: &RequestFilter) -> GatewayResult<Vec<SmsRequest>> {
        let mut query = String::from(
            "SELECT id, phone, text, status, attempts_count, last_provider_id, excluded_providers, created_at, updated_at
             FROM sms_requests WHERE 1 = 1",
        );
        let mut param_count = 0;

        if filter.status.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND status = ${param_count}"));
        }
        if filter.provider.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND last_provider_id = ${param_count}"));
        }
        if filter.start_time.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND created_at >= ${param_count}"));
        }
        if filter.end_time.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND created_at <= ${param_count}"));
        }

        query.push_str(" ORDER BY created_at DESC");
        let limit = filter.limit.unwrap_or(100).clamp(1, 1000);
        param_count += 1;
        query.push_str(&format!(" LIMIT ${param_count}"));

        let mut sqlx_query = sqlx::query(&query);
        if let Some(status) = filter.status {
            sqlx_query = sqlx_query.bind(status);
        }
        if let Some(ref provider) = filter.provider {
            sqlx_query = sqlx_query.bind(provider);
        }
        if let Some(start_time) = filter.start_time {
            sqlx_query = sqlx_query.bind(start_time);
        }
        if let Some(end_time) = filter.end_time {
            sqlx_query = sqlx_query.bind(end_time);
        }
        sqlx_query = sqlx_query.bind(limit);

        let rows = sqlx_query
            .fetch_all(&self.pool)
            .await
            .map_err(GatewayError::Database)?;

        rows.iter().map(Self::row_to_request).collect()
    }

    async fn stats(&self) -> GatewayResult<RequestStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total,
                COUNT(CASE WHEN status = 'PENDING' THEN 1 END) as pending,
                COUNT(CASE WHEN status = 'IN_FLIGHT' THEN 1 END) as in_flight,
                COUNT(CASE WHEN status = 'SUCCEEDED' THEN 1 END) as succeeded,
                COUNT(CASE WHEN status = 'FAILED_PERMANENT' THEN 1 END) as failed_permanent
            FROM sms_requests
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(GatewayError::Database)?;

        Ok(RequestStats {
            total: row.try_get("total")?,
            pending: row.try_get("pending")?,
            in_flight: row.try_get("in_flight")?,
            succeeded: row.try_get("succeeded")?,
            failed_permanent: row.try_get("failed_permanent")?,
        })
    }
}
