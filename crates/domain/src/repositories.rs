//! 持久层仓储抽象
//!
//! 定义数据访问接口，遵循依赖倒置原则。写操作均为行级原子。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use gateway_errors::GatewayResult;

use crate::entities::{Attempt, DeadLetter, RequestFilter, SmsRequest};

/// 请求状态统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestStats {
    pub total: i64,
    pub pending: i64,
    pub in_flight: i64,
    pub succeeded: i64,
    pub failed_permanent: i64,
}

/// 短信请求仓储
#[async_trait]
pub trait SmsRequestRepository: Send + Sync {
    /// 创建PENDING状态的新请求，返回带数据库id的实体
    async fn create(&self, phone: &str, text: &str) -> GatewayResult<SmsRequest>;

    async fn get_by_id(&self, id: i64) -> GatewayResult<Option<SmsRequest>>;

    /// 原子地置为IN_FLIGHT、记录服务商并自增attempts_count，返回更新后的行。
    /// 请求处于终态时返回错误，终态不可变更。
    async fn mark_in_flight(&self, id: i64, provider_id: &str) -> GatewayResult<SmsRequest>;

    async fn mark_succeeded(&self, id: i64) -> GatewayResult<()>;

    async fn mark_failed_permanent(&self, id: i64) -> GatewayResult<()>;

    /// 将任务携带的排除集合镜像到请求行，便于审计
    async fn update_excluded_providers(
        &self,
        id: i64,
        excluded: &[String],
    ) -> GatewayResult<()>;

    async fn list(&self, filter: &RequestFilter) -> GatewayResult<Vec<SmsRequest>>;

    async fn stats(&self) -> GatewayResult<RequestStats>;
}

/// 投递尝试仓储
#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// 追加一条尝试记录，返回带数据库id的实体
    async fn append(&self, attempt: &Attempt) -> GatewayResult<Attempt>;

    async fn get_by_request_id(&self, request_id: i64) -> GatewayResult<Vec<Attempt>>;
}

/// 死信仓储
#[async_trait]
pub trait DeadLetterRepository: Send + Sync {
    async fn record(&self, dead_letter: &DeadLetter) -> GatewayResult<DeadLetter>;

    async fn get_by_request_id(&self, request_id: i64) -> GatewayResult<Option<DeadLetter>>;

    async fn list(&self, limit: i64) -> GatewayResult<Vec<DeadLetter>>;
}
