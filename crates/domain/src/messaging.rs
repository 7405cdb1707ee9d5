//! 调度任务消息与队列抽象

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gateway_errors::GatewayResult;

/// 调度任务
///
/// 入队时不携带服务商：服务商在worker执行时刻选择，
/// 保证限流与健康状态是最新的。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchTask {
    pub request_id: i64,
    pub excluded_providers: Vec<String>,
    /// 第几次调度（从1开始）
    pub attempt_number: i32,
}

impl DispatchTask {
    /// 请求入队时的首个任务
    pub fn initial(request_id: i64) -> Self {
        Self {
            request_id,
            excluded_providers: Vec::new(),
            attempt_number: 1,
        }
    }

    /// 派生下一次调度任务，附加新的排除服务商
    pub fn next(&self, failed_provider: Option<&str>) -> Self {
        let mut excluded = self.excluded_providers.clone();
        if let Some(provider) = failed_provider {
            if !excluded.iter().any(|p| p == provider) {
                excluded.push(provider.to_string());
            }
        }
        Self {
            request_id: self.request_id,
            excluded_providers: excluded,
            attempt_number: self.attempt_number + 1,
        }
    }
}

/// 队列传输信封
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: String,
    pub task: DispatchTask,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(task: DispatchTask) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task,
            enqueued_at: Utc::now(),
        }
    }

    /// 序列化信封为JSON字符串
    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 从JSON字符串反序列化信封
    pub fn deserialize(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// 任务队列抽象接口
///
/// 持久性语义：出队的任务进入可见性超时窗口，worker在超时前必须ack，
/// 否则任务会被`reclaim_expired`重新放回队列。
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// 将任务放入队尾
    async fn enqueue(&self, envelope: &TaskEnvelope) -> GatewayResult<()>;

    /// 取出一个任务，队列为空时返回None
    async fn dequeue(&self) -> GatewayResult<Option<TaskEnvelope>>;

    /// 确认任务处理完成
    async fn ack(&self, envelope_id: &str) -> GatewayResult<()>;

    /// 放弃任务，requeue为true时重新入队
    async fn nack(&self, envelope_id: &str, requeue: bool) -> GatewayResult<()>;

    /// 当前待处理任务数量
    async fn depth(&self) -> GatewayResult<u64>;

    /// 将可见性超时已过的在途任务放回队列，返回回收数量
    async fn reclaim_expired(&self) -> GatewayResult<u64>;

    /// 清空队列（测试用）
    async fn purge(&self) -> GatewayResult<()>;
}
