//! 重试调度器
//!
//! 重试绝不让worker睡眠：延迟被编码为 `queue:retry` 有序集合的
//! `due_at` 分值（毫秒时间戳）。晋升者周期性扫描到期条目，通过原子的
//! ZREM认领后放回活动队列，多个实例同时晋升时每个条目只会被认领一次。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use gateway_domain::{DispatchTask, KvStore, TaskEnvelope, TaskQueue};
use gateway_errors::GatewayResult;

pub const RETRY_SET_KEY: &str = "queue:retry";

const PROMOTE_BATCH: usize = 128;

/// 退避策略配置
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 指数退避基数
    pub base_delay: Duration,
    /// 退避上限
    pub max_delay: Duration,
    /// 随机抖动范围（±比例）
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// 计算第n次失败后的重试延迟（n从1开始）：base * 2^(n-1)，
    /// 封顶后加上±jitter_factor的随机抖动以避免雷群。
    pub fn backoff_delay(&self, failed_attempt: i32) -> Duration {
        let exponent = (failed_attempt - 1).max(0).min(30) as u32;
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent));
        let capped = exponential.min(self.max_delay);

        let jitter = capped.as_secs_f64() * self.jitter_factor * (rand::random::<f64>() * 2.0 - 1.0);
        let final_secs = (capped.as_secs_f64() + jitter).max(0.0);
        Duration::from_secs_f64(final_secs)
    }
}

pub struct RetryScheduler {
    kv: Arc<dyn KvStore>,
    queue: Arc<dyn TaskQueue>,
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(kv: Arc<dyn KvStore>, queue: Arc<dyn TaskQueue>, policy: RetryPolicy) -> Self {
        Self { kv, queue, policy }
    }

    /// 为下一次调度写入重试条目。
    ///
    /// `task.attempt_number` 是即将执行的调度序号，延迟由刚刚失败的
    /// 那次（attempt_number - 1）决定。
    pub async fn schedule(&self, task: &DispatchTask) -> GatewayResult<()> {
        let delay = self.policy.backoff_delay(task.attempt_number - 1);
        let due_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        let envelope = TaskEnvelope::new(task.clone());
        let payload = envelope.serialize()?;
        self.kv.zadd(RETRY_SET_KEY, due_at, &payload).await?;

        info!(
            "请求 {} 的第 {} 次调度已计划, 延迟 {:?}",
            task.request_id, task.attempt_number, delay
        );
        Ok(())
    }

    /// 将到期条目晋升回活动队列，返回晋升数量。
    ///
    /// 先ZREM认领再入队：认领失败说明另一个晋升者已经拿走该条目。
    pub async fn promote_due(&self) -> GatewayResult<u64> {
        let now = Utc::now().timestamp_millis();
        let due = self
            .kv
            .zrange_by_score(RETRY_SET_KEY, 0, now, PROMOTE_BATCH)
            .await?;

        let mut promoted = 0;
        for payload in due {
            if !self.kv.zrem(RETRY_SET_KEY, &payload).await? {
                continue;
            }
            match TaskEnvelope::deserialize(&payload) {
                Ok(envelope) => {
                    if let Err(e) = self.queue.enqueue(&envelope).await {
                        // 认领后入队失败，放回重试集合避免任务丢失
                        self.kv.zadd(RETRY_SET_KEY, now, &payload).await?;
                        return Err(e);
                    }
                    promoted += 1;
                }
                Err(e) => {
                    debug!("丢弃无法解析的重试条目: {}", e);
                }
            }
        }

        if promoted > 0 {
            debug!("本轮晋升了 {} 个重试任务", promoted);
        }
        Ok(promoted)
    }

    /// 重试集合当前大小（观测用）
    pub async fn pending_count(&self) -> GatewayResult<usize> {
        Ok(self
            .kv
            .zrange_by_score(RETRY_SET_KEY, 0, i64::MAX, 100_000)
            .await?
            .len())
    }
}
