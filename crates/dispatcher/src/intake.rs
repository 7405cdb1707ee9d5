//! 请求接入
//!
//! HTTP协作者调用的唯一入口：全局限流准入 → 持久化PENDING请求 →
//! 投递首个调度任务。被全局限流拒绝的请求既不落库也不入队。

use std::sync::Arc;

use tracing::{info, warn};

use gateway_domain::{DispatchTask, SmsRequestRepository, TaskEnvelope, TaskQueue};
use gateway_errors::GatewayResult;

use crate::rate_limiter::{Admission, GlobalRateLimiter};

/// 接入结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    Queued { request_id: i64 },
    GlobalRateLimited { count: i64, limit: i64 },
}

pub struct IntakeService {
    global_rate_limiter: Arc<GlobalRateLimiter>,
    requests: Arc<dyn SmsRequestRepository>,
    queue: Arc<dyn TaskQueue>,
}

impl IntakeService {
    pub fn new(
        global_rate_limiter: Arc<GlobalRateLimiter>,
        requests: Arc<dyn SmsRequestRepository>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            global_rate_limiter,
            requests,
            queue,
        }
    }

    pub async fn queue_sms(&self, phone: &str, text: &str) -> GatewayResult<IntakeOutcome> {
        match self.global_rate_limiter.admit().await? {
            Admission::RateLimited { count, limit } => {
                warn!("全局限流拒绝接入: {}/{}", count, limit);
                return Ok(IntakeOutcome::GlobalRateLimited { count, limit });
            }
            Admission::Admitted { .. } => {}
        }

        let request = self.requests.create(phone, text).await?;

        let envelope = TaskEnvelope::new(DispatchTask::initial(request.id));
        self.queue.enqueue(&envelope).await?;

        info!("短信请求 {} 已入队 (任务 {})", request.id, envelope.id);
        Ok(IntakeOutcome::Queued {
            request_id: request.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_domain::SmsRequestRepository;
    use gateway_infrastructure::{InMemoryKvStore, KvTaskQueue};
    use gateway_testing_utils::mocks::MockSmsRequestRepository;
    use std::time::Duration;

    fn intake_with_limit(limit: i64) -> (IntakeService, Arc<MockSmsRequestRepository>, Arc<dyn TaskQueue>) {
        let kv: Arc<dyn gateway_domain::KvStore> = Arc::new(InMemoryKvStore::new());
        let global = Arc::new(GlobalRateLimiter::new(
            kv.clone(),
            limit,
            Duration::from_secs(1),
        ));
        let requests = Arc::new(MockSmsRequestRepository::new());
        let queue: Arc<dyn TaskQueue> =
            Arc::new(KvTaskQueue::new(kv, Duration::from_secs(30)));
        (
            IntakeService::new(global, requests.clone(), queue.clone()),
            requests,
            queue,
        )
    }

    #[tokio::test]
    async fn test_queue_sms_persists_and_enqueues() {
        let (intake, requests, queue) = intake_with_limit(100);

        let outcome = intake.queue_sms("01921317475", "hello").await.unwrap();
        let IntakeOutcome::Queued { request_id } = outcome else {
            panic!("expected queued outcome");
        };

        let stored = requests.get_by_id(request_id).await.unwrap().unwrap();
        assert_eq!(stored.phone, "01921317475");
        assert_eq!(queue.depth().await.unwrap(), 1);

        let envelope = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(envelope.task.request_id, request_id);
        assert_eq!(envelope.task.attempt_number, 1);
        assert!(envelope.task.excluded_providers.is_empty());
    }

    #[tokio::test]
    async fn test_global_rate_limit_rejects_without_side_effects() {
        let (intake, requests, queue) = intake_with_limit(2);

        assert!(matches!(
            intake.queue_sms("010", "a").await.unwrap(),
            IntakeOutcome::Queued { .. }
        ));
        assert!(matches!(
            intake.queue_sms("010", "b").await.unwrap(),
            IntakeOutcome::Queued { .. }
        ));

        let outcome = intake.queue_sms("010", "c").await.unwrap();
        assert!(matches!(
            outcome,
            IntakeOutcome::GlobalRateLimited { count: 2, limit: 2 }
        ));

        // 被拒绝的请求没有落库也没有入队
        assert_eq!(requests.count(), 2);
        assert_eq!(queue.depth().await.unwrap(), 2);
    }
}
