//! 调度任务执行
//!
//! 一次调度的完整生命周期：加载请求 → 选择服务商 → 出站调用 →
//! 记录尝试 → 决定成功、重试或死信。服务商在执行时刻选择而非入队时，
//! 限流与健康状态因此总是最新的。

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use gateway_domain::{
    Attempt, AttemptRepository, AttemptStatus, DeadLetter, DeadLetterReason, DeadLetterRepository,
    DispatchTask, ProviderClient, ProviderResponse, SmsRequest, SmsRequestRepository,
};
use gateway_errors::GatewayResult;

use crate::distribution::{DistributionEngine, Selection};
use crate::health_tracker::HealthTracker;
use crate::retry::RetryScheduler;

pub struct DispatchService {
    requests: Arc<dyn SmsRequestRepository>,
    attempts: Arc<dyn AttemptRepository>,
    dead_letters: Arc<dyn DeadLetterRepository>,
    distribution: Arc<DistributionEngine>,
    health_tracker: Arc<HealthTracker>,
    provider_client: Arc<dyn ProviderClient>,
    retry_scheduler: Arc<RetryScheduler>,
    max_attempts: i32,
}

impl DispatchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        requests: Arc<dyn SmsRequestRepository>,
        attempts: Arc<dyn AttemptRepository>,
        dead_letters: Arc<dyn DeadLetterRepository>,
        distribution: Arc<DistributionEngine>,
        health_tracker: Arc<HealthTracker>,
        provider_client: Arc<dyn ProviderClient>,
        retry_scheduler: Arc<RetryScheduler>,
        max_attempts: i32,
    ) -> Self {
        Self {
            requests,
            attempts,
            dead_letters,
            distribution,
            health_tracker,
            provider_client,
            retry_scheduler,
            max_attempts,
        }
    }

    /// 执行一个调度任务。返回Ok即表示任务已处理完毕，调用方应当ack；
    /// 返回Err时任务未完成，交由队列重投递。
    pub async fn execute(&self, task: &DispatchTask) -> GatewayResult<()> {
        let Some(request) = self.requests.get_by_id(task.request_id).await? else {
            warn!("调度任务指向不存在的请求 {}, 丢弃", task.request_id);
            return Ok(());
        };

        // 终态请求的重复投递是无操作
        if request.is_terminal() {
            debug!(
                "请求 {} 已处于终态 {:?}, 丢弃重复任务",
                request.id, request.status
            );
            return Ok(());
        }

        match self.distribution.select(&task.excluded_providers).await? {
            Selection::NoProviderAvailable => self.handle_no_provider(task, &request).await,
            Selection::Selected(provider) => {
                let request = self.requests.mark_in_flight(request.id, &provider.id).await?;

                let started_at = Utc::now();
                let response = self
                    .provider_client
                    .send_sms(&provider, &request.phone, &request.text)
                    .await;

                let attempt = Attempt {
                    id: 0,
                    request_id: request.id,
                    provider_id: provider.id.clone(),
                    status: response.status,
                    http_status: response.http_status.map(i32::from),
                    response_body: response.body.clone(),
                    error_message: response.error_message.clone(),
                    started_at,
                    ended_at: Some(Utc::now()),
                };
                self.attempts.append(&attempt).await?;

                match response.status {
                    AttemptStatus::Ok => self.handle_success(&request, &provider.id).await,
                    AttemptStatus::ErrorPermanent => {
                        self.handle_permanent_failure(&request, &provider.id, &response)
                            .await
                    }
                    AttemptStatus::ErrorTransient | AttemptStatus::Timeout => {
                        self.handle_transient_failure(task, &request, &provider.id, &response)
                            .await
                    }
                }
            }
        }
    }

    async fn handle_success(&self, request: &SmsRequest, provider_id: &str) -> GatewayResult<()> {
        self.health_tracker.record_success(provider_id).await?;
        self.requests.mark_succeeded(request.id).await?;
        info!(
            "请求 {} 经服务商 {} 投递成功 (第 {} 次尝试)",
            request.id, provider_id, request.attempts_count
        );
        Ok(())
    }

    /// 4xx业务拒绝：不再重试，直接终结并写入死信
    async fn handle_permanent_failure(
        &self,
        request: &SmsRequest,
        provider_id: &str,
        response: &ProviderResponse,
    ) -> GatewayResult<()> {
        warn!(
            "请求 {} 被服务商 {} 永久拒绝: {:?}",
            request.id, provider_id, response.error_message
        );
        self.dead_letter(request.id, DeadLetterReason::ProviderPermanent)
            .await
    }

    async fn handle_transient_failure(
        &self,
        task: &DispatchTask,
        request: &SmsRequest,
        provider_id: &str,
        response: &ProviderResponse,
    ) -> GatewayResult<()> {
        self.health_tracker.record_failure(provider_id).await?;

        if request.attempts_count >= self.max_attempts {
            info!(
                "请求 {} 已用尽 {} 次尝试, 写入死信",
                request.id, self.max_attempts
            );
            return self
                .dead_letter(request.id, DeadLetterReason::MaxAttemptsExceeded)
                .await;
        }

        let next = self.next_task(task, Some(provider_id));
        self.requests
            .update_excluded_providers(request.id, &next.excluded_providers)
            .await?;
        self.retry_scheduler.schedule(&next).await?;

        debug!(
            "请求 {} 瞬时失败 ({:?}), 已计划第 {} 次调度",
            request.id, response.status, next.attempt_number
        );
        Ok(())
    }

    /// 当前没有可用服务商：带着原排除集合推迟重试。
    /// 可用性耗尽通过同一个尝试预算终结。
    async fn handle_no_provider(
        &self,
        task: &DispatchTask,
        request: &SmsRequest,
    ) -> GatewayResult<()> {
        if task.attempt_number >= self.max_attempts {
            let reason = if request.attempts_count == 0 {
                DeadLetterReason::NoProviderAvailablePersistent
            } else {
                DeadLetterReason::MaxAttemptsExceeded
            };
            info!(
                "请求 {} 在第 {} 次调度时仍无可用服务商, 写入死信 ({})",
                request.id,
                task.attempt_number,
                reason.as_str()
            );
            return self.dead_letter(request.id, reason).await;
        }

        let next = self.next_task(task, None);
        self.retry_scheduler.schedule(&next).await?;
        debug!(
            "请求 {} 暂无可用服务商, 已计划第 {} 次调度",
            request.id, next.attempt_number
        );
        Ok(())
    }

    /// 派生下一个任务。失败服务商加入排除集合；当排除集合将要覆盖
    /// 全部已知服务商时清空它，让后续尝试重新面向完整候选池。
    fn next_task(&self, task: &DispatchTask, failed_provider: Option<&str>) -> DispatchTask {
        let mut next = task.next(failed_provider);
        if next.excluded_providers.len() >= self.distribution.providers().len() {
            next.excluded_providers.clear();
        }
        next
    }

    async fn dead_letter(&self, request_id: i64, reason: DeadLetterReason) -> GatewayResult<()> {
        self.requests.mark_failed_permanent(request_id).await?;
        let attempts = self.attempts.get_by_request_id(request_id).await?;
        self.dead_letters
            .record(&DeadLetter::new(request_id, reason, &attempts))
            .await?;
        Ok(())
    }
}
