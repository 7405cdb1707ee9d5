use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use gateway_dispatcher::{
    DispatchService, DistributionEngine, HealthTracker, RateLimiter, RetryPolicy, RetryScheduler,
};
use gateway_domain::{
    AttemptStatus, DeadLetterReason, DispatchTask, KvStore, Provider, ProviderResponse,
    RequestStatus, SmsRequestRepository, TaskQueue,
};
use gateway_infrastructure::{InMemoryKvStore, KvTaskQueue};
use gateway_testing_utils::mocks::{
    MockAttemptRepository, MockDeadLetterRepository, MockProviderClient, MockSmsRequestRepository,
};

struct TestStack {
    requests: Arc<MockSmsRequestRepository>,
    attempts: Arc<MockAttemptRepository>,
    dead_letters: Arc<MockDeadLetterRepository>,
    provider_client: Arc<MockProviderClient>,
    health: Arc<HealthTracker>,
    queue: Arc<dyn TaskQueue>,
    retry: Arc<RetryScheduler>,
    service: DispatchService,
}

fn providers() -> Vec<Provider> {
    vec![
        Provider::new("provider1", "http://localhost:8071"),
        Provider::new("provider2", "http://localhost:8072"),
        Provider::new("provider3", "http://localhost:8073"),
    ]
}

fn stack(max_attempts: i32) -> TestStack {
    stack_with_client(max_attempts, Arc::new(MockProviderClient::new()))
}

/// 所有服务商都返回HTTP 500的栈
fn all_failing_stack(max_attempts: i32) -> TestStack {
    stack_with_client(
        max_attempts,
        Arc::new(MockProviderClient::new().with_default(ProviderResponse::from_http(500, "boom"))),
    )
}

fn stack_with_client(max_attempts: i32, provider_client: Arc<MockProviderClient>) -> TestStack {
    let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
    let requests = Arc::new(MockSmsRequestRepository::new());
    let attempts = Arc::new(MockAttemptRepository::new());
    let dead_letters = Arc::new(MockDeadLetterRepository::new());

    let health = Arc::new(HealthTracker::new(
        kv.clone(),
        Duration::from_secs(300),
        0.7,
        10,
    ));
    let rate_limiter = Arc::new(RateLimiter::new(kv.clone(), 1000, Duration::from_secs(1)));
    let distribution = Arc::new(DistributionEngine::new(
        kv.clone(),
        providers(),
        health.clone(),
        rate_limiter,
    ));
    let queue: Arc<dyn TaskQueue> = Arc::new(KvTaskQueue::new(kv.clone(), Duration::from_secs(30)));
    let retry = Arc::new(RetryScheduler::new(
        kv,
        queue.clone(),
        RetryPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            jitter_factor: 0.0,
        },
    ));

    let service = DispatchService::new(
        requests.clone(),
        attempts.clone(),
        dead_letters.clone(),
        distribution,
        health.clone(),
        provider_client.clone(),
        retry.clone(),
        max_attempts,
    );

    TestStack {
        requests,
        attempts,
        dead_letters,
        provider_client,
        health,
        queue,
        retry,
        service,
    }
}

/// 晋升重试集合中的到期任务并取出
async fn promote_and_dequeue(stack: &TestStack) -> DispatchTask {
    sleep(Duration::from_millis(30)).await;
    assert!(stack.retry.promote_due().await.unwrap() >= 1);
    stack.queue.dequeue().await.unwrap().unwrap().task
}

#[tokio::test]
async fn test_happy_path_marks_succeeded() {
    let stack = stack(5);
    let request = stack.requests.create("01921317475", "hello").await.unwrap();

    stack
        .service
        .execute(&DispatchTask::initial(request.id))
        .await
        .unwrap();

    let stored = stack.requests.get_by_id(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Succeeded);
    assert_eq!(stored.attempts_count, 1);

    let attempts = stack.attempts.all();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::Ok);
    assert_eq!(attempts[0].http_status, Some(200));
    assert_eq!(stack.provider_client.call_count(), 1);
    assert_eq!(stack.dead_letters.count(), 0);
}

#[tokio::test]
async fn test_transient_failure_schedules_retry_with_exclusion() {
    let stack = stack(5);
    let request = stack.requests.create("01921317475", "hello").await.unwrap();

    // 首轮平滑WRR在全零亏空下按字典序选中provider1
    stack
        .provider_client
        .script("provider1", vec![ProviderResponse::from_http(503, "busy")]);

    stack
        .service
        .execute(&DispatchTask::initial(request.id))
        .await
        .unwrap();

    let stored = stack.requests.get_by_id(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::InFlight);
    assert_eq!(stored.attempts_count, 1);
    assert_eq!(stored.excluded_providers, vec!["provider1"]);

    let next = promote_and_dequeue(&stack).await;
    assert_eq!(next.attempt_number, 2);
    assert_eq!(next.excluded_providers, vec!["provider1"]);

    // 第二次调度排除provider1后成功
    stack.service.execute(&next).await.unwrap();

    let stored = stack.requests.get_by_id(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Succeeded);
    assert_eq!(stored.attempts_count, 2);

    let attempts = stack.attempts.all();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].provider_id, "provider1");
    assert_eq!(attempts[0].status, AttemptStatus::ErrorTransient);
    assert_ne!(attempts[1].provider_id, "provider1");
    assert_eq!(attempts[1].status, AttemptStatus::Ok);
}

#[tokio::test]
async fn test_permanent_failure_dead_letters_without_retry() {
    let stack = stack(5);
    let request = stack.requests.create("01921317475", "hello").await.unwrap();

    stack.provider_client.script(
        "provider1",
        vec![ProviderResponse::from_http(400, "invalid number")],
    );

    stack
        .service
        .execute(&DispatchTask::initial(request.id))
        .await
        .unwrap();

    let stored = stack.requests.get_by_id(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::FailedPermanent);

    let dead_letters = stack.dead_letters.all();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].reason, DeadLetterReason::ProviderPermanent);
    assert_eq!(dead_letters[0].attempts_snapshot.as_array().unwrap().len(), 1);

    // 永久失败不会计划重试
    assert_eq!(stack.retry.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_exhaustion_writes_dead_letter_after_max_attempts() {
    // 所有服务商都返回500
    let stack = all_failing_stack(3);
    let request = stack.requests.create("01921317475", "hello").await.unwrap();

    let mut task = DispatchTask::initial(request.id);
    for expected_attempt in 1..=2 {
        stack.service.execute(&task).await.unwrap();
        let stored = stack.requests.get_by_id(request.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts_count, expected_attempt);
        task = promote_and_dequeue(&stack).await;
    }

    // 第三次尝试用尽预算
    stack.service.execute(&task).await.unwrap();

    let stored = stack.requests.get_by_id(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::FailedPermanent);
    assert_eq!(stored.attempts_count, 3);

    let attempts = stack.attempts.all();
    assert_eq!(attempts.len(), 3);
    // 每次失败的服务商都进入后续尝试的排除集合
    assert_ne!(attempts[1].provider_id, attempts[0].provider_id);
    assert_ne!(attempts[2].provider_id, attempts[0].provider_id);
    assert_ne!(attempts[2].provider_id, attempts[1].provider_id);

    let dead_letters = stack.dead_letters.all();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].reason, DeadLetterReason::MaxAttemptsExceeded);
    assert_eq!(dead_letters[0].attempts_snapshot.as_array().unwrap().len(), 3);

    assert_eq!(stack.retry.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_terminal_request_redelivery_is_noop() {
    let stack = stack(5);
    let request = stack.requests.create("01921317475", "hello").await.unwrap();
    stack.requests.mark_in_flight(request.id, "provider1").await.unwrap();
    stack.requests.mark_succeeded(request.id).await.unwrap();

    stack
        .service
        .execute(&DispatchTask::initial(request.id))
        .await
        .unwrap();

    assert_eq!(stack.provider_client.call_count(), 0);
    assert_eq!(stack.attempts.count(), 0);
    assert_eq!(stack.retry.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_request_is_dropped() {
    let stack = stack(5);
    stack
        .service
        .execute(&DispatchTask::initial(424242))
        .await
        .unwrap();
    assert_eq!(stack.provider_client.call_count(), 0);
}

#[tokio::test]
async fn test_unhealthy_provider_is_routed_around() {
    let stack = stack(5);
    // 10个失败样本将provider1推过阈值
    for _ in 0..10 {
        stack.health.record_failure("provider1").await.unwrap();
    }
    assert!(!stack.health.is_healthy("provider1").await.unwrap());

    for _ in 0..4 {
        let request = stack.requests.create("010", "x").await.unwrap();
        stack
            .service
            .execute(&DispatchTask::initial(request.id))
            .await
            .unwrap();
    }

    assert_eq!(stack.provider_client.calls_for("provider1"), 0);
    assert_eq!(stack.provider_client.call_count(), 4);
}

#[tokio::test]
async fn test_all_providers_unhealthy_dead_letters_as_no_provider() {
    let stack = all_unhealthy_stack(3).await;
    let request = stack.requests.create("01921317475", "hello").await.unwrap();

    let mut task = DispatchTask::initial(request.id);
    for _ in 1..=2 {
        stack.service.execute(&task).await.unwrap();
        task = promote_and_dequeue(&stack).await;
    }
    stack.service.execute(&task).await.unwrap();

    // 从未发起过出站调用
    assert_eq!(stack.provider_client.call_count(), 0);
    assert_eq!(stack.attempts.count(), 0);

    let stored = stack.requests.get_by_id(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::FailedPermanent);

    let dead_letters = stack.dead_letters.all();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(
        dead_letters[0].reason,
        DeadLetterReason::NoProviderAvailablePersistent
    );
}

async fn all_unhealthy_stack(max_attempts: i32) -> TestStack {
    let stack = stack(max_attempts);
    for provider in ["provider1", "provider2", "provider3"] {
        for _ in 0..10 {
            stack.health.record_failure(provider).await.unwrap();
        }
    }
    stack
}

#[tokio::test]
async fn test_exclusion_set_resets_when_pool_would_empty() {
    let stack = all_failing_stack(5);
    let request = stack.requests.create("01921317475", "hello").await.unwrap();

    // 前两次失败积累排除集合
    let task = DispatchTask::initial(request.id);
    stack.service.execute(&task).await.unwrap();
    let second = promote_and_dequeue(&stack).await;
    assert_eq!(second.excluded_providers.len(), 1);

    stack.service.execute(&second).await.unwrap();
    let third = promote_and_dequeue(&stack).await;
    assert_eq!(third.excluded_providers.len(), 2);

    // 第三次失败会覆盖全部服务商，排除集合清空重新开放候选池
    stack.service.execute(&third).await.unwrap();
    let fourth = promote_and_dequeue(&stack).await;
    assert_eq!(fourth.attempt_number, 4);
    assert!(fourth.excluded_providers.is_empty());
}
