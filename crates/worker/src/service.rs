use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, warn};

use gateway_dispatcher::{DispatchService, RetryScheduler};
use gateway_domain::TaskQueue;
use gateway_errors::GatewayResult;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Maximum number of dispatches in flight at once
    pub concurrency: usize,
    /// Sleep between polls when the queue is empty
    pub poll_interval: Duration,
    /// How often the promoter and the in-flight reaper run
    pub promoter_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 16,
            poll_interval: Duration::from_millis(100),
            promoter_interval: Duration::from_millis(200),
        }
    }
}

pub struct WorkerService {
    queue: Arc<dyn TaskQueue>,
    dispatch: Arc<DispatchService>,
    retry_scheduler: Arc<RetryScheduler>,
    settings: WorkerSettings,
}

impl WorkerService {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        dispatch: Arc<DispatchService>,
        retry_scheduler: Arc<RetryScheduler>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            dispatch,
            retry_scheduler,
            settings,
        }
    }

    /// Run the consume loop until a shutdown signal arrives, then drain
    /// in-flight dispatches before returning.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> GatewayResult<()> {
        info!(
            "Worker starting (concurrency: {}, poll interval: {:?})",
            self.settings.concurrency, self.settings.poll_interval
        );

        let promoter_handle = {
            let worker = Arc::clone(&self);
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move {
                worker.run_promoter_loop(shutdown_rx).await;
            })
        };

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Worker received shutdown signal");
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    let Ok(permit) = permit else { break };
                    match self.queue.dequeue().await {
                        Ok(Some(envelope)) => {
                            let worker = Arc::clone(&self);
                            tokio::spawn(async move {
                                worker.process(envelope).await;
                                drop(permit);
                            });
                        }
                        Ok(None) => {
                            drop(permit);
                            sleep(self.settings.poll_interval).await;
                        }
                        Err(e) => {
                            warn!("Dequeue failed: {}", e);
                            drop(permit);
                            sleep(self.settings.poll_interval).await;
                        }
                    }
                }
            }
        }

        // Drain: wait for every in-flight dispatch to release its permit
        let _ = semaphore
            .acquire_many(self.settings.concurrency as u32)
            .await;
        let _ = promoter_handle.await;

        info!("Worker stopped");
        Ok(())
    }

    async fn process(&self, envelope: gateway_domain::TaskEnvelope) {
        let envelope_id = envelope.id.clone();
        debug!(
            "Processing task {} (request {}, attempt {})",
            envelope_id, envelope.task.request_id, envelope.task.attempt_number
        );

        match self.dispatch.execute(&envelope.task).await {
            Ok(()) => {
                if let Err(e) = self.queue.ack(&envelope_id).await {
                    warn!("Failed to ack task {}: {}", envelope_id, e);
                }
            }
            Err(e) if e.is_retryable() => {
                // Let queue redelivery retry the whole step
                warn!(
                    "Task {} failed with retryable error, requeueing: {}",
                    envelope_id, e
                );
                if let Err(nack_err) = self.queue.nack(&envelope_id, true).await {
                    warn!("Failed to nack task {}: {}", envelope_id, nack_err);
                }
            }
            Err(e) => {
                error!("Task {} failed permanently: {}", envelope_id, e);
                if let Err(nack_err) = self.queue.nack(&envelope_id, false).await {
                    warn!("Failed to nack task {}: {}", envelope_id, nack_err);
                }
            }
        }
    }

    /// Promote due retries and reclaim expired in-flight tasks on a fixed tick
    async fn run_promoter_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut tick = interval(self.settings.promoter_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.retry_scheduler.promote_due().await {
                        warn!("Retry promotion failed: {}", e);
                    }
                    if let Err(e) = self.queue.reclaim_expired().await {
                        warn!("In-flight reclaim failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("Promoter loop received shutdown signal");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_dispatcher::{
        DistributionEngine, HealthTracker, RateLimiter, RetryPolicy,
    };
    use gateway_domain::{
        DispatchTask, KvStore, Provider, ProviderResponse, RequestStatus, SmsRequestRepository,
        TaskEnvelope,
    };
    use gateway_infrastructure::{InMemoryKvStore, KvTaskQueue};
    use gateway_testing_utils::mocks::{
        MockAttemptRepository, MockDeadLetterRepository, MockProviderClient,
        MockSmsRequestRepository,
    };

    struct Harness {
        worker: Arc<WorkerService>,
        queue: Arc<dyn TaskQueue>,
        requests: Arc<MockSmsRequestRepository>,
    }

    fn harness(provider_client: Arc<MockProviderClient>) -> Harness {
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
            vec![
                Provider::new("provider1", "http://localhost:8071"),
                Provider::new("provider2", "http://localhost:8072"),
                Provider::new("provider3", "http://localhost:8073"),
            ],
            health.clone(),
            rate_limiter,
        ));
        let queue: Arc<dyn TaskQueue> =
            Arc::new(KvTaskQueue::new(kv.clone(), Duration::from_secs(30)));
        let retry_scheduler = Arc::new(RetryScheduler::new(
            kv,
            queue.clone(),
            RetryPolicy {
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(10),
                jitter_factor: 0.0,
            },
        ));

        let dispatch = Arc::new(DispatchService::new(
            requests.clone(),
            attempts,
            dead_letters,
            distribution,
            health,
            provider_client,
            retry_scheduler.clone(),
            5,
        ));

        let worker = Arc::new(WorkerService::new(
            queue.clone(),
            dispatch,
            retry_scheduler,
            WorkerSettings {
                concurrency: 4,
                poll_interval: Duration::from_millis(10),
                promoter_interval: Duration::from_millis(20),
            },
        ));

        Harness {
            worker,
            queue,
            requests,
        }
    }

    #[tokio::test]
    async fn test_worker_processes_queued_task_until_success() {
        let harness = harness(Arc::new(MockProviderClient::new()));
        let request = harness.requests.create("010", "hi").await.unwrap();
        harness
            .queue
            .enqueue(&TaskEnvelope::new(DispatchTask::initial(request.id)))
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(Arc::clone(&harness.worker).run(shutdown_rx));

        // 等待worker消费并完成
        let mut succeeded = false;
        for _ in 0..50 {
            sleep(Duration::from_millis(10)).await;
            let stored = harness.requests.get_by_id(request.id).await.unwrap().unwrap();
            if stored.status == RequestStatus::Succeeded {
                succeeded = true;
                break;
            }
        }
        assert!(succeeded, "request never reached SUCCEEDED");

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_worker_promoter_drives_retry_to_completion() {
        let client = Arc::new(MockProviderClient::new());
        // 第一个调用503，重试后成功
        client.script("provider1", vec![ProviderResponse::from_http(503, "busy")]);

        let harness = harness(client);
        let request = harness.requests.create("010", "hi").await.unwrap();
        harness
            .queue
            .enqueue(&TaskEnvelope::new(DispatchTask::initial(request.id)))
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(Arc::clone(&harness.worker).run(shutdown_rx));

        let mut succeeded = false;
        for _ in 0..100 {
            sleep(Duration::from_millis(10)).await;
            let stored = harness.requests.get_by_id(request.id).await.unwrap().unwrap();
            if stored.status == RequestStatus::Succeeded {
                succeeded = true;
                break;
            }
        }
        assert!(succeeded, "retried request never reached SUCCEEDED");

        let stored = harness.requests.get_by_id(request.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts_count, 2);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_worker_shuts_down_cleanly_when_idle() {
        let harness = harness(Arc::new(MockProviderClient::new()));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(Arc::clone(&harness.worker).run(shutdown_rx));

        sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop in time")
            .unwrap()
            .unwrap();
    }
}
