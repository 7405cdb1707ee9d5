//! KV存储上的调度任务队列
//!
//! 活动队列是一个列表（LPUSH/RPOP），在途任务进入按可见性截止时间
//! 打分的有序集合。worker超时未ack的任务由`reclaim_expired`放回队列，
//! 这是显式选择的至少一次崩溃恢复策略。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use gateway_domain::{KvStore, TaskEnvelope, TaskQueue};
use gateway_errors::{GatewayError, GatewayResult};

pub const DISPATCH_QUEUE_KEY: &str = "queue:dispatch";
pub const IN_FLIGHT_KEY: &str = "queue:in_flight";

const RECLAIM_BATCH: usize = 128;

pub struct KvTaskQueue {
    kv: Arc<dyn KvStore>,
    live_key: String,
    in_flight_key: String,
    visibility_timeout: Duration,
    /// envelope id -> raw payload, the ack/nack lookup for tasks this
    /// process currently holds
    in_flight: Mutex<HashMap<String, String>>,
}

impl KvTaskQueue {
    pub fn new(kv: Arc<dyn KvStore>, visibility_timeout: Duration) -> Self {
        Self {
            kv,
            live_key: DISPATCH_QUEUE_KEY.to_string(),
            in_flight_key: IN_FLIGHT_KEY.to_string(),
            visibility_timeout,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn take_mapping(&self, envelope_id: &str) -> GatewayResult<String> {
        let mut mapping = self
            .in_flight
            .lock()
            .map_err(|e| GatewayError::queue_error(format!("Failed to lock in-flight map: {e}")))?;
        mapping.remove(envelope_id).ok_or_else(|| {
            GatewayError::queue_error(format!("Envelope {envelope_id} not found in in-flight map"))
        })
    }

    fn insert_mapping(&self, envelope_id: &str, payload: &str) -> GatewayResult<()> {
        let mut mapping = self
            .in_flight
            .lock()
            .map_err(|e| GatewayError::queue_error(format!("Failed to lock in-flight map: {e}")))?;
        mapping.insert(envelope_id.to_string(), payload.to_string());
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for KvTaskQueue {
    async fn enqueue(&self, envelope: &TaskEnvelope) -> GatewayResult<()> {
        let payload = envelope.serialize()?;
        self.kv.lpush(&self.live_key, &payload).await?;
        debug!(
            "Enqueued task {} for request {}",
            envelope.id, envelope.task.request_id
        );
        Ok(())
    }

    async fn dequeue(&self) -> GatewayResult<Option<TaskEnvelope>> {
        let Some(payload) = self.kv.rpop(&self.live_key).await? else {
            return Ok(None);
        };

        let envelope = match TaskEnvelope::deserialize(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Malformed payloads are dropped rather than poisoning the loop
                warn!("Dropping malformed task payload: {}", e);
                return Ok(None);
            }
        };

        let deadline = Utc::now().timestamp_millis() + self.visibility_timeout.as_millis() as i64;
        self.kv.zadd(&self.in_flight_key, deadline, &payload).await?;
        self.insert_mapping(&envelope.id, &payload)?;

        debug!(
            "Dequeued task {} for request {} (visible again at {})",
            envelope.id, envelope.task.request_id, deadline
        );
        Ok(Some(envelope))
    }

    async fn ack(&self, envelope_id: &str) -> GatewayResult<()> {
        let payload = self.take_mapping(envelope_id)?;
        let removed = self.kv.zrem(&self.in_flight_key, &payload).await?;
        if removed {
            debug!("Acknowledged task {}", envelope_id);
        } else {
            warn!(
                "Task {} was not in the in-flight set (possibly reclaimed)",
                envelope_id
            );
        }
        Ok(())
    }

    async fn nack(&self, envelope_id: &str, requeue: bool) -> GatewayResult<()> {
        let payload = self.take_mapping(envelope_id)?;
        self.kv.zrem(&self.in_flight_key, &payload).await?;
        if requeue {
            self.kv.lpush(&self.live_key, &payload).await?;
        }
        debug!("Nacked task {} (requeue: {})", envelope_id, requeue);
        Ok(())
    }

    async fn depth(&self) -> GatewayResult<u64> {
        self.kv.llen(&self.live_key).await
    }

    async fn reclaim_expired(&self) -> GatewayResult<u64> {
        let now = Utc::now().timestamp_millis();
        let expired = self
            .kv
            .zrange_by_score(&self.in_flight_key, 0, now, RECLAIM_BATCH)
            .await?;

        let mut reclaimed = 0;
        for payload in expired {
            // Atomic claim: only the caller whose ZREM succeeds requeues
            if self.kv.zrem(&self.in_flight_key, &payload).await? {
                self.kv.lpush(&self.live_key, &payload).await?;
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            warn!("Reclaimed {} expired in-flight tasks", reclaimed);
        }
        Ok(reclaimed)
    }

    async fn purge(&self) -> GatewayResult<()> {
        self.kv
            .del(&[self.live_key.as_str(), self.in_flight_key.as_str()])
            .await?;
        if let Ok(mut mapping) = self.in_flight.lock() {
            mapping.clear();
        }
        Ok(())
    }
}
