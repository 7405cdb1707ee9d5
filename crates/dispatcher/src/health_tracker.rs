//! 服务商健康追踪
//!
//! 每个服务商维护两个滚动计数器（成功/失败），键固定、TTL等于统计窗口，
//! 与限流器相同的键模式。失败率在样本数达到下限后越过阈值时，写入带TTL的
//! 粘滞不健康标记。标记只因TTL到期或显式reset清除：即使流量停止，
//! 坏掉的服务商也会被隔离满整个粘滞期。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use gateway_domain::{parse_count, KvStore};
use gateway_errors::GatewayResult;

fn success_key(provider_id: &str) -> String {
    format!("health:success:{provider_id}")
}

fn failure_key(provider_id: &str) -> String {
    format!("health:failure:{provider_id}")
}

fn unhealthy_key(provider_id: &str) -> String {
    format!("health:unhealthy:{provider_id}")
}

/// 服务商健康状态视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealthStatus {
    pub provider_id: String,
    pub success: i64,
    pub failure: i64,
    pub failure_ratio: f64,
    pub unhealthy: bool,
    pub unhealthy_until: Option<DateTime<Utc>>,
    pub threshold: f64,
    pub window_seconds: u64,
}

pub struct HealthTracker {
    kv: Arc<dyn KvStore>,
    window: Duration,
    sticky_duration: Duration,
    failure_threshold: f64,
    min_samples: i64,
}

impl HealthTracker {
    pub fn new(
        kv: Arc<dyn KvStore>,
        window: Duration,
        failure_threshold: f64,
        min_samples: i64,
    ) -> Self {
        Self {
            kv,
            window,
            sticky_duration: window,
            failure_threshold,
            min_samples,
        }
    }

    /// 粘滞期与统计窗口默认相等，测试中可单独调短
    pub fn with_sticky_duration(mut self, sticky_duration: Duration) -> Self {
        self.sticky_duration = sticky_duration;
        self
    }

    pub async fn record_success(&self, provider_id: &str) -> GatewayResult<()> {
        let key = success_key(provider_id);
        let count = self.kv.incr(&key).await?;
        if count == 1 {
            self.kv.expire(&key, self.window).await?;
        }
        debug!("记录服务商 {} 成功, 窗口内成功 {}", provider_id, count);
        Ok(())
    }

    pub async fn record_failure(&self, provider_id: &str) -> GatewayResult<()> {
        let key = failure_key(provider_id);
        let count = self.kv.incr(&key).await?;
        if count == 1 {
            self.kv.expire(&key, self.window).await?;
        }
        debug!("记录服务商 {} 失败, 窗口内失败 {}", provider_id, count);

        self.evaluate(provider_id).await
    }

    /// 重新计算失败率，必要时设置粘滞不健康标记
    async fn evaluate(&self, provider_id: &str) -> GatewayResult<()> {
        let (success, failure) = self.counters(provider_id).await?;
        let total = success + failure;
        if total < self.min_samples {
            return Ok(());
        }

        let ratio = failure as f64 / total.max(1) as f64;
        if ratio >= self.failure_threshold {
            self.kv
                .set(&unhealthy_key(provider_id), "1", Some(self.sticky_duration))
                .await?;
            warn!(
                "服务商 {} 失败率 {:.3} 超过阈值 {:.2} (样本 {}), 标记为不健康 {:?}",
                provider_id, ratio, self.failure_threshold, total, self.sticky_duration
            );
        }
        Ok(())
    }

    async fn counters(&self, provider_id: &str) -> GatewayResult<(i64, i64)> {
        let success = self.kv.get(&success_key(provider_id)).await?;
        let failure = self.kv.get(&failure_key(provider_id)).await?;
        Ok((
            parse_count(success.as_deref()),
            parse_count(failure.as_deref()),
        ))
    }

    /// 粘滞标记不存在即视为健康
    pub async fn is_healthy(&self, provider_id: &str) -> GatewayResult<bool> {
        Ok(self.kv.get(&unhealthy_key(provider_id)).await?.is_none())
    }

    pub async fn status(&self, provider_id: &str) -> GatewayResult<ProviderHealthStatus> {
        let (success, failure) = self.counters(provider_id).await?;
        let total = success + failure;
        let failure_ratio = if total == 0 {
            0.0
        } else {
            failure as f64 / total as f64
        };

        let unhealthy = !self.is_healthy(provider_id).await?;
        let unhealthy_until = if unhealthy {
            self.kv
                .ttl(&unhealthy_key(provider_id))
                .await?
                .map(|remaining| {
                    Utc::now()
                        + chrono::Duration::from_std(remaining)
                            .unwrap_or_else(|_| chrono::Duration::zero())
                })
        } else {
            None
        };

        Ok(ProviderHealthStatus {
            provider_id: provider_id.to_string(),
            success,
            failure,
            failure_ratio,
            unhealthy,
            unhealthy_until,
            threshold: self.failure_threshold,
            window_seconds: self.window.as_secs(),
        })
    }

    /// 清空计数器与粘滞标记（测试或人工干预用）
    pub async fn reset(&self, provider_id: &str) -> GatewayResult<()> {
        self.kv
            .del(&[
                success_key(provider_id).as_str(),
                failure_key(provider_id).as_str(),
                unhealthy_key(provider_id).as_str(),
            ])
            .await?;
        info!("服务商 {} 的健康指标已重置", provider_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_infrastructure::InMemoryKvStore;
    use tokio::time::sleep;

    fn tracker() -> HealthTracker {
        HealthTracker::new(
            Arc::new(InMemoryKvStore::new()),
            Duration::from_secs(300),
            0.7,
            10,
        )
    }

    #[tokio::test]
    async fn test_healthy_by_default() {
        let tracker = tracker();
        assert!(tracker.is_healthy("provider1").await.unwrap());

        let status = tracker.status("provider1").await.unwrap();
        assert_eq!(status.success, 0);
        assert_eq!(status.failure, 0);
        assert_eq!(status.failure_ratio, 0.0);
        assert!(!status.unhealthy);
        assert!(status.unhealthy_until.is_none());
    }

    #[tokio::test]
    async fn test_below_sample_floor_stays_healthy() {
        let tracker = tracker();
        // 9个失败样本：失败率100%但样本不足，不触发标记
        for _ in 0..9 {
            tracker.record_failure("provider1").await.unwrap();
        }
        assert!(tracker.is_healthy("provider1").await.unwrap());
    }

    #[tokio::test]
    async fn test_threshold_with_floor_marks_unhealthy() {
        let tracker = tracker();
        for _ in 0..3 {
            tracker.record_success("provider1").await.unwrap();
        }
        // 7失败/10样本 = 0.7，达到阈值
        for _ in 0..7 {
            tracker.record_failure("provider1").await.unwrap();
        }

        assert!(!tracker.is_healthy("provider1").await.unwrap());

        let status = tracker.status("provider1").await.unwrap();
        assert!(status.unhealthy);
        assert!(status.unhealthy_until.is_some());
        assert_eq!(status.success, 3);
        assert_eq!(status.failure, 7);
        assert!((status.failure_ratio - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_ratio_below_threshold_stays_healthy() {
        let tracker = tracker();
        for _ in 0..5 {
            tracker.record_success("provider1").await.unwrap();
        }
        for _ in 0..6 {
            tracker.record_failure("provider1").await.unwrap();
        }
        // 6/11 ≈ 0.55 < 0.7
        assert!(tracker.is_healthy("provider1").await.unwrap());
    }

    #[tokio::test]
    async fn test_providers_are_independent() {
        let tracker = tracker();
        for _ in 0..10 {
            tracker.record_failure("provider1").await.unwrap();
        }
        assert!(!tracker.is_healthy("provider1").await.unwrap());
        assert!(tracker.is_healthy("provider2").await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let tracker = tracker();
        for _ in 0..10 {
            tracker.record_failure("provider1").await.unwrap();
        }
        assert!(!tracker.is_healthy("provider1").await.unwrap());

        tracker.reset("provider1").await.unwrap();

        assert!(tracker.is_healthy("provider1").await.unwrap());
        let status = tracker.status("provider1").await.unwrap();
        assert_eq!(status.success, 0);
        assert_eq!(status.failure, 0);
        assert!(!status.unhealthy);
    }

    #[tokio::test]
    async fn test_sticky_flag_expires_by_ttl() {
        let tracker = HealthTracker::new(
            Arc::new(InMemoryKvStore::new()),
            Duration::from_secs(300),
            0.7,
            10,
        )
        .with_sticky_duration(Duration::from_millis(50));

        for _ in 0..10 {
            tracker.record_failure("provider1").await.unwrap();
        }
        assert!(!tracker.is_healthy("provider1").await.unwrap());

        sleep(Duration::from_millis(80)).await;

        // 粘滞期过后自动恢复
        assert!(tracker.is_healthy("provider1").await.unwrap());
    }

    #[tokio::test]
    async fn test_sticky_flag_survives_quiet_period() {
        let tracker = HealthTracker::new(
            Arc::new(InMemoryKvStore::new()),
            // 计数器窗口很短，粘滞期更长
            Duration::from_millis(40),
            0.7,
            10,
        )
        .with_sticky_duration(Duration::from_secs(60));

        for _ in 0..10 {
            tracker.record_failure("provider1").await.unwrap();
        }
        sleep(Duration::from_millis(70)).await;

        // 计数器已过期归零，但粘滞标记仍然隔离该服务商
        let status = tracker.status("provider1").await.unwrap();
        assert_eq!(status.failure, 0);
        assert!(status.unhealthy);
        assert!(!tracker.is_healthy("provider1").await.unwrap());
    }
}
