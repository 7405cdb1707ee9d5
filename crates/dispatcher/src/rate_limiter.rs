//! 固定窗口限流器
//!
//! 键形如 `rate_limit:<scope>`，不带时间戳：键必须在整个窗口内存活，
//! 让并发准入累积在同一个计数器上。每次调用为键加一，首次加一时设置
//! 窗口TTL；超限时回滚加一并返回 `RateLimited`，被拒绝的调用不留下
//! 虚假的准入计数。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use gateway_domain::{parse_count, KvStore};
use gateway_errors::GatewayResult;

pub const GLOBAL_SCOPE: &str = "global";

/// 准入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { count: i64 },
    RateLimited { count: i64, limit: i64 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// 单个scope的限流读视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub scope: String,
    pub count: i64,
    pub limit: i64,
    pub remaining: i64,
    pub window_seconds: u64,
}

fn rate_limit_key(scope: &str) -> String {
    format!("rate_limit:{scope}")
}

async fn admit_scope(
    kv: &dyn KvStore,
    scope: &str,
    limit: i64,
    window: Duration,
) -> GatewayResult<Admission> {
    let key = rate_limit_key(scope);
    let count = kv.incr(&key).await?;

    // 窗口内的首次准入负责设置TTL
    if count == 1 {
        kv.expire(&key, window).await?;
    }

    if count > limit {
        // 回滚本次加一，计数器只反映已提交的准入
        let committed = kv.incr_by(&key, -1).await?;
        debug!(
            "scope {} 超过限流上限: {}/{}, 已回滚",
            scope, count, limit
        );
        return Ok(Admission::RateLimited {
            count: committed,
            limit,
        });
    }

    Ok(Admission::Admitted { count })
}

async fn current_scope(
    kv: &dyn KvStore,
    scope: &str,
    limit: i64,
    window: Duration,
) -> GatewayResult<RateLimitStatus> {
    let value = kv.get(&rate_limit_key(scope)).await?;
    let count = parse_count(value.as_deref());
    Ok(RateLimitStatus {
        scope: scope.to_string(),
        count,
        limit,
        remaining: (limit - count).max(0),
        window_seconds: window.as_secs(),
    })
}

/// 服务商限流器
///
/// 默认上限适用于所有服务商，单个服务商可通过 `with_limits` 覆盖。
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    default_limit: i64,
    limits: HashMap<String, i64>,
    window: Duration,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, default_limit: i64, window: Duration) -> Self {
        Self {
            kv,
            default_limit,
            limits: HashMap::new(),
            window,
        }
    }

    /// 设置按服务商的上限覆盖
    pub fn with_limits(mut self, limits: HashMap<String, i64>) -> Self {
        self.limits = limits;
        self
    }

    fn limit_for(&self, provider_id: &str) -> i64 {
        self.limits
            .get(provider_id)
            .copied()
            .unwrap_or(self.default_limit)
    }

    /// 尝试为指定服务商准入一次调用，副作用是计数器加一
    pub async fn admit(&self, provider_id: &str) -> GatewayResult<Admission> {
        admit_scope(
            self.kv.as_ref(),
            provider_id,
            self.limit_for(provider_id),
            self.window,
        )
        .await
    }

    /// 只读视图，不产生准入
    pub async fn current(&self, provider_id: &str) -> GatewayResult<RateLimitStatus> {
        current_scope(
            self.kv.as_ref(),
            provider_id,
            self.limit_for(provider_id),
            self.window,
        )
        .await
    }

    pub async fn stats(
        &self,
        provider_ids: &[String],
    ) -> GatewayResult<HashMap<String, RateLimitStatus>> {
        let mut stats = HashMap::new();
        for provider_id in provider_ids {
            stats.insert(provider_id.clone(), self.current(provider_id).await?);
        }
        Ok(stats)
    }

    pub async fn reset(&self, provider_id: &str) -> GatewayResult<()> {
        self.kv.del(&[rate_limit_key(provider_id).as_str()]).await?;
        Ok(())
    }
}

/// 全局限流器
pub struct GlobalRateLimiter {
    kv: Arc<dyn KvStore>,
    limit: i64,
    window: Duration,
}

impl GlobalRateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, limit: i64, window: Duration) -> Self {
        Self { kv, limit, window }
    }

    pub async fn admit(&self) -> GatewayResult<Admission> {
        admit_scope(self.kv.as_ref(), GLOBAL_SCOPE, self.limit, self.window).await
    }

    pub async fn current(&self) -> GatewayResult<RateLimitStatus> {
        current_scope(self.kv.as_ref(), GLOBAL_SCOPE, self.limit, self.window).await
    }

    pub async fn reset(&self) -> GatewayResult<()> {
        self.kv.del(&[rate_limit_key(GLOBAL_SCOPE).as_str()]).await?;
        Ok(())
    }
}
