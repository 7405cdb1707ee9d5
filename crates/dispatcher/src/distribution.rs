//! 服务商选择引擎
//!
//! 在未被排除且健康的候选中执行平滑加权轮询（smooth WRR）：
//! 每轮为每个候选的亏空计数器加上其权重，取亏空最高者（并列按id字典序），
//! 再从胜者扣除本轮总权重。亏空状态存放在KV中，多个实例共享。
//!
//! 限流准入是最后一步：只对胜者执行 `admit`，被限流的胜者退出候选并
//! 重新选择，落选者不会留下任何准入计数。

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use gateway_domain::{parse_count, KvStore, Provider};
use gateway_errors::GatewayResult;

use crate::health_tracker::HealthTracker;
use crate::rate_limiter::RateLimiter;

fn deficit_key(provider_id: &str) -> String {
    format!("distribution:deficit:{provider_id}")
}

fn selected_key(provider_id: &str) -> String {
    format!("distribution:selected:{provider_id}")
}

/// 选择结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Selected(Provider),
    NoProviderAvailable,
}

/// 分发统计视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionStats {
    pub selections: HashMap<String, i64>,
    pub deficits: HashMap<String, i64>,
}

pub struct DistributionEngine {
    kv: Arc<dyn KvStore>,
    providers: Vec<Provider>,
    health_tracker: Arc<HealthTracker>,
    rate_limiter: Arc<RateLimiter>,
}

impl DistributionEngine {
    pub fn new(
        kv: Arc<dyn KvStore>,
        providers: Vec<Provider>,
        health_tracker: Arc<HealthTracker>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            kv,
            providers,
            health_tracker,
            rate_limiter,
        }
    }

    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id.clone()).collect()
    }

    /// 为一次调度挑选服务商
    pub async fn select(&self, excluded: &[String]) -> GatewayResult<Selection> {
        let mut candidates = Vec::new();
        for provider in &self.providers {
            if excluded.iter().any(|id| id == &provider.id) {
                debug!("服务商 {} 在排除集合中, 跳过", provider.id);
                continue;
            }
            if !self.health_tracker.is_healthy(&provider.id).await? {
                debug!("服务商 {} 不健康, 跳过", provider.id);
                continue;
            }
            candidates.push(provider.clone());
        }
        candidates.sort_by(|a, b| a.id.cmp(&b.id));

        while !candidates.is_empty() {
            let winner = self.smooth_wrr_pick(&candidates).await?;

            if self.rate_limiter.admit(&winner.id).await?.is_admitted() {
                self.kv.incr(&selected_key(&winner.id)).await?;
                debug!("选中服务商 {} (权重 {})", winner.id, winner.weight);
                return Ok(Selection::Selected(winner));
            }

            debug!("服务商 {} 已被限流, 从候选中移除", winner.id);
            candidates.retain(|p| p.id != winner.id);
        }

        warn!("没有可用的服务商 (排除: {:?})", excluded);
        Ok(Selection::NoProviderAvailable)
    }

    /// 平滑加权轮询一轮：亏空加权重，取最大者并扣除总权重
    async fn smooth_wrr_pick(&self, candidates: &[Provider]) -> GatewayResult<Provider> {
        let total_weight: i64 = candidates.iter().map(|p| p.weight as i64).sum();

        let mut best: Option<(&Provider, i64)> = None;
        for provider in candidates {
            let deficit = self
                .kv
                .incr_by(&deficit_key(&provider.id), provider.weight as i64)
                .await?;
            let replace = match best {
                None => true,
                // 并列时取id字典序较小者
                Some((best_provider, best_deficit)) => {
                    deficit > best_deficit
                        || (deficit == best_deficit && provider.id < best_provider.id)
                }
            };
            if replace {
                best = Some((provider, deficit));
            }
        }

        let Some((winner, _)) = best else {
            return Err(gateway_errors::GatewayError::Internal(
                "smooth WRR 收到空候选集".to_string(),
            ));
        };
        self.kv
            .incr_by(&deficit_key(&winner.id), -total_weight)
            .await?;
        Ok(winner.clone())
    }

    pub async fn stats(&self) -> GatewayResult<DistributionStats> {
        let mut selections = HashMap::new();
        let mut deficits = HashMap::new();
        for provider in &self.providers {
            let selected = self.kv.get(&selected_key(&provider.id)).await?;
            selections.insert(provider.id.clone(), parse_count(selected.as_deref()));
            let deficit = self.kv.get(&deficit_key(&provider.id)).await?;
            deficits.insert(provider.id.clone(), parse_count(deficit.as_deref()));
        }
        Ok(DistributionStats {
            selections,
            deficits,
        })
    }

    pub async fn reset(&self) -> GatewayResult<()> {
        let keys: Vec<String> = self
            .providers
            .iter()
            .flat_map(|p| [deficit_key(&p.id), selected_key(&p.id)])
            .collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.kv.del(&key_refs).await?;
        info!("分发统计已重置");
        Ok(())
    }
}
