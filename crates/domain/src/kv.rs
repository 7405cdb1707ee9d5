//! KV存储能力抽象
//!
//! 流水线依赖的最小原语集合：原子计数、带TTL的键、有序集合与列表。
//! 生产绑定是网络客户端，测试绑定是内存实现，两者共用同一trait。

use std::time::Duration;

use async_trait::async_trait;
use gateway_errors::GatewayResult;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// 原子加一，返回自增后的值
    async fn incr(&self, key: &str) -> GatewayResult<i64>;

    /// 原子加上任意增量（可为负），返回更新后的值
    async fn incr_by(&self, key: &str, delta: i64) -> GatewayResult<i64>;

    /// 设置键的TTL，键不存在时返回false
    async fn expire(&self, key: &str, ttl: Duration) -> GatewayResult<bool>;

    /// 查询键的剩余TTL，键不存在或无TTL时返回None
    async fn ttl(&self, key: &str) -> GatewayResult<Option<Duration>>;

    async fn get(&self, key: &str) -> GatewayResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> GatewayResult<()>;

    /// 删除一组键，返回实际删除数量
    async fn del(&self, keys: &[&str]) -> GatewayResult<u64>;

    /// 向有序集合写入成员，分值为毫秒级时间戳或计数
    async fn zadd(&self, key: &str, score: i64, member: &str) -> GatewayResult<()>;

    /// 按分值区间取成员（升序），最多返回limit个
    async fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
        limit: usize,
    ) -> GatewayResult<Vec<String>>;

    /// 移除有序集合成员，成员存在并被移除时返回true
    async fn zrem(&self, key: &str, member: &str) -> GatewayResult<bool>;

    async fn lpush(&self, key: &str, value: &str) -> GatewayResult<u64>;

    async fn rpop(&self, key: &str) -> GatewayResult<Option<String>>;

    async fn llen(&self, key: &str) -> GatewayResult<u64>;
}

/// 将KV返回的字符串值解析为计数。
///
/// 值缺失或无法解析时返回0。调用方负责先把原始字节解码为字符串，
/// 这里不做任何隐式的字节到整数转换。
pub fn parse_count(value: Option<&str>) -> i64 {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0)
}
