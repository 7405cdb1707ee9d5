//! 内存KV存储实现
//!
//! 与Redis绑定共用同一trait，用于测试和嵌入式运行。
//! 字符串键支持真实的TTL过期；有序集合与列表不设TTL。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use gateway_domain::KvStore;
use gateway_errors::{GatewayError, GatewayResult};

#[derive(Debug, Clone)]
struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[derive(Debug, Default)]
struct State {
    strings: HashMap<String, StringEntry>,
    zsets: HashMap<String, BTreeMap<String, i64>>,
    lists: HashMap<String, VecDeque<String>>,
}

#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    state: Mutex<State>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> GatewayResult<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| GatewayError::Internal(format!("KV锁被毒化: {e}")))
    }
}

fn purge_expired(state: &mut State, key: &str) {
    if state
        .strings
        .get(key)
        .is_some_and(StringEntry::is_expired)
    {
        state.strings.remove(key);
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn incr(&self, key: &str) -> GatewayResult<i64> {
        self.incr_by(key, 1).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> GatewayResult<i64> {
        let mut state = self.lock()?;
        purge_expired(&mut state, key);
        let entry = state.strings.entry(key.to_string()).or_insert(StringEntry {
            value: "0".to_string(),
            expires_at: None,
        });
        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| GatewayError::kv_error(format!("键 {key} 的值不是整数")))?;
        let updated = current + delta;
        entry.value = updated.to_string();
        Ok(updated)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> GatewayResult<bool> {
        let mut state = self.lock()?;
        purge_expired(&mut state, key);
        match state.strings.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> GatewayResult<Option<Duration>> {
        let mut state = self.lock()?;
        purge_expired(&mut state, key);
        Ok(state
            .strings
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|deadline| deadline.saturating_duration_since(Instant::now())))
    }

    async fn get(&self, key: &str) -> GatewayResult<Option<String>> {
        let mut state = self.lock()?;
        purge_expired(&mut state, key);
        Ok(state.strings.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> GatewayResult<()> {
        let mut state = self.lock()?;
        state.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[&str]) -> GatewayResult<u64> {
        let mut state = self.lock()?;
        let mut removed = 0;
        for key in keys {
            purge_expired(&mut state, key);
            if state.strings.remove(*key).is_some() {
                removed += 1;
            }
            if state.zsets.remove(*key).is_some() {
                removed += 1;
            }
            if state.lists.remove(*key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> GatewayResult<()> {
        let mut state = self.lock()?;
        state
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
        limit: usize,
    ) -> GatewayResult<Vec<String>> {
        let state = self.lock()?;
        let Some(zset) = state.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let mut members: Vec<(&String, i64)> = zset
            .iter()
            .filter(|(_, score)| (min..=max).contains(*score))
            .map(|(member, score)| (member, *score))
            .collect();
        members.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        Ok(members
            .into_iter()
            .take(limit)
            .map(|(member, _)| member.clone())
            .collect())
    }

    async fn zrem(&self, key: &str, member: &str) -> GatewayResult<bool> {
        let mut state = self.lock()?;
        Ok(state
            .zsets
            .get_mut(key)
            .is_some_and(|zset| zset.remove(member).is_some()))
    }

    async fn lpush(&self, key: &str, value: &str) -> GatewayResult<u64> {
        let mut state = self.lock()?;
        let list = state.lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        Ok(list.len() as u64)
    }

    async fn rpop(&self, key: &str) -> GatewayResult<Option<String>> {
        let mut state = self.lock()?;
        Ok(state.lists.get_mut(key).and_then(VecDeque::pop_back))
    }

    async fn llen(&self, key: &str) -> GatewayResult<u64> {
        let state = self.lock()?;
        Ok(state.lists.get(key).map_or(0, |list| list.len() as u64))
    }
}
