//! Redis绑定的KV存储
//!
//! 负责管理到Redis服务器的连接，包括连接建立、重试机制和错误处理。

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use gateway_domain::KvStore;
use gateway_errors::{GatewayError, GatewayResult};

const MAX_CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct RedisKvStore {
    connection: MultiplexedConnection,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> GatewayResult<Self> {
        let client = Client::open(url)
            .map_err(|e| GatewayError::KvStore(format!("Failed to create Redis client: {e}")))?;

        let connection = Self::connect_with_retry(&client).await?;

        let store = Self { connection };
        store.ping().await?;
        debug!("Successfully connected to Redis at {}", url);

        Ok(store)
    }

    async fn connect_with_retry(client: &Client) -> GatewayResult<MultiplexedConnection> {
        let mut last_error = None;

        for attempt in 0..MAX_CONNECT_ATTEMPTS {
            match client.get_multiplexed_async_connection().await {
                Ok(conn) => {
                    if attempt > 0 {
                        debug!("Connected to Redis after {} attempts", attempt + 1);
                    }
                    return Ok(conn);
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < MAX_CONNECT_ATTEMPTS - 1 {
                        warn!(
                            "Failed to connect to Redis (attempt {}/{}): {}. Retrying in {:?}...",
                            attempt + 1,
                            MAX_CONNECT_ATTEMPTS,
                            last_error.as_ref().unwrap(),
                            CONNECT_RETRY_DELAY
                        );
                        sleep(CONNECT_RETRY_DELAY).await;
                    }
                }
            }
        }

        let error_msg = format!(
            "Failed to connect to Redis after {} attempts. Last error: {}",
            MAX_CONNECT_ATTEMPTS,
            last_error.map_or("Unknown".to_string(), |e| e.to_string())
        );
        error!("{}", error_msg);
        Err(GatewayError::KvStore(error_msg))
    }

    async fn execute_command<T: redis::FromRedisValue>(
        &self,
        cmd: &redis::Cmd,
    ) -> GatewayResult<T> {
        let mut conn = self.connection.clone();
        cmd.query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::KvStore(format!("Redis command failed: {e}")))
    }

    pub async fn ping(&self) -> GatewayResult<()> {
        let response: String = self.execute_command(&redis::cmd("PING")).await?;
        if response == "PONG" {
            Ok(())
        } else {
            Err(GatewayError::KvStore(format!(
                "Unexpected PING response: {response}"
            )))
        }
    }

    pub async fn health_check(&self) -> bool {
        match self.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Redis health check failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn incr(&self, key: &str) -> GatewayResult<i64> {
        let mut cmd = redis::cmd("INCR");
        cmd.arg(key);
        self.execute_command(&cmd).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> GatewayResult<i64> {
        let mut cmd = redis::cmd("INCRBY");
        cmd.arg(key).arg(delta);
        self.execute_command(&cmd).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> GatewayResult<bool> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(ttl.as_secs().max(1));
        let set: i64 = self.execute_command(&cmd).await?;
        Ok(set == 1)
    }

    async fn ttl(&self, key: &str) -> GatewayResult<Option<Duration>> {
        let mut cmd = redis::cmd("TTL");
        cmd.arg(key);
        let seconds: i64 = self.execute_command(&cmd).await?;
        // -2: key missing, -1: no expiry
        if seconds > 0 {
            Ok(Some(Duration::from_secs(seconds as u64)))
        } else {
            Ok(None)
        }
    }

    async fn get(&self, key: &str) -> GatewayResult<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.execute_command(&cmd).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> GatewayResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let _: String = self.execute_command(&cmd).await?;
        Ok(())
    }

    async fn del(&self, keys: &[&str]) -> GatewayResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(*key);
        }
        let deleted: i64 = self.execute_command(&cmd).await?;
        Ok(deleted as u64)
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> GatewayResult<()> {
        let mut cmd = redis::cmd("ZADD");
        cmd.arg(key).arg(score).arg(member);
        let _: i64 = self.execute_command(&cmd).await?;
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
        limit: usize,
    ) -> GatewayResult<Vec<String>> {
        let mut cmd = redis::cmd("ZRANGEBYSCORE");
        cmd.arg(key)
            .arg(min)
            .arg(max)
            .arg("LIMIT")
            .arg(0)
            .arg(limit);
        self.execute_command(&cmd).await
    }

    async fn zrem(&self, key: &str, member: &str) -> GatewayResult<bool> {
        let mut cmd = redis::cmd("ZREM");
        cmd.arg(key).arg(member);
        let removed: i64 = self.execute_command(&cmd).await?;
        Ok(removed == 1)
    }

    async fn lpush(&self, key: &str, value: &str) -> GatewayResult<u64> {
        let mut cmd = redis::cmd("LPUSH");
        cmd.arg(key).arg(value);
        let len: i64 = self.execute_command(&cmd).await?;
        Ok(len as u64)
    }

    async fn rpop(&self, key: &str) -> GatewayResult<Option<String>> {
        let mut cmd = redis::cmd("RPOP");
        cmd.arg(key);
        self.execute_command(&cmd).await
    }

    async fn llen(&self, key: &str) -> GatewayResult<u64> {
        let mut cmd = redis::cmd("LLEN");
        cmd.arg(key);
        let len: i64 = self.execute_command(&cmd).await?;
        Ok(len as u64)
    }
}
