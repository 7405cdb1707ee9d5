//! 网关配置
//!
//! 配置来源：TOML文件（可选）叠加 `GATEWAY_*` 环境变量。
//! 所有选项都有默认值，缺省时直接可运行于本地三个mock服务商。

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use gateway_domain::Provider;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            database: DatabaseConfig::default(),
            providers: default_providers(),
            rate_limit: RateLimitConfig::default(),
            health: HealthConfig::default(),
            retry: RetryConfig::default(),
            dispatch: DispatchConfig::default(),
            api: ApiConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://sms_gateway.db".to_string(),
            max_connections: 10,
            connection_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_provider_rate_limit")]
    pub per_second_limit: u32,
}

fn default_weight() -> u32 {
    1
}

fn default_provider_rate_limit() -> u32 {
    50
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            id: "provider1".to_string(),
            url: "http://localhost:8071/api/sms/provider1".to_string(),
            weight: 1,
            per_second_limit: 50,
        },
        ProviderConfig {
            id: "provider2".to_string(),
            url: "http://localhost:8072/api/sms/provider2".to_string(),
            weight: 1,
            per_second_limit: 50,
        },
        ProviderConfig {
            id: "provider3".to_string(),
            url: "http://localhost:8073/api/sms/provider3".to_string(),
            weight: 1,
            per_second_limit: 50,
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// 单个服务商每秒准入上限
    pub provider_rate_limit: i64,
    /// 全局每秒准入上限
    pub total_rate_limit: i64,
    /// 固定窗口长度（秒）
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            provider_rate_limit: 50,
            total_rate_limit: 200,
            window_seconds: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// 健康统计窗口（秒），同时是粘滞不健康标记的TTL
    pub window_seconds: u64,
    /// 失败率阈值
    pub failure_threshold: f64,
    /// 判定不健康所需的最小样本数
    pub min_samples: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_seconds: 300,
            failure_threshold: 0.7,
            min_samples: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 单个请求的尝试上限（含首次）
    pub max_attempts: i32,
    /// 指数退避基数（毫秒）
    pub base_delay_ms: u64,
    /// 退避上限（毫秒）
    pub max_delay_ms: u64,
    /// 抖动范围（±比例）
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter_factor: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// 出站调用超时（秒）
    pub timeout_seconds: u64,
    /// 出队后的可见性超时（秒），超时未ack的任务会被回收
    pub visibility_timeout_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 5,
            visibility_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// 单进程并发在途调度数
    pub concurrency: usize,
    /// 队列空转时的轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 重试晋升与在途回收的执行间隔（毫秒）
    pub promoter_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: 16,
            poll_interval_ms: 100,
            promoter_interval_ms: 200,
        }
    }
}

impl AppConfig {
    /// 加载配置。给定路径必须存在；未给定时按默认路径探测，
    /// 均不存在时使用内置默认值。环境变量 `GATEWAY_*` 始终最后叠加。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/gateway.toml", "gateway.toml", "/etc/sms-gateway/config.toml"];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("GATEWAY")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(anyhow::anyhow!("至少需要配置一个服务商"));
        }
        for provider in &self.providers {
            if provider.id.is_empty() || provider.url.is_empty() {
                return Err(anyhow::anyhow!("服务商配置缺少id或url"));
            }
            if provider.weight == 0 {
                return Err(anyhow::anyhow!("服务商 {} 的权重必须为正", provider.id));
            }
        }
        if self.rate_limit.provider_rate_limit <= 0 || self.rate_limit.total_rate_limit <= 0 {
            return Err(anyhow::anyhow!("限流上限必须为正"));
        }
        if self.rate_limit.window_seconds == 0 {
            return Err(anyhow::anyhow!("限流窗口必须为正"));
        }
        if !(0.0..=1.0).contains(&self.health.failure_threshold) {
            return Err(anyhow::anyhow!("健康失败率阈值必须在 0.0 到 1.0 之间"));
        }
        if self.retry.max_attempts < 1 {
            return Err(anyhow::anyhow!("max_attempts 必须至少为 1"));
        }
        if !(0.0..1.0).contains(&self.retry.jitter_factor) {
            return Err(anyhow::anyhow!("抖动比例必须在 [0, 1) 区间内"));
        }
        if self.worker.concurrency == 0 {
            return Err(anyhow::anyhow!("worker并发数必须为正"));
        }
        Ok(())
    }

    /// 静态服务商表
    pub fn providers(&self) -> Vec<Provider> {
        self.providers
            .iter()
            .map(|p| Provider {
                id: p.id.clone(),
                url: p.url.clone(),
                weight: p.weight,
                per_second_limit: p.per_second_limit,
            })
            .collect()
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_seconds)
    }

    pub fn health_window(&self) -> Duration {
        Duration::from_secs(self.health.window_seconds)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.timeout_seconds)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.visibility_timeout_seconds)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry.base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry.max_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.rate_limit.provider_rate_limit, 50);
        assert_eq!(config.rate_limit.total_rate_limit, 200);
        assert_eq!(config.rate_limit.window_seconds, 1);
        assert_eq!(config.health.window_seconds, 300);
        assert_eq!(config.health.failure_threshold, 0.7);
        assert_eq!(config.health.min_samples, 10);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.retry.max_delay_ms, 60_000);
        assert_eq!(config.dispatch.timeout_seconds, 5);
        assert_eq!(config.worker.concurrency, 16);
    }

    #[test]
    fn test_default_serde_providers() {
        // serde默认只在反序列化时生效，空文档应产出三个服务商
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.providers.len(), 3);
        assert_eq!(config.providers[0].id, "provider1");
        assert_eq!(config.providers[0].weight, 1);
        assert_eq!(config.providers[0].per_second_limit, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let toml_str = r#"
[redis]
url = "redis://cache:6379"

[database]
url = "sqlite://gateway_test.db"
max_connections = 5
connection_timeout_seconds = 10

[[providers]]
id = "provider1"
url = "http://sms1.internal/send"
weight = 2

[[providers]]
id = "provider2"
url = "http://sms2.internal/send"

[rate_limit]
provider_rate_limit = 25
total_rate_limit = 100
window_seconds = 1

[retry]
max_attempts = 3
base_delay_ms = 500
max_delay_ms = 10000
jitter_factor = 0.1
"#;
        let config = AppConfig::from_toml(toml_str).expect("parse toml");
        assert_eq!(config.redis.url, "redis://cache:6379");
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].weight, 2);
        assert_eq!(config.providers[1].weight, 1);
        assert_eq!(config.rate_limit.provider_rate_limit, 25);
        assert_eq!(config.retry.max_attempts, 3);

        let providers = config.providers();
        assert_eq!(providers[0].id, "provider1");
        assert_eq!(providers[0].weight, 2);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();

        config.rate_limit.provider_rate_limit = 0;
        assert!(config.validate().is_err());
        config.rate_limit.provider_rate_limit = 50;

        config.health.failure_threshold = 1.5;
        assert!(config.validate().is_err());
        config.health.failure_threshold = 0.7;

        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
        config.retry.max_attempts = 5;

        config.providers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_weight_rejected() {
        let toml_str = r#"
[[providers]]
id = "provider1"
url = "http://sms1.internal/send"
weight = 0
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }
}
