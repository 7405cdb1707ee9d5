use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("短信请求未找到: {id}")]
    RequestNotFound { id: i64 },
    #[error("短信服务商未找到: {id}")]
    ProviderNotFound { id: String },
    #[error("KV存储错误: {0}")]
    KvStore(String),
    #[error("任务队列错误: {0}")]
    Queue(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("网络错误: {0}")]
    Network(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn request_not_found(id: i64) -> Self {
        Self::RequestNotFound { id }
    }
    pub fn provider_not_found<S: Into<String>>(id: S) -> Self {
        Self::ProviderNotFound { id: id.into() }
    }
    pub fn kv_error<S: Into<String>>(msg: S) -> Self {
        Self::KvStore(msg.into())
    }
    pub fn queue_error<S: Into<String>>(msg: S) -> Self {
        Self::Queue(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }

    /// 判断错误是否可以通过队列重投递恢复
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Database(_)
                | GatewayError::DatabaseOperation(_)
                | GatewayError::KvStore(_)
                | GatewayError::Queue(_)
                | GatewayError::Network(_)
                | GatewayError::Timeout(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::Internal(_) | GatewayError::Configuration(_)
        )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        GatewayError::Internal(err.to_string())
    }
}
