//! 核心领域实体定义，包含短信请求、投递尝试、死信记录和服务商配置。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 短信请求
///
/// 表示一条已被网关接收、等待或已经完成投递的短信。
///
/// # 字段说明
///
/// - `id`: 请求的唯一标识符，入库时分配
/// - `phone`: 接收方号码
/// - `text`: 短信正文
/// - `status`: 请求状态（PENDING/IN_FLIGHT/SUCCEEDED/FAILED_PERMANENT）
/// - `attempts_count`: 已经发起的出站调用次数
/// - `last_provider_id`: 最近一次使用的服务商
/// - `excluded_providers`: 后续调度需要跳过的服务商集合
/// - `created_at` / `updated_at`: 创建与最后更新时间
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsRequest {
    pub id: i64,
    pub phone: String,
    pub text: String,
    pub status: RequestStatus,
    pub attempts_count: i32,
    pub last_provider_id: Option<String>,
    pub excluded_providers: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 请求状态
///
/// `Succeeded` 与 `FailedPermanent` 为终态，终态不可再变更。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "IN_FLIGHT")]
    InFlight,
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "FAILED_PERMANENT")]
    FailedPermanent,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Succeeded | RequestStatus::FailedPermanent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::InFlight => "IN_FLIGHT",
            RequestStatus::Succeeded => "SUCCEEDED",
            RequestStatus::FailedPermanent => "FAILED_PERMANENT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(RequestStatus::Pending),
            "IN_FLIGHT" => Some(RequestStatus::InFlight),
            "SUCCEEDED" => Some(RequestStatus::Succeeded),
            "FAILED_PERMANENT" => Some(RequestStatus::FailedPermanent),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for RequestStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for RequestStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        RequestStatus::parse(s).ok_or_else(|| format!("Invalid request status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for RequestStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

impl SmsRequest {
    /// 创建新的待调度请求
    pub fn new(phone: String, text: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            phone,
            text,
            status: RequestStatus::Pending,
            attempts_count: 0,
            last_provider_id: None,
            excluded_providers: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 排除集合的数据库存储形式（逗号拼接）
    pub fn excluded_providers_column(&self) -> String {
        self.excluded_providers.join(",")
    }

    /// 从数据库列还原排除集合
    pub fn parse_excluded_providers(column: &str) -> Vec<String> {
        column
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }
}

/// 投递尝试
///
/// 每次对某个服务商的一次出站调用产生一条记录。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub id: i64,
    pub request_id: i64,
    pub provider_id: String,
    pub status: AttemptStatus,
    pub http_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// 尝试结果分类
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AttemptStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR_TRANSIENT")]
    ErrorTransient,
    #[serde(rename = "ERROR_PERMANENT")]
    ErrorPermanent,
    #[serde(rename = "TIMEOUT")]
    Timeout,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Ok => "OK",
            AttemptStatus::ErrorTransient => "ERROR_TRANSIENT",
            AttemptStatus::ErrorPermanent => "ERROR_PERMANENT",
            AttemptStatus::Timeout => "TIMEOUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(AttemptStatus::Ok),
            "ERROR_TRANSIENT" => Some(AttemptStatus::ErrorTransient),
            "ERROR_PERMANENT" => Some(AttemptStatus::ErrorPermanent),
            "TIMEOUT" => Some(AttemptStatus::Timeout),
            _ => None,
        }
    }

    /// 根据服务商返回的HTTP状态码分类结果。
    ///
    /// 2xx 成功；408/425/429 与 5xx 视为瞬时错误；其余 4xx 视为永久拒绝；
    /// 未知状态码按瞬时处理。
    pub fn classify_http(status: u16) -> Self {
        match status {
            200..=299 => AttemptStatus::Ok,
            408 | 425 | 429 => AttemptStatus::ErrorTransient,
            400..=499 => AttemptStatus::ErrorPermanent,
            500..=599 => AttemptStatus::ErrorTransient,
            _ => AttemptStatus::ErrorTransient,
        }
    }

    /// 瞬时错误（含超时）会触发重试调度
    pub fn is_transient(&self) -> bool {
        matches!(self, AttemptStatus::ErrorTransient | AttemptStatus::Timeout)
    }
}

impl sqlx::Type<sqlx::Sqlite> for AttemptStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for AttemptStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        AttemptStatus::parse(s).ok_or_else(|| format!("Invalid attempt status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for AttemptStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 死信记录
///
/// 请求在尝试预算内未能投递成功时的终态存档。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: i64,
    pub request_id: i64,
    pub reason: DeadLetterReason,
    /// 写入死信时该请求全部尝试记录的JSON快照
    pub attempts_snapshot: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeadLetterReason {
    #[serde(rename = "MAX_ATTEMPTS_EXCEEDED")]
    MaxAttemptsExceeded,
    #[serde(rename = "NO_PROVIDER_AVAILABLE_PERSISTENT")]
    NoProviderAvailablePersistent,
    #[serde(rename = "PROVIDER_PERMANENT")]
    ProviderPermanent,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::MaxAttemptsExceeded => "MAX_ATTEMPTS_EXCEEDED",
            DeadLetterReason::NoProviderAvailablePersistent => "NO_PROVIDER_AVAILABLE_PERSISTENT",
            DeadLetterReason::ProviderPermanent => "PROVIDER_PERMANENT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MAX_ATTEMPTS_EXCEEDED" => Some(DeadLetterReason::MaxAttemptsExceeded),
            "NO_PROVIDER_AVAILABLE_PERSISTENT" => {
                Some(DeadLetterReason::NoProviderAvailablePersistent)
            }
            "PROVIDER_PERMANENT" => Some(DeadLetterReason::ProviderPermanent),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for DeadLetterReason {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for DeadLetterReason {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        DeadLetterReason::parse(s).ok_or_else(|| format!("Invalid dead letter reason: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for DeadLetterReason {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

impl DeadLetter {
    pub fn new(request_id: i64, reason: DeadLetterReason, attempts: &[Attempt]) -> Self {
        Self {
            id: 0, // 将由数据库生成
            request_id,
            reason,
            attempts_snapshot: serde_json::to_value(attempts)
                .unwrap_or(serde_json::Value::Array(Vec::new())),
            created_at: Utc::now(),
        }
    }
}

/// 服务商静态配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provider {
    pub id: String,
    pub url: String,
    pub weight: u32,
    pub per_second_limit: u32,
}

impl Provider {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            weight: 1,
            per_second_limit: 50,
        }
    }
}

/// 请求查询过滤器
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub provider: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}
