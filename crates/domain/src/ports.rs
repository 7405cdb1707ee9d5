//! 出站服务商端口
//!
//! 调度任务通过该端口执行真实的短信发送。生产绑定是HTTP客户端，
//! 测试绑定返回脚本化的结果。

use async_trait::async_trait;

use crate::entities::{AttemptStatus, Provider};

/// 响应体在落库前的截断长度
pub const RESPONSE_BODY_MAX_BYTES: usize = 512;

/// 一次出站调用的结果
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: AttemptStatus,
    pub http_status: Option<u16>,
    pub body: Option<String>,
    pub error_message: Option<String>,
}

impl ProviderResponse {
    /// 由HTTP状态码与响应体构造，自动分类并截断响应体
    pub fn from_http(http_status: u16, body: impl Into<String>) -> Self {
        let status = AttemptStatus::classify_http(http_status);
        let body = truncate_body(body.into());
        let error_message = match status {
            AttemptStatus::Ok => None,
            _ => Some(format!("HTTP {http_status}")),
        };
        Self {
            status,
            http_status: Some(http_status),
            body: Some(body),
            error_message,
        }
    }

    /// 出站调用超时
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            status: AttemptStatus::Timeout,
            http_status: None,
            body: None,
            error_message: Some(message.into()),
        }
    }

    /// 连接层错误，按瞬时失败处理
    pub fn network_error(message: impl Into<String>) -> Self {
        Self {
            status: AttemptStatus::ErrorTransient,
            http_status: None,
            body: None,
            error_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AttemptStatus::Ok
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > RESPONSE_BODY_MAX_BYTES {
        let mut cut = RESPONSE_BODY_MAX_BYTES;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// 对指定服务商执行一次发送调用，任何失败都折叠进返回值
    async fn send_sms(&self, provider: &Provider, phone: &str, text: &str) -> ProviderResponse;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_http_success() {
        let response = ProviderResponse::from_http(200, "{\"ok\":true}");
        assert!(response.is_success());
        assert_eq!(response.http_status, Some(200));
        assert!(response.error_message.is_none());
    }

    #[test]
    fn test_from_http_transient_and_permanent() {
        let transient = ProviderResponse::from_http(503, "busy");
        assert_eq!(transient.status, AttemptStatus::ErrorTransient);
        assert_eq!(transient.error_message.as_deref(), Some("HTTP 503"));

        let permanent = ProviderResponse::from_http(400, "bad number");
        assert_eq!(permanent.status, AttemptStatus::ErrorPermanent);
    }

    #[test]
    fn test_body_truncation() {
        let long_body = "x".repeat(RESPONSE_BODY_MAX_BYTES * 2);
        let response = ProviderResponse::from_http(200, long_body);
        assert_eq!(response.body.unwrap().len(), RESPONSE_BODY_MAX_BYTES);
    }

    #[test]
    fn test_timeout_and_network() {
        let timeout = ProviderResponse::timeout("deadline elapsed");
        assert_eq!(timeout.status, AttemptStatus::Timeout);
        assert!(timeout.http_status.is_none());

        let network = ProviderResponse::network_error("connection refused");
        assert_eq!(network.status, AttemptStatus::ErrorTransient);
    }
}
