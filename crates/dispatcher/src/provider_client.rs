//! 出站HTTP服务商客户端

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use gateway_domain::{Provider, ProviderClient, ProviderResponse};

#[derive(Debug, Serialize)]
struct SmsPayload<'a> {
    phone: &'a str,
    text: &'a str,
}

/// 基于reqwest的服务商客户端，每次调用带独立的超时
pub struct HttpProviderClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProviderClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn send_sms(&self, provider: &Provider, phone: &str, text: &str) -> ProviderResponse {
        let payload = SmsPayload { phone, text };

        let result = self
            .client
            .post(&provider.url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                debug!("服务商 {} 返回 HTTP {}", provider.id, status);
                ProviderResponse::from_http(status, body)
            }
            Err(e) if e.is_timeout() => {
                debug!("服务商 {} 调用超时: {}", provider.id, e);
                ProviderResponse::timeout(format!("请求超时: {e}"))
            }
            Err(e) => {
                debug!("服务商 {} 连接失败: {}", provider.id, e);
                ProviderResponse::network_error(format!("连接失败: {e}"))
            }
        }
    }
}
