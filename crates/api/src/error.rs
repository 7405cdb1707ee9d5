use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gateway_errors::GatewayError;
use serde_json::json;

/// API错误类型
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("网关错误: {0}")]
    Gateway(#[from] GatewayError),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("全局限流: {count}/{limit}")]
    RateLimited { count: i64, limit: i64 },

    #[error("未找到资源")]
    NotFound,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::RateLimited { count, limit } = &self {
            let body = Json(json!({
                "error": {
                    "message": "Global rate limit exceeded",
                    "code": StatusCode::TOO_MANY_REQUESTS.as_u16(),
                    "current_count": count,
                    "limit": limit,
                    "reset_in_seconds": 1
                }
            }));
            return (StatusCode::TOO_MANY_REQUESTS, body).into_response();
        }

        let (status, error_message) = match &self {
            ApiError::Gateway(GatewayError::RequestNotFound { .. }) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Gateway(GatewayError::ProviderNotFound { .. }) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Gateway(GatewayError::ValidationError(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "资源未找到".to_string()),
            ApiError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            ApiError::Gateway(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "内部服务器错误".to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "code": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}

/// API结果类型
pub type ApiResult<T> = Result<T, ApiError>;
