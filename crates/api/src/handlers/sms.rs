use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use gateway_dispatcher::IntakeOutcome;

use crate::error::{ApiError, ApiResult};
use crate::response;
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct SendSmsRequest {
    pub phone: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SendSmsResponse {
    pub request_id: i64,
    pub queued: bool,
    pub message: String,
}

fn validate(payload: &SendSmsRequest) -> Result<(), ApiError> {
    let phone_len = payload.phone.chars().count();
    if !(10..=15).contains(&phone_len) {
        return Err(ApiError::Validation(
            "手机号长度必须在10到15个字符之间".to_string(),
        ));
    }
    let text_len = payload.text.chars().count();
    if !(1..=160).contains(&text_len) {
        return Err(ApiError::Validation(
            "短信正文长度必须在1到160个字符之间".to_string(),
        ));
    }
    Ok(())
}

/// 接入端点：全局限流 → 落库 → 入队
pub async fn send_sms(
    State(state): State<AppState>,
    Json(payload): Json<SendSmsRequest>,
) -> ApiResult<impl IntoResponse> {
    validate(&payload)?;

    match state.intake.queue_sms(&payload.phone, &payload.text).await? {
        IntakeOutcome::Queued { request_id } => {
            info!("短信请求 {} 已接受", request_id);
            Ok(response::success(SendSmsResponse {
                request_id,
                queued: true,
                message: "SMS queued for sending".to_string(),
            }))
        }
        IntakeOutcome::GlobalRateLimited { count, limit } => {
            Err(ApiError::RateLimited { count, limit })
        }
    }
}
