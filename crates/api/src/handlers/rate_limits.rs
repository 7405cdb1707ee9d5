use std::collections::HashMap;

use axum::{extract::State, response::IntoResponse};
use serde::Serialize;

use gateway_dispatcher::RateLimitStatus;

use crate::error::ApiResult;
use crate::response;
use crate::routes::AppState;

#[derive(Debug, Serialize)]
pub struct RateLimitsView {
    pub providers: HashMap<String, RateLimitStatus>,
    pub global: RateLimitStatus,
}

/// 限流只读视图，不产生准入
pub async fn get_rate_limits(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let providers = state.rate_limiter.stats(&state.provider_ids()).await?;
    let global = state.global_rate_limiter.current().await?;
    Ok(response::success(RateLimitsView { providers, global }))
}
