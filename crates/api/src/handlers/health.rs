use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Serialize;

use gateway_dispatcher::ProviderHealthStatus;

use crate::error::{ApiError, ApiResult};
use crate::response::{self, ApiResponse};
use crate::routes::AppState;

#[derive(Debug, Serialize)]
pub struct HealthSummary {
    pub total_providers: usize,
    pub healthy_providers: usize,
    pub unhealthy_providers: usize,
    /// 只要有一个服务商健康，系统即可投递
    pub system_healthy: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthView {
    pub providers: HashMap<String, ProviderHealthStatus>,
    pub summary: HealthSummary,
}

pub async fn get_all_health(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let mut providers = HashMap::new();
    for provider_id in state.provider_ids() {
        providers.insert(
            provider_id.clone(),
            state.health_tracker.status(&provider_id).await?,
        );
    }

    let healthy = providers.values().filter(|s| !s.unhealthy).count();
    let total = providers.len();
    let summary = HealthSummary {
        total_providers: total,
        healthy_providers: healthy,
        unhealthy_providers: total - healthy,
        system_healthy: healthy > 0,
    };

    Ok(response::success(HealthView { providers, summary }))
}

pub async fn get_provider_health(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if !state.knows_provider(&provider_id) {
        return Err(ApiError::NotFound);
    }
    let status = state.health_tracker.status(&provider_id).await?;
    Ok(response::success(status))
}

pub async fn reset_provider_health(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if !state.knows_provider(&provider_id) {
        return Err(ApiError::NotFound);
    }
    state.health_tracker.reset(&provider_id).await?;
    Ok(ApiResponse::success_empty_with_message(format!(
        "Health metrics reset for {provider_id}"
    )))
}
