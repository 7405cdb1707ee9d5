use axum::{extract::State, response::IntoResponse};

use crate::error::ApiResult;
use crate::response::{self, ApiResponse};
use crate::routes::AppState;

pub async fn get_distribution_stats(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let stats = state.distribution.stats().await?;
    Ok(response::success(stats))
}

pub async fn reset_distribution_stats(
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    state.distribution.reset().await?;
    Ok(ApiResponse::success_empty_with_message(
        "Distribution statistics reset".to_string(),
    ))
}
