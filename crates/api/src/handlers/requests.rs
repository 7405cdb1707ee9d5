use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gateway_domain::{
    Attempt, AttemptRepository, DeadLetter, DeadLetterRepository, RequestFilter, RequestStatus,
    SmsRequest, SmsRequestRepository,
};

use crate::error::{ApiError, ApiResult};
use crate::response;
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct ListRequestsQuery {
    pub status: Option<String>,
    pub provider: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub limit: Option<i64>,
}

fn parse_time(value: &str, field: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            ApiError::Validation(format!(
                "{field} 不是合法的RFC 3339时间 (例如 2025-01-01T00:00:00Z)"
            ))
        })
}

impl ListRequestsQuery {
    fn into_filter(self) -> Result<RequestFilter, ApiError> {
        let status = match self.status.as_deref() {
            Some(raw) => Some(
                RequestStatus::parse(raw)
                    .ok_or_else(|| ApiError::Validation(format!("未知的请求状态: {raw}")))?,
            ),
            None => None,
        };

        if let Some(limit) = self.limit {
            if !(1..=1000).contains(&limit) {
                return Err(ApiError::Validation(
                    "limit 必须在 1 到 1000 之间".to_string(),
                ));
            }
        }

        Ok(RequestFilter {
            status,
            provider: self.provider,
            start_time: self
                .start_time
                .as_deref()
                .map(|t| parse_time(t, "start_time"))
                .transpose()?,
            end_time: self
                .end_time
                .as_deref()
                .map(|t| parse_time(t, "end_time"))
                .transpose()?,
            limit: self.limit,
        })
    }
}

pub async fn list_requests(
    State(state): State<AppState>,
    Query(query): Query<ListRequestsQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = query.into_filter()?;
    let requests = state.requests.list(&filter).await?;
    Ok(response::success(requests))
}

#[derive(Debug, Serialize)]
pub struct RequestDetail {
    #[serde(flatten)]
    pub request: SmsRequest,
    pub attempts: Vec<Attempt>,
    pub dead_letter: Option<DeadLetter>,
}

pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let Some(request) = state.requests.get_by_id(id).await? else {
        return Err(ApiError::NotFound);
    };
    let attempts = state.attempts.get_by_request_id(id).await?;
    let dead_letter = state.dead_letters.get_by_request_id(id).await?;

    Ok(response::success(RequestDetail {
        request,
        attempts,
        dead_letter,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DeadLettersQuery {
    pub limit: Option<i64>,
}

/// 死信检视视图
pub async fn get_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<DeadLettersQuery>,
) -> ApiResult<impl IntoResponse> {
    let dead_letters = state.dead_letters.list(query.limit.unwrap_or(100)).await?;
    Ok(response::success(dead_letters))
}

pub async fn get_stats(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let stats = state.requests.stats().await?;
    Ok(response::success(stats))
}
