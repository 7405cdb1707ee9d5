use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use gateway_dispatcher::{
    DistributionEngine, GlobalRateLimiter, HealthTracker, IntakeService, RateLimiter,
};
use gateway_domain::{AttemptRepository, DeadLetterRepository, Provider, SmsRequestRepository};

use crate::handlers::{
    distribution::{get_distribution_stats, reset_distribution_stats},
    health::{get_all_health, get_provider_health, reset_provider_health},
    rate_limits::get_rate_limits,
    requests::{get_dead_letters, get_request, get_stats, list_requests},
    sms::send_sms,
    system::liveness,
};

#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<IntakeService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub global_rate_limiter: Arc<GlobalRateLimiter>,
    pub health_tracker: Arc<HealthTracker>,
    pub distribution: Arc<DistributionEngine>,
    pub requests: Arc<dyn SmsRequestRepository>,
    pub attempts: Arc<dyn AttemptRepository>,
    pub dead_letters: Arc<dyn DeadLetterRepository>,
    pub providers: Vec<Provider>,
}

impl AppState {
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id.clone()).collect()
    }

    pub fn knows_provider(&self, provider_id: &str) -> bool {
        self.providers.iter().any(|p| p.id == provider_id)
    }
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/api/sms/send", post(send_sms))
        .route("/api/rate-limits", get(get_rate_limits))
        .route("/api/health", get(get_all_health))
        .route("/api/health/{provider}", get(get_provider_health))
        .route("/api/health/{provider}/reset", post(reset_provider_health))
        .route("/api/distribution-stats", get(get_distribution_stats))
        .route(
            "/api/distribution-stats/reset",
            post(reset_distribution_stats),
        )
        .route("/api/requests", get(list_requests))
        .route("/api/requests/{id}", get(get_request))
        .route("/api/dead-letters", get(get_dead_letters))
        .route("/api/stats", get(get_stats))
        .with_state(state)
}
