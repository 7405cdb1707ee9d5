//! Entity builders for tests

use chrono::Utc;

use gateway_domain::{Attempt, AttemptStatus, RequestStatus, SmsRequest};

/// Start building an [`SmsRequest`] with sensible defaults
pub fn request() -> SmsRequestBuilder {
    SmsRequestBuilder::default()
}

pub struct SmsRequestBuilder {
    request: SmsRequest,
}

impl Default for SmsRequestBuilder {
    fn default() -> Self {
        Self {
            request: SmsRequest::new("01921317475".to_string(), "test message".to_string()),
        }
    }
}

impl SmsRequestBuilder {
    pub fn id(mut self, id: i64) -> Self {
        self.request.id = id;
        self
    }

    pub fn phone(mut self, phone: &str) -> Self {
        self.request.phone = phone.to_string();
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.request.text = text.to_string();
        self
    }

    pub fn status(mut self, status: RequestStatus) -> Self {
        self.request.status = status;
        self
    }

    pub fn attempts_count(mut self, count: i32) -> Self {
        self.request.attempts_count = count;
        self
    }

    pub fn excluded(mut self, providers: &[&str]) -> Self {
        self.request.excluded_providers = providers.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn build(self) -> SmsRequest {
        self.request
    }
}

/// An [`Attempt`] row ready for inserting in tests
pub fn attempt(request_id: i64, provider_id: &str, status: AttemptStatus) -> Attempt {
    Attempt {
        id: 0,
        request_id,
        provider_id: provider_id.to_string(),
        status,
        http_status: match status {
            AttemptStatus::Ok => Some(200),
            AttemptStatus::ErrorTransient => Some(500),
            AttemptStatus::ErrorPermanent => Some(400),
            AttemptStatus::Timeout => None,
        },
        response_body: None,
        error_message: None,
        started_at: Utc::now(),
        ended_at: Some(Utc::now()),
    }
}
