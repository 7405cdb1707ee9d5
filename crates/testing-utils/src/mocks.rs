//! Mock implementations for repository traits and the provider client
//!
//! These hold their state in `Arc<Mutex<..>>` so clones share storage,
//! mirroring how the production bindings share a pool.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use gateway_domain::{
    Attempt, AttemptRepository, DeadLetter, DeadLetterRepository, Provider, ProviderClient,
    ProviderResponse, RequestFilter, RequestStats, RequestStatus, SmsRequest,
    SmsRequestRepository,
};
use gateway_errors::{GatewayError, GatewayResult};

#[derive(Debug, Clone, Default)]
pub struct MockSmsRequestRepository {
    requests: Arc<Mutex<HashMap<i64, SmsRequest>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockSmsRequestRepository {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.requests.lock().unwrap().clear();
        *self.next_id.lock().unwrap() = 1;
    }

    pub fn all(&self) -> Vec<SmsRequest> {
        self.requests.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl SmsRequestRepository for MockSmsRequestRepository {
    async fn create(&self, phone: &str, text: &str) -> GatewayResult<SmsRequest> {
        let mut requests = self.requests.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut request = SmsRequest::new(phone.to_string(), text.to_string());
        request.id = *next_id;
        *next_id += 1;
        requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_by_id(&self, id: i64) -> GatewayResult<Option<SmsRequest>> {
        Ok(self.requests.lock().unwrap().get(&id).cloned())
    }

    async fn mark_in_flight(&self, id: i64, provider_id: &str) -> GatewayResult<SmsRequest> {
        let mut requests = self.requests.lock().unwrap();
        let request = requests
            .get_mut(&id)
            .ok_or(GatewayError::RequestNotFound { id })?;
        if request.is_terminal() {
            return Err(GatewayError::database_error(format!(
                "请求 {id} 已处于终态，拒绝更新"
            )));
        }
        request.status = RequestStatus::InFlight;
        request.last_provider_id = Some(provider_id.to_string());
        request.attempts_count += 1;
        request.updated_at = Utc::now();
        Ok(request.clone())
    }

    async fn mark_succeeded(&self, id: i64) -> GatewayResult<()> {
        let mut requests = self.requests.lock().unwrap();
        let request = requests
            .get_mut(&id)
            .ok_or(GatewayError::RequestNotFound { id })?;
        if request.is_terminal() {
            return Err(GatewayError::database_error(format!(
                "请求 {id} 已处于终态，拒绝更新"
            )));
        }
        request.status = RequestStatus::Succeeded;
        request.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed_permanent(&self, id: i64) -> GatewayResult<()> {
        let mut requests = self.requests.lock().unwrap();
        let request = requests
            .get_mut(&id)
            .ok_or(GatewayError::RequestNotFound { id })?;
        if request.is_terminal() {
            return Err(GatewayError::database_error(format!(
                "请求 {id} 已处于终态，拒绝更新"
            )));
        }
        request.status = RequestStatus::FailedPermanent;
        request.updated_at = Utc::now();
        Ok(())
    }

    async fn update_excluded_providers(&self, id: i64, excluded: &[String]) -> GatewayResult<()> {
        let mut requests = self.requests.lock().unwrap();
        let request = requests
            .get_mut(&id)
            .ok_or(GatewayError::RequestNotFound { id })?;
        request.excluded_providers = excluded.to_vec();
        request.updated_at = Utc::now();
        Ok(())
    }

    async fn list(&self, filter: &RequestFilter) -> GatewayResult<Vec<SmsRequest>> {
        let requests = self.requests.lock().unwrap();
        let mut matched: Vec<SmsRequest> = requests
            .values()
            .filter(|r| filter.status.is_none_or(|status| r.status == status))
            .filter(|r| {
                filter
                    .provider
                    .as_ref()
                    .is_none_or(|p| r.last_provider_id.as_ref() == Some(p))
            })
            .filter(|r| filter.start_time.is_none_or(|start| r.created_at >= start))
            .filter(|r| filter.end_time.is_none_or(|end| r.created_at <= end))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched.truncate(filter.limit.unwrap_or(100).clamp(1, 1000) as usize);
        Ok(matched)
    }

    async fn stats(&self) -> GatewayResult<RequestStats> {
        let requests = self.requests.lock().unwrap();
        let mut stats = RequestStats {
            total: requests.len() as i64,
            ..Default::default()
        };
        for request in requests.values() {
            match request.status {
                RequestStatus::Pending => stats.pending += 1,
                RequestStatus::InFlight => stats.in_flight += 1,
                RequestStatus::Succeeded => stats.succeeded += 1,
                RequestStatus::FailedPermanent => stats.failed_permanent += 1,
            }
        }
        Ok(stats)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockAttemptRepository {
    attempts: Arc<Mutex<Vec<Attempt>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockAttemptRepository {
    pub fn new() -> Self {
        Self {
            attempts: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn all(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttemptRepository for MockAttemptRepository {
    async fn append(&self, attempt: &Attempt) -> GatewayResult<Attempt> {
        let mut attempts = self.attempts.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut created = attempt.clone();
        created.id = *next_id;
        *next_id += 1;
        attempts.push(created.clone());
        Ok(created)
    }

    async fn get_by_request_id(&self, request_id: i64) -> GatewayResult<Vec<Attempt>> {
        Ok(self
            .attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.request_id == request_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockDeadLetterRepository {
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockDeadLetterRepository {
    pub fn new() -> Self {
        Self {
            dead_letters: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn count(&self) -> usize {
        self.dead_letters.lock().unwrap().len()
    }

    pub fn all(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterRepository for MockDeadLetterRepository {
    async fn record(&self, dead_letter: &DeadLetter) -> GatewayResult<DeadLetter> {
        let mut dead_letters = self.dead_letters.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut created = dead_letter.clone();
        created.id = *next_id;
        *next_id += 1;
        dead_letters.push(created.clone());
        Ok(created)
    }

    async fn get_by_request_id(&self, request_id: i64) -> GatewayResult<Option<DeadLetter>> {
        Ok(self
            .dead_letters
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.request_id == request_id)
            .cloned())
    }

    async fn list(&self, limit: i64) -> GatewayResult<Vec<DeadLetter>> {
        let dead_letters = self.dead_letters.lock().unwrap();
        Ok(dead_letters
            .iter()
            .rev()
            .take(limit.clamp(1, 1000) as usize)
            .cloned()
            .collect())
    }
}

/// Scripted provider client.
///
/// Responses queued per provider are consumed in order; once a script is
/// exhausted (or for unscripted providers) the default response is returned.
pub struct MockProviderClient {
    scripts: Mutex<HashMap<String, VecDeque<ProviderResponse>>>,
    default_response: Mutex<ProviderResponse>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockProviderClient {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_response: Mutex::new(ProviderResponse::from_http(200, "{\"status\":\"sent\"}")),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `response` for any unscripted call
    pub fn with_default(self, response: ProviderResponse) -> Self {
        *self.default_response.lock().unwrap() = response;
        self
    }

    /// Queue responses for one provider, consumed first
    pub fn script(&self, provider_id: &str, responses: Vec<ProviderResponse>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(provider_id.to_string())
            .or_default()
            .extend(responses);
    }

    /// (provider_id, phone) for every call made
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, provider_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == provider_id)
            .count()
    }
}

impl Default for MockProviderClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderClient for MockProviderClient {
    async fn send_sms(&self, provider: &Provider, phone: &str, _text: &str) -> ProviderResponse {
        self.calls
            .lock()
            .unwrap()
            .push((provider.id.clone(), phone.to_string()));

        if let Some(script) = self.scripts.lock().unwrap().get_mut(&provider.id) {
            if let Some(response) = script.pop_front() {
                return response;
            }
        }
        self.default_response.lock().unwrap().clone()
    }
}
