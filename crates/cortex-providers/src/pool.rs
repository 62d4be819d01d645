use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::health::{HealthTracker, ProviderHealthEntry};
use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};

/// Maximum attempts for a single provider call before surfacing the error.
const MAX_RETRIES: u32 = 2;

/// A named set of providers with passive health tracking. Unlike the
/// single-chain fallback router, the pool is addressed by name — the
/// Router/Budget Gate decides *which* provider to try per spec.md §4.4;
/// the pool's job is only to execute that choice with retry/backoff and
/// to record the outcome.
pub struct ProviderPool {
    providers: HashMap<String, Box<dyn LlmProvider>>,
    health: Arc<HealthTracker>,
}

impl ProviderPool {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            health: HealthTracker::new(),
        }
    }

    pub fn register(&mut self, provider: Box<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn health_snapshot(&self) -> Vec<ProviderHealthEntry> {
        self.health.all_entries()
    }

    /// Whether the router may select this provider right now.
    pub fn is_available(&self, name: &str) -> bool {
        self.providers.contains_key(name) && !self.health.is_down(name)
    }

    pub fn known_providers(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }

    /// Execute a request against a named provider, retrying transient errors
    /// with exponential backoff and recording the outcome in the health tracker.
    pub async fn call(&self, name: &str, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let provider = self
            .providers
            .get(name)
            .ok_or_else(|| ProviderError::Unavailable(format!("unknown provider: {name}")))?;

        let mut last_err: Option<ProviderError> = None;

        for attempt in 0..=MAX_RETRIES {
            match provider.complete(req).await {
                Ok(resp) => {
                    if attempt > 0 {
                        info!(provider = name, attempt, "request succeeded after retry");
                    }
                    self.health.record_success(name);
                    return Ok(resp);
                }
                Err(e) => {
                    warn!(provider = name, attempt, err = %e, "provider call failed");
                    let transient = e.is_transient();
                    self.health.record_failure(name, &e);
                    last_err = Some(e);

                    if !transient || attempt == MAX_RETRIES {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(200 * (attempt as u64 + 1))).await;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Unavailable(name.to_string())))
    }
}

impl Default for ProviderPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatResponse, ContentBlock, Message, StopReason, Usage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyThenOk {
        calls: AtomicU32,
        fail_times: u32,
    }

    #[async_trait]
    impl LlmProvider for FlakyThenOk {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(ProviderError::Timeout { ms: 10 });
            }
            Ok(ChatResponse {
                content: vec![ContentBlock::Text { text: "ok".into() }],
                model: req.model.clone(),
                stop_reason: StopReason::EndTurn,
                usage: Usage::default(),
            })
        }
    }

    struct AlwaysRateLimited;

    #[async_trait]
    impl LlmProvider for AlwaysRateLimited {
        fn name(&self) -> &str {
            "limited"
        }

        async fn complete(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Err(ProviderError::RateLimited { retry_after_ms: 5000 })
        }
    }

    fn req() -> ChatRequest {
        ChatRequest::new("test-model", vec![Message::user_text("hi")])
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let mut pool = ProviderPool::new();
        pool.register(Box::new(FlakyThenOk { calls: AtomicU32::new(0), fail_times: 1 }));
        let resp = pool.call("flaky", &req()).await.unwrap();
        assert_eq!(resp.text(), "ok");
        assert!(pool.is_available("flaky"));
    }

    #[tokio::test]
    async fn rate_limit_is_not_transient_and_trips_health() {
        let mut pool = ProviderPool::new();
        pool.register(Box::new(AlwaysRateLimited));
        for _ in 0..3 {
            let _ = pool.call("limited", &req()).await;
        }
        assert!(!pool.is_available("limited"));
    }

    #[tokio::test]
    async fn unknown_provider_errors() {
        let pool = ProviderPool::new();
        let result = pool.call("ghost", &req()).await;
        assert!(result.is_err());
    }
}
