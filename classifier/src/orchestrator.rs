//! Classification orchestrator.
//!
//! ```text
//! classify(ticket)
//!   ├─ disabled ─────────────────────────────▶ fallback
//!   ├─ cache hit ────────────────────────────▶ cached result
//!   └─ miss ─▶ acquire lock ─┬─ timeout ─────▶ Err(Contention)
//!                            └─ held ─▶ cache re-check ─▶ hit ─▶ cached result
//!                                       └─ upstream ─▶ parse ─┬─ ok ───▶ result
//!                                                             └─ err ──▶ fallback
//!                                       cache store, release lock
//! ```
//!
//! The upstream attempt is bounded by the lock lease minus [`LEASE_MARGIN`].
//! An attempt that would outlive the lease becomes a fallback, so no second
//! caller can take over the lock while a call is still in flight.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::config::ClassifierConfig;
use crate::error::{AttemptError, ClassifyError, UpstreamError};
use crate::fallback;
use crate::interpreter;
use crate::result::ClassificationResult;
use crate::store::{SharedCache, SharedLocks};
use crate::ticket::TicketSnapshot;
use crate::upstream::{ChatClient, ChatRequest, OpenAiChatClient, SamplingParams, UpstreamCaller};

/// Time kept back from the lease for the cache write and release.
pub const LEASE_MARGIN: Duration = Duration::from_secs(1);

/// Entry point for classifying a ticket.
///
/// Total apart from lock contention: every other failure yields a valid
/// fallback result.
#[async_trait]
pub trait TicketClassifier: Send + Sync {
    async fn classify(&self, ticket: &TicketSnapshot)
        -> Result<ClassificationResult, ClassifyError>;
}

/// Cache-then-lock single-flight classifier.
pub struct Classifier {
    enabled: bool,
    model: String,
    sampling: SamplingParams,
    upstream: UpstreamCaller,
    cache: SharedCache,
    locks: SharedLocks,
    cache_ttl: Duration,
    lock_lease: Duration,
    lock_wait: Duration,
    attempt_budget: Duration,
    rng: Mutex<StdRng>,
}

impl Classifier {
    /// Build from config with an explicit chat client and stores.
    pub fn new(
        config: &ClassifierConfig,
        client: Arc<dyn ChatClient>,
        cache: SharedCache,
        locks: SharedLocks,
    ) -> Self {
        Self {
            enabled: config.enabled,
            model: config.model.clone(),
            sampling: config.sampling(),
            upstream: UpstreamCaller::new(client, config.retry_policy()),
            cache,
            locks,
            cache_ttl: config.cache_ttl(),
            lock_lease: config.lock_lease(),
            lock_wait: config.lock_wait(),
            attempt_budget: attempt_budget(config.lock_lease()),
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Build with the OpenAI-compatible HTTP client.
    pub fn with_openai(
        config: &ClassifierConfig,
        cache: SharedCache,
        locks: SharedLocks,
    ) -> Result<Self, UpstreamError> {
        let client = OpenAiChatClient::from_config(config)?;
        Ok(Self::new(config, Arc::new(client), cache, locks))
    }

    /// Replace the fallback random source with a seeded one.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn fallback(&self) -> ClassificationResult {
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        fallback::generate(&mut *rng)
    }

    async fn cached(&self, key: &str) -> Option<ClassificationResult> {
        let raw = match self.cache.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    async fn store(&self, key: &str, result: &ClassificationResult) {
        let raw = match serde_json::to_string(result) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "Failed to serialize classification");
                return;
            }
        };
        if let Err(e) = self.cache.set(key, raw, self.cache_ttl).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    /// One live attempt: upstream call, then interpretation.
    async fn attempt(&self, ticket: &TicketSnapshot) -> Result<ClassificationResult, AttemptError> {
        let request = ChatRequest::for_ticket(&self.model, self.sampling, ticket);
        let raw = self.upstream.call(&request).await?;
        interpreter::parse(&raw)
    }

    /// Work done while holding the ticket lock.
    async fn classify_locked(&self, ticket: &TicketSnapshot, key: &str) -> ClassificationResult {
        // A waiter behind the previous holder picks up its result.
        if let Some(hit) = self.cached(key).await {
            debug!(ticket_id = %ticket.id, "Cache filled while waiting for lock");
            return hit;
        }

        let bounded = tokio::time::timeout(self.attempt_budget, self.attempt(ticket)).await;
        let outcome = bounded.unwrap_or(Err(AttemptError::LeaseBudget(self.attempt_budget)));
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    ticket_id = %ticket.id,
                    kind = e.kind(),
                    error = %e,
                    "Classification fallback"
                );
                self.fallback()
            }
        };
        self.store(key, &result).await;
        result
    }
}

/// Share of `lease` an attempt may use. Short leases keep half for the margin.
fn attempt_budget(lease: Duration) -> Duration {
    if lease > LEASE_MARGIN * 2 {
        lease - LEASE_MARGIN
    } else {
        lease / 2
    }
}

#[async_trait]
impl TicketClassifier for Classifier {
    async fn classify(
        &self,
        ticket: &TicketSnapshot,
    ) -> Result<ClassificationResult, ClassifyError> {
        if !self.enabled {
            return Ok(self.fallback());
        }

        let key = ticket.cache_key();
        if let Some(hit) = self.cached(&key).await {
            debug!(ticket_id = %ticket.id, "Classification cache hit");
            return Ok(hit);
        }
        debug!(ticket_id = %ticket.id, "Classification cache miss");

        let lease = self
            .locks
            .acquire(&ticket.lock_key(), self.lock_lease, self.lock_wait)
            .await?;
        let result = self.classify_locked(ticket, &key).await;
        self.locks.release(lease).await;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LockError, StoreError};
    use crate::result::Category;
    use crate::store::{LockLease, LockProvider, MemoryCache, MemoryLocks, ResultCache};
    use crate::upstream::MockChatClient;
    use chrono::{TimeZone, Utc};

    fn ticket() -> TicketSnapshot {
        TicketSnapshot {
            id: "t-1".into(),
            subject: "Save fails".into(),
            body: "App crashes on save".into(),
            updated_at: Utc.timestamp_opt(1_757_000_000, 0).unwrap(),
        }
    }

    fn enabled() -> ClassifierConfig {
        ClassifierConfig {
            enabled: true,
            ..Default::default()
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl ResultCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }

        async fn set(&self, _: &str, _: String, _: Duration) -> Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }
    }

    struct BusyLocks;

    #[async_trait]
    impl LockProvider for BusyLocks {
        async fn acquire(
            &self,
            key: &str,
            _: Duration,
            max_wait: Duration,
        ) -> Result<LockLease, LockError> {
            Err(LockError::Timeout {
                key: key.to_string(),
                waited: max_wait,
            })
        }

        async fn release(&self, _: LockLease) {}
    }

    #[tokio::test]
    async fn test_disabled_skips_everything() {
        let mut mock = MockChatClient::new();
        mock.expect_send().never();
        let classifier = Classifier::new(
            &ClassifierConfig::default(),
            Arc::new(mock),
            Arc::new(BrokenCache),
            Arc::new(BusyLocks),
        );

        let result = classifier.classify(&ticket()).await.unwrap();
        assert!(result.is_fallback());
        assert!((0.3..=0.7).contains(&result.confidence()));
    }

    #[tokio::test]
    async fn test_success_is_cached() {
        let mut mock = MockChatClient::new();
        mock.expect_send().times(1).returning(|_| {
            Ok(r#"{"category":"bug","explanation":"crash on save","confidence":0.93}"#.into())
        });
        let cache = Arc::new(MemoryCache::new());
        let classifier = Classifier::new(
            &enabled(),
            Arc::new(mock),
            cache.clone(),
            MemoryLocks::new().shared(),
        );

        let first = classifier.classify(&ticket()).await.unwrap();
        let second = classifier.classify(&ticket()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.category(), Category::Bug);
        assert!(!first.is_fallback());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_failure_degrades_to_live_call() {
        let mut mock = MockChatClient::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Ok(r#"{"category":"question","confidence":0.6}"#.into()));
        let classifier = Classifier::new(
            &enabled(),
            Arc::new(mock),
            Arc::new(BrokenCache),
            MemoryLocks::new().shared(),
        );

        let result = classifier.classify(&ticket()).await.unwrap();
        assert_eq!(result.category(), Category::Question);
    }

    #[tokio::test]
    async fn test_contention_surfaces() {
        let mut mock = MockChatClient::new();
        mock.expect_send().never();
        let classifier = Classifier::new(
            &enabled(),
            Arc::new(mock),
            MemoryCache::new().shared(),
            Arc::new(BusyLocks),
        );

        let err = classifier.classify(&ticket()).await.unwrap_err();
        assert!(matches!(
            err,
            ClassifyError::Contention(LockError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_upstream_error_falls_back_and_releases_lock() {
        let mut mock = MockChatClient::new();
        mock.expect_send().times(1).returning(|_| {
            Err(UpstreamError::Api {
                status: 401,
                body: "invalid api key".into(),
            })
        });
        let locks = Arc::new(MemoryLocks::new());
        let classifier = Classifier::new(
            &enabled(),
            Arc::new(mock),
            MemoryCache::new().shared(),
            locks.clone(),
        );

        let result = classifier.classify(&ticket()).await.unwrap();
        assert!(result.is_fallback());
        assert!(!locks.is_held(&ticket().lock_key()));
    }

    #[tokio::test]
    async fn test_seeded_fallback_is_deterministic() {
        let make = || {
            let mut mock = MockChatClient::new();
            mock.expect_send().returning(|_| Ok("not json".into()));
            Classifier::new(
                &enabled(),
                Arc::new(mock),
                MemoryCache::new().shared(),
                MemoryLocks::new().shared(),
            )
            .with_seed(99)
        };
        let a = make().classify(&ticket()).await.unwrap();
        let b = make().classify(&ticket()).await.unwrap();
        assert_eq!(a, b);
        assert!(a.is_fallback());
    }

    #[test]
    fn test_attempt_budget_stays_inside_lease() {
        assert_eq!(attempt_budget(Duration::from_secs(15)), Duration::from_secs(14));
        assert_eq!(attempt_budget(Duration::from_secs(2)), Duration::from_secs(1));
        assert_eq!(attempt_budget(Duration::from_secs(1)), Duration::from_millis(500));
    }
}
