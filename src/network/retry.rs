//! Bounded retry with exponential backoff for collaborator calls
//!
//! Only transport failures are retried. Attestation failures and anything
//! the store classifies as a protocol violation surface immediately.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

#[cfg(feature = "tracing")]
use tracing::warn;

use crate::{
    data_structures::{BlockRange, KeyImage},
    errors::ServiceError,
    scanning::{
        BlockFetcher, KeyImageChecker, KeyImageStatus, LedgerRecord, QueryRequest, QueryResponse,
        QueryService,
    },
};

/// Retry behavior for one collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retry_attempts: usize,
    /// Delay before the first retry; doubles for each further retry
    pub retry_base_delay: Duration,
    /// Ceiling for any single delay
    pub retry_max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retry_attempts(mut self, max_attempts: usize) -> Self {
        self.max_retry_attempts = max_attempts;
        self
    }

    pub fn with_retry_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.retry_base_delay = base_delay;
        self.retry_max_delay = max_delay;
        self
    }

    pub fn production() -> Self {
        Self {
            max_retry_attempts: 5,
            retry_base_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_secs(30),
        }
    }

    pub fn development() -> Self {
        Self {
            max_retry_attempts: 2,
            retry_base_delay: Duration::from_millis(50),
            retry_max_delay: Duration::from_secs(2),
        }
    }

    /// Single attempt, no retries
    pub fn disabled() -> Self {
        Self {
            max_retry_attempts: 0,
            retry_base_delay: Duration::ZERO,
            retry_max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (zero-based)
    pub fn retry_delay(&self, attempt: usize) -> Duration {
        let delay = u32::try_from(attempt)
            .ok()
            .and_then(|shift| 1u32.checked_shl(shift))
            .map_or(self.retry_max_delay, |factor| {
                self.retry_base_delay.saturating_mul(factor)
            });
        delay.min(self.retry_max_delay)
    }

    pub fn should_retry(&self, attempt: usize, error: &ServiceError) -> bool {
        attempt < self.max_retry_attempts && is_transient(error)
    }
}

/// Network errors and timeouts may clear up on their own
pub fn is_transient(error: &ServiceError) -> bool {
    matches!(error, ServiceError::Network(_) | ServiceError::Timeout)
}

/// Run `operation` until it succeeds, fails permanently or runs out of retries
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if config.should_retry(attempt, &e) => {
                let delay = config.retry_delay(attempt);
                #[cfg(feature = "tracing")]
                warn!(
                    "Attempt {} failed: {}; retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Decorator adding [`retry_with_backoff`] to a collaborator
#[derive(Debug, Clone)]
pub struct Retrying<S> {
    inner: S,
    config: RetryConfig,
}

/// A [`QueryService`] wrapped in bounded retry
pub type RetryingQueryService<Q> = Retrying<Q>;

impl<S> Retrying<S> {
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[async_trait]
impl<S: QueryService> QueryService for Retrying<S> {
    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, ServiceError> {
        retry_with_backoff(&self.config, || self.inner.query(request)).await
    }
}

#[async_trait]
impl<S: BlockFetcher> BlockFetcher for Retrying<S> {
    async fn fetch(&self, range: &BlockRange) -> Result<Vec<LedgerRecord>, ServiceError> {
        retry_with_backoff(&self.config, || self.inner.fetch(range)).await
    }
}

#[async_trait]
impl<S: KeyImageChecker> KeyImageChecker for Retrying<S> {
    async fn check(&self, key_images: &[KeyImage]) -> Result<Vec<KeyImageStatus>, ServiceError> {
        retry_with_backoff(&self.config, || self.inner.check(key_images)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{keys::ViewPrivateKey, scanning::mocks::MockQueryService};
    use rand::rngs::OsRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(max_retry_attempts: usize) -> RetryConfig {
        RetryConfig::new()
            .with_max_retry_attempts(max_retry_attempts)
            .with_retry_delays(Duration::ZERO, Duration::ZERO)
    }

    #[test]
    fn test_retry_delay_backoff_is_capped() {
        let config = RetryConfig::new()
            .with_retry_delays(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(config.retry_delay(0), Duration::from_millis(100));
        assert_eq!(config.retry_delay(1), Duration::from_millis(200));
        assert_eq!(config.retry_delay(2), Duration::from_millis(350));
        assert_eq!(config.retry_delay(40), Duration::from_millis(350));
    }

    #[test]
    fn test_only_transient_errors_are_retried() {
        let config = RetryConfig::development();
        assert!(config.should_retry(0, &ServiceError::Timeout));
        assert!(config.should_retry(1, &ServiceError::Network("reset".into())));
        assert!(!config.should_retry(2, &ServiceError::Timeout));
        assert!(!config.should_retry(0, &ServiceError::Attestation("quote".into())));
        assert!(!RetryConfig::disabled().should_retry(0, &ServiceError::Timeout));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicUsize::new(0);
        let result = retry_with_backoff(&fast(3), || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(ServiceError::Timeout)
                } else {
                    Ok(call)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ServiceError::Network("down".into())) }
        })
        .await;
        assert_eq!(result, Err(ServiceError::Network("down".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ServiceError::Attestation("bad quote".into())) }
        })
        .await;
        assert!(matches!(result, Err(ServiceError::Attestation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retrying_query_service() {
        let service = MockQueryService::new(ViewPrivateKey::random(&mut OsRng).public_key());
        service.fail_next(ServiceError::Timeout);
        service.fail_next(ServiceError::Network("reset".into()));
        let retrying: RetryingQueryService<_> = Retrying::new(service.clone(), fast(2));

        assert!(retrying.query(&QueryRequest::default()).await.is_ok());
        assert_eq!(service.requests().len(), 1);
    }
}
