//! Resilient token store.
//!
//! Wraps a [`TokenBackend`] with the retry policy and the two degradation
//! rules that keep a store outage from reaching the host application:
//!
//! - reads (`get_or_create`) that exhaust their retries fail open, returning
//!   a fresh unstored token, which can only cause an extra cache miss;
//! - writes (`rotate`, `rotate_many`) that exhaust their retries are logged
//!   and swallowed, so a commit is never failed by invalidation.

use crate::backend::TokenBackend;
use crate::config::{RetryPolicy, StoreConfig};
use crate::error::{Error, Result};
use crate::identifier::Identifier;
use crate::observability::{NoOpMetrics, StoreMetrics};
use crate::token::Token;
use std::collections::BTreeSet;
use std::future::Future;
use std::time::{Duration, Instant};

/// Result of a batch rotation. Never an error: failures are reported, not raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// Every identifier received a new stored token.
    Rotated(usize),
    /// The write was abandoned after retries; tokens may be partially rotated.
    Failed { attempted: usize, error: Error },
}

/// Token store shared by the commit coordinator and every key generator.
///
/// Construct once per process and share it behind an `Arc`.
pub struct TokenStore<B: TokenBackend> {
    backend: B,
    policy: RetryPolicy,
    token_ttl: Option<Duration>,
    metrics: Box<dyn StoreMetrics>,
}

impl<B: TokenBackend> TokenStore<B> {
    /// Create new store with the default retry policy.
    pub fn new(backend: B) -> Self {
        TokenStore {
            backend,
            policy: RetryPolicy::default(),
            token_ttl: None,
            metrics: Box::new(NoOpMetrics),
        }
    }

    /// Create a store with the policy and token TTL from `config`.
    pub fn from_config(backend: B, config: &StoreConfig) -> Self {
        TokenStore {
            backend,
            policy: config.retry.clone(),
            token_ttl: config.token_ttl,
            metrics: Box::new(NoOpMetrics),
        }
    }

    /// Set custom retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Box<dyn StoreMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Expire tokens after `ttl` instead of keeping them until rotated.
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = Some(ttl);
        self
    }

    /// Get backend reference (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Return the current token for `identifier`, creating one if absent.
    ///
    /// A missing token (first reference, or the store lost its data) is created
    /// with a set-if-absent write, so concurrent first reads converge on the
    /// same stored value.
    ///
    /// # Errors
    ///
    /// - `Error::StoreConnectivity`: retries exhausted and fail-open disabled
    /// - `Error::BackendError`: the store rejected the operation
    pub async fn get_or_create(&self, identifier: &Identifier) -> Result<Token> {
        let key = identifier.store_key();
        let key = key.as_str();
        let backend = &self.backend;
        let ttl = self.token_ttl;

        let result = self
            .resiliently("get_or_create", || async move {
                if let Some(existing) = backend.get(key).await? {
                    return Ok(existing);
                }
                let candidate = Token::mint();
                backend.get_or_set(key, candidate.as_str(), ttl).await
            })
            .await;

        match result {
            Ok(value) => Ok(Token::from(value)),
            Err(e) if e.is_connectivity() && self.policy.fail_open => {
                warn!("⚠ Token read for {} failed open: {}", key, e);
                self.metrics.record_fail_open(key);
                Ok(Token::mint())
            }
            Err(e) => {
                self.metrics.record_error("get_or_create", &e.to_string());
                Err(e)
            }
        }
    }

    /// Read the stored token without creating one.
    pub async fn peek(&self, identifier: &Identifier) -> Result<Option<Token>> {
        let key = identifier.store_key();
        let key = key.as_str();
        let backend = &self.backend;

        self.resiliently("peek", || async move { backend.get(key).await })
            .await
            .map(|value| value.map(Token::from))
    }

    /// Replace the token for `identifier` with a fresh one and return it.
    ///
    /// A write that exhausts its retries is logged and swallowed; the returned
    /// token is then unstored.
    pub async fn rotate(&self, identifier: &Identifier) -> Token {
        let token = Token::mint();
        let key = identifier.store_key();
        let timer = Instant::now();

        let (key_ref, value, backend, ttl) =
            (key.as_str(), token.as_str(), &self.backend, self.token_ttl);
        let result = self
            .resiliently("rotate", || async move { backend.set(key_ref, value, ttl).await })
            .await;

        match result {
            Ok(()) => {
                debug!("✓ Rotated token for {}", key);
                self.metrics.record_rotation(1, true, timer.elapsed());
            }
            Err(e) => {
                error!("✗ Token rotation for {} abandoned: {}", key, e);
                self.metrics.record_rotation(1, false, timer.elapsed());
                self.metrics.record_error("rotate", &e.to_string());
            }
        }

        token
    }

    /// Rotate every identifier in one pipelined write.
    ///
    /// Not atomic across identifiers. Each rotation is independent, so a
    /// partially applied batch followed by a retry is safe.
    pub async fn rotate_many<'a, I>(&self, identifiers: I) -> RotationOutcome
    where
        I: IntoIterator<Item = &'a Identifier>,
    {
        let unique: BTreeSet<&Identifier> = identifiers.into_iter().collect();
        if unique.is_empty() {
            return RotationOutcome::Rotated(0);
        }

        let pairs: Vec<(String, String)> = unique
            .iter()
            .map(|id| (id.store_key(), Token::mint().into_string()))
            .collect();
        let count = pairs.len();
        let timer = Instant::now();

        let (pairs_ref, backend, ttl) = (pairs.as_slice(), &self.backend, self.token_ttl);
        let result = self
            .resiliently("rotate_many", || async move {
                backend.set_many(pairs_ref, ttl).await
            })
            .await;

        match result {
            Ok(()) => {
                debug!("✓ Rotated {} tokens in {:?}", count, timer.elapsed());
                self.metrics.record_rotation(count, true, timer.elapsed());
                RotationOutcome::Rotated(count)
            }
            Err(e) => {
                error!("✗ Rotation of {} tokens abandoned: {}", count, e);
                self.metrics.record_rotation(count, false, timer.elapsed());
                self.metrics.record_error("rotate_many", &e.to_string());
                RotationOutcome::Failed {
                    attempted: count,
                    error: e,
                }
            }
        }
    }

    /// Check if the backend answers within one attempt timeout.
    pub async fn health_check(&self) -> bool {
        matches!(
            tokio::time::timeout(self.policy.attempt_timeout, self.backend.health_check()).await,
            Ok(Ok(true))
        )
    }

    /// Run `call`, retrying connectivity failures with exponential backoff.
    ///
    /// An attempt that outlives `attempt_timeout` is abandoned and counts as a
    /// connectivity failure, so the whole call is bounded by
    /// [`RetryPolicy::budget`]. Other errors are returned immediately.
    pub(crate) async fn resiliently<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        let max_attempts = self.policy.max_retries.saturating_add(1); // +1 for initial attempt
        let timeout = self.policy.attempt_timeout;

        loop {
            attempts += 1;

            let outcome = match tokio::time::timeout(timeout, call()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::StoreConnectivity(format!(
                    "{} timed out after {:?}",
                    operation, timeout
                ))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_connectivity() && attempts < max_attempts => {
                    warn!(
                        "Store {} failed (attempt {}/{}), retrying: {}",
                        operation, attempts, max_attempts, e
                    );
                    self.metrics.record_retry(operation, attempts);
                    tokio::time::sleep(self.policy.delay_for(attempts)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
