//! Store connection, namespace and retry configuration.
//!
//! [`StoreConfig::from_env`] picks up the Redis URL from whichever variable
//! holds a `redis://` value, so hosting provider aliases such as
//! `REDISTOGO_URL`, `REDISCLOUD_URL` or `OPENREDIS_URL` work without mapping.
//! The database index and pool size are read from `<STUB>_DB` and
//! `<STUB>_MAX_CONNECTIONS`, where `<STUB>` is the URL variable's name up to
//! the first `_`, falling back to `REDIS_DB` and `REDIS_MAX_CONNECTIONS`:
//!
//! ```text
//! REDISTOGO_URL=redis://hostname:6379
//! REDIS_DB=1                  # ignored, REDISTOGO_DB wins
//! REDISTOGO_DB=2
//! REDIS_MAX_CONNECTIONS=5     # used, no REDISTOGO_MAX_CONNECTIONS
//! ```
//!
//! `max_connections` bounds a pool shared by one process. With 2 processes of
//! 2 workers each and `max_connections = 5`, the server must accept 20 clients.

use crate::error::{Error, Result};
use crate::identifier::DEFAULT_NAMESPACE;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Prefix of the durable pending-change sets, one per unit of work.
pub const DEFAULT_PENDING_PREFIX: &str = "tokens.pending";

/// Pending sets orphaned by a crashed process expire an hour after the last record.
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(60 * 60);

const DEFAULT_STUB: &str = "REDIS";
const URL_SCHEMES: [&str; 2] = ["redis://", "rediss://"];

/// Retry and degradation policy applied to every token store operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each further retry.
    #[serde(with = "millis")]
    pub base_delay: Duration,
    /// Return an unstored fresh token when reads exhaust their retries.
    pub fail_open: bool,
    /// Longest a single attempt may wait on the store before it counts as a
    /// connectivity failure.
    #[serde(with = "millis")]
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            fail_open: true,
            attempt_timeout: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Upper bound on the time one store operation can take: every attempt
    /// timing out plus every backoff delay.
    pub fn budget(&self) -> Duration {
        let attempts = self
            .attempt_timeout
            .saturating_mul(self.max_retries.saturating_add(1));
        (1..=self.max_retries).fold(attempts, |total, n| {
            total.saturating_add(self.delay_for(n))
        })
    }
}

/// Everything needed to construct an engine once at process start.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub db: i64,
    pub max_connections: Option<usize>,
    /// Namespace of every identifier minted by the engine.
    pub namespace: String,
    pub pending_prefix: String,
    #[serde(with = "millis")]
    pub pending_ttl: Duration,
    /// Optional expiry for tokens; `None` keeps them until rotated.
    #[serde(with = "opt_millis")]
    pub token_ttl: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            url: "redis://127.0.0.1:6379".to_string(),
            db: 0,
            max_connections: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            pending_prefix: DEFAULT_PENDING_PREFIX.to_string(),
            pending_ttl: DEFAULT_PENDING_TTL,
            token_ttl: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Read connection settings from the process environment.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if no variable holds a Redis URL or a
    /// db / max connections value is not a number.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Read connection settings from an explicit set of variables.
    ///
    /// Variables are scanned in name order, so the choice of URL is stable
    /// when more than one variable holds one.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env: BTreeMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let (url_key, url) = env
            .iter()
            .find(|(_, v)| URL_SCHEMES.iter().any(|scheme| v.starts_with(scheme)))
            .ok_or_else(|| Error::ConfigError("Redis URL not found in env".to_string()))?;

        let mut stubs = Vec::with_capacity(2);
        if let Some((stub, _)) = url_key.split_once('_') {
            stubs.push(stub.to_string());
        }
        stubs.push(DEFAULT_STUB.to_string());

        let db = lookup::<i64>(&env, &stubs, "DB")?.unwrap_or(0);
        let max_connections = lookup::<usize>(&env, &stubs, "MAX_CONNECTIONS")?;

        info!(
            "Redis config resolved from {} (db: {}, max connections: {:?})",
            url_key, db, max_connections
        );

        Ok(StoreConfig {
            url: url.clone(),
            db,
            max_connections,
            ..Default::default()
        })
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = Some(ttl);
        self
    }
}

fn lookup<T: std::str::FromStr>(
    env: &BTreeMap<String, String>,
    stubs: &[String],
    suffix: &str,
) -> Result<Option<T>> {
    for stub in stubs {
        let key = format!("{}_{}", stub, suffix);
        if let Some(raw) = env.get(&key) {
            return raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| Error::ConfigError(format!("{} is not a number: {:?}", key, raw)));
        }
    }
    Ok(None)
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}
