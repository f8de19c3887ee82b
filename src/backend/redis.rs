//! Redis backend implementation.

use super::TokenBackend;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use deadpool_redis::redis::{
    self, cmd, pipe, AsyncCommands, Cmd, ConnectionInfo, FromRedisValue, IntoConnectionInfo,
    Value,
};
use deadpool_redis::{Config, Pool, PoolConfig, Runtime, Timeouts};
use std::time::Duration;

/// Default Redis connection pool size.
/// Formula: (CPU cores × 2) + 1
/// For 8-core systems: 16 connections is optimal
const DEFAULT_POOL_SIZE: usize = 16;

/// Default bound on waiting for, creating or recycling a pooled connection.
const DEFAULT_POOL_TIMEOUT: Duration = Duration::from_millis(500);

/// Configuration for Redis backend.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub url: String, // e.g. "redis://:password@hostname:6379"
    pub db: i64,
    pub pool_size: usize,
    /// Applied to pool wait, connection creation and recycling.
    pub timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
            db: 0,
            pool_size: DEFAULT_POOL_SIZE,
            timeout: DEFAULT_POOL_TIMEOUT,
        }
    }
}

impl From<&StoreConfig> for RedisConfig {
    fn from(config: &StoreConfig) -> Self {
        RedisConfig {
            url: config.url.clone(),
            db: config.db,
            pool_size: config.max_connections.unwrap_or(DEFAULT_POOL_SIZE),
            timeout: config.retry.attempt_timeout,
        }
    }
}

impl RedisConfig {
    /// Parsed connection settings with `db` taking precedence over any
    /// database in the URL.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the URL is not a valid Redis URL.
    pub fn connection_info(&self) -> Result<ConnectionInfo> {
        let mut info = self
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| Error::ConfigError(format!("Invalid Redis URL: {}", e)))?;
        info.redis.db = self.db;
        Ok(info)
    }

    fn pool_config(&self) -> PoolConfig {
        let mut pool = PoolConfig::new(self.pool_size);
        pool.timeouts = Timeouts {
            wait: Some(self.timeout),
            create: Some(self.timeout),
            recycle: Some(self.timeout),
        };
        pool
    }
}

/// Redis-backed token store.
///
/// Requires Redis 7.0 or later (`SET ... NX GET`).
///
/// # Example
///
/// ```no_run
/// # use cache_tokens::backend::{RedisBackend, RedisConfig, TokenBackend};
/// # use cache_tokens::error::Result;
/// # async fn example() -> Result<()> {
/// let backend = RedisBackend::new(RedisConfig {
///     url: "redis://localhost:6379".to_string(),
///     ..Default::default()
/// })?;
///
/// let token = backend.get_or_set("tokens:users#1", "abc", None).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
}

impl RedisBackend {
    /// Create new Redis backend from configuration.
    ///
    /// The pool connects lazily, so an unreachable server does not fail construction.
    ///
    /// # Errors
    /// Returns `Err` if the URL is malformed or the pool cannot be built
    pub fn new(config: RedisConfig) -> Result<Self> {
        let mut cfg = Config::from_connection_info(config.connection_info()?);
        cfg.pool = Some(config.pool_config());

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::ConfigError(format!("Failed to create connection pool: {}", e)))?;

        info!(
            "✓ Redis backend initialized (db: {}, pool size: {})",
            config.db, config.pool_size
        );

        Ok(RedisBackend { pool })
    }

    /// Create from the process environment, see [`StoreConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        Self::new(RedisConfig::from(&StoreConfig::from_env()?))
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

/// Milliseconds for `PX` / `PEXPIRE`; Redis rejects 0 and anything past `i64`.
fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}

fn set_cmd(key: &str, value: &str, ttl: Option<Duration>) -> Cmd {
    let mut cmd = cmd("SET");
    cmd.arg(key).arg(value);
    if let Some(ttl) = ttl {
        cmd.arg("PX").arg(ttl_millis(ttl));
    }
    cmd
}

/// `SET key value [PX ms] NX GET`: store unless present, replying with the previous value.
fn set_nx_get_cmd(key: &str, value: &str, ttl: Option<Duration>) -> Cmd {
    let mut cmd = set_cmd(key, value, ttl);
    cmd.arg("NX").arg("GET");
    cmd
}

/// Value now stored after `SET NX GET`: nil means ours was written.
fn stored_after_set_nx_get(reply: &Value, candidate: &str) -> Result<String> {
    let previous: Option<String> = FromRedisValue::from_redis_value(reply)?;
    Ok(previous.unwrap_or_else(|| candidate.to_string()))
}

fn add_members_cmds(key: &str, members: &[String], ttl: Duration) -> (Cmd, Cmd) {
    let mut sadd = cmd("SADD");
    sadd.arg(key).arg(members);
    let mut pexpire = cmd("PEXPIRE");
    pexpire.arg(key).arg(ttl_millis(ttl));
    (sadd, pexpire)
}

impl TokenBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        debug!(
            "✓ Redis GET {} -> {}",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    async fn get_or_set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<String> {
        let mut conn = self.connection().await?;
        let reply: Value = set_nx_get_cmd(key, value, ttl)
            .query_async(&mut *conn)
            .await?;

        let stored = stored_after_set_nx_get(&reply, value)?;
        if stored == value {
            debug!("✓ Redis SET NX {} (created)", key);
        }
        Ok(stored)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection().await?;
        set_cmd(key, value, ttl)
            .query_async::<()>(&mut *conn)
            .await?;
        debug!("✓ Redis SET {}", key);
        Ok(())
    }

    async fn set_many(&self, pairs: &[(String, String)], ttl: Option<Duration>) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection().await?;

        // Non-transactional pipeline: one round trip, no MULTI/EXEC.
        let mut pipe = pipe();
        for (key, value) in pairs {
            pipe.add_command(set_cmd(key, value, ttl)).ignore();
        }
        pipe.query_async::<()>(&mut *conn).await?;

        debug!("✓ Redis pipelined SET {} keys", pairs.len());
        Ok(())
    }

    async fn add_members(&self, key: &str, members: &[String], ttl: Duration) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection().await?;
        let (sadd, pexpire) = add_members_cmds(key, members, ttl);
        pipe()
            .atomic()
            .add_command(sadd)
            .ignore()
            .add_command(pexpire)
            .ignore()
            .query_async::<()>(&mut *conn)
            .await?;

        debug!("✓ Redis SADD {} ({} members)", key, members.len());
        Ok(())
    }

    async fn members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.del(key).await?;
        debug!("✓ Redis DEL {}", key);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match self.pool.get().await {
            Ok(mut conn) => {
                let pong: redis::RedisResult<String> = cmd("PING").query_async(&mut *conn).await;
                Ok(pong.is_ok())
            }
            Err(_) => Ok(false),
        }
    }
}
