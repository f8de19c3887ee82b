//! Key-value store backends for tokens and pending change sets.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;

#[cfg(feature = "inmemory")]
mod inmemory;
#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "inmemory")]
pub use inmemory::InMemoryBackend;
#[cfg(feature = "redis")]
pub use self::redis::{RedisBackend, RedisConfig};

/// Primitives the token store needs from a key-value store.
///
/// Implementations must report unreachable-store failures as
/// `Error::StoreConnectivity` so the token store can retry and degrade.
/// `get_or_set`, `set` and `set_many` must be atomic per key.
pub trait TokenBackend: Send + Sync {
    /// Read a string value.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Store `value` under `key` unless a value exists; return the value now stored.
    fn get_or_set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Unconditionally store `value` under `key`.
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Unconditionally store every pair, in one round trip where supported.
    ///
    /// Not atomic across pairs.
    fn set_many(
        &self,
        pairs: &[(String, String)],
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Add members to the set at `key` and (re)arm its expiry.
    fn add_members(
        &self,
        key: &str,
        members: &[String],
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// All members of the set at `key` (empty if absent).
    fn members(&self, key: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Delete `key` of any type.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Check if the backend is reachable.
    fn health_check(&self) -> impl Future<Output = Result<bool>> + Send;
}
