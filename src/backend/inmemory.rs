//! In-process backend for tests, demos and single-process deployments.

use super::TokenBackend;
use crate::error::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Debug)]
enum Value {
    Str(String),
    Set(BTreeSet<String>),
}

#[derive(Clone, Debug)]
struct Stored {
    value: Value,
    expires_at: Option<Instant>,
}

impl Stored {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Stored {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Thread-safe in-memory store backed by `DashMap`.
///
/// Cloning shares the same underlying map. Expiry is evaluated lazily on access.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    store: Arc<DashMap<String, Stored>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.store.iter().filter(|e| !e.value().is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every key, as a store restart without persistence would.
    pub fn flush(&self) {
        self.store.clear();
        warn!("⚠ In-memory FLUSH executed - all tokens and pending sets dropped");
    }

    fn wrong_type(key: &str) -> Error {
        Error::BackendError(format!(
            "WRONGTYPE operation against key {} holding the wrong kind of value",
            key
        ))
    }
}

impl TokenBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.store.get(key) {
            Some(entry) if !entry.is_expired() => match &entry.value {
                Value::Str(s) => Ok(Some(s.clone())),
                Value::Set(_) => Err(Self::wrong_type(key)),
            },
            _ => Ok(None),
        }
    }

    async fn get_or_set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<String> {
        match self.store.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(Stored::new(Value::Str(value.to_string()), ttl));
                    return Ok(value.to_string());
                }
                match &occupied.get().value {
                    Value::Str(s) => Ok(s.clone()),
                    Value::Set(_) => Err(Self::wrong_type(key)),
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Stored::new(Value::Str(value.to_string()), ttl));
                Ok(value.to_string())
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.store.insert(
            key.to_string(),
            Stored::new(Value::Str(value.to_string()), ttl),
        );
        Ok(())
    }

    async fn set_many(&self, pairs: &[(String, String)], ttl: Option<Duration>) -> Result<()> {
        for (key, value) in pairs {
            self.store
                .insert(key.clone(), Stored::new(Value::Str(value.clone()), ttl));
        }
        Ok(())
    }

    async fn add_members(&self, key: &str, members: &[String], ttl: Duration) -> Result<()> {
        let mut entry = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| Stored::new(Value::Set(BTreeSet::new()), Some(ttl)));
        if entry.is_expired() {
            *entry = Stored::new(Value::Set(BTreeSet::new()), Some(ttl));
        }
        match &mut entry.value {
            Value::Set(set) => set.extend(members.iter().cloned()),
            Value::Str(_) => return Err(Self::wrong_type(key)),
        }
        entry.expires_at = Some(Instant::now() + ttl);
        Ok(())
    }

    async fn members(&self, key: &str) -> Result<Vec<String>> {
        match self.store.get(key) {
            Some(entry) if !entry.is_expired() => match &entry.value {
                Value::Set(set) => Ok(set.iter().cloned().collect()),
                Value::Str(_) => Err(Self::wrong_type(key)),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
