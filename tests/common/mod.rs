#![allow(dead_code)]

use cache_tokens::backend::{InMemoryBackend, TokenBackend};
use cache_tokens::{ChangeListener, CommitReport, Error, Result, RollbackReport, SessionFactory};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// In-memory backend that can simulate a store outage.
#[derive(Clone, Default)]
pub struct OutageBackend {
    pub inner: InMemoryBackend,
    down: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl OutageBackend {
    pub fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    pub fn come_back(&self) {
        self.down.store(false, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            Err(Error::StoreConnectivity("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

impl TokenBackend for OutageBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn get_or_set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<String> {
        self.check()?;
        self.inner.get_or_set(key, value, ttl).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn set_many(&self, pairs: &[(String, String)], ttl: Option<Duration>) -> Result<()> {
        self.check()?;
        self.inner.set_many(pairs, ttl).await
    }

    async fn add_members(&self, key: &str, members: &[String], ttl: Duration) -> Result<()> {
        self.check()?;
        self.inner.add_members(key, members, ttl).await
    }

    async fn members(&self, key: &str) -> Result<Vec<String>> {
        self.check()?;
        self.inner.members(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.check().is_ok())
    }
}

/// Minimal unit-of-work system: sessions that flush dirty rows and notify listeners.
pub struct Sessions<L> {
    listeners: Vec<Arc<L>>,
    next_id: usize,
}

impl<L> Default for Sessions<L> {
    fn default() -> Self {
        Sessions {
            listeners: Vec::new(),
            next_id: 0,
        }
    }
}

impl<L: ChangeListener> SessionFactory<L> for Sessions<L> {
    fn subscribe(&mut self, listener: Arc<L>) {
        self.listeners.push(listener);
    }
}

impl<L: ChangeListener> Sessions<L> {
    pub fn open(&mut self) -> Session<L> {
        self.next_id += 1;
        Session {
            id: format!("session-{}", self.next_id),
            listeners: self.listeners.clone(),
            dirty: Vec::new(),
            depth: 0,
        }
    }
}

pub struct Session<L> {
    pub id: String,
    listeners: Vec<Arc<L>>,
    dirty: Vec<(String, String)>,
    depth: usize,
}

impl<L: ChangeListener> Session<L> {
    pub fn write(&mut self, collection: &str, id: impl ToString) {
        self.dirty.push((collection.to_string(), id.to_string()));
    }

    pub async fn flush(&mut self) {
        for (collection, id) in self.dirty.drain(..) {
            for listener in &self.listeners {
                listener.on_pending_change(&self.id, &collection, &id).await;
            }
        }
    }

    pub fn begin_nested(&mut self) {
        self.depth += 1;
    }

    /// Commit the innermost transaction; only a top-level commit notifies.
    pub async fn commit(&mut self) -> Vec<CommitReport> {
        self.flush().await;
        if self.depth > 0 {
            self.depth -= 1;
            return Vec::new();
        }
        let mut reports = Vec::new();
        for listener in &self.listeners {
            reports.push(listener.on_commit(&self.id).await);
        }
        reports
    }

    pub async fn rollback(&mut self) -> Vec<RollbackReport> {
        self.dirty.clear();
        let nested = self.depth > 0;
        if nested {
            self.depth -= 1;
        }
        let mut reports = Vec::new();
        for listener in &self.listeners {
            reports.push(listener.on_rollback(&self.id, nested).await);
        }
        reports
    }
}
