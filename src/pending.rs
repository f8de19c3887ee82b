//! Per-unit-of-work record of changed identifiers.
//!
//! Each unit of work owns one set, stored durably under
//! `<pending_prefix>:<unit of work id>` and mirrored in process. The durable
//! copy lets a commit handled by another process still rotate the tokens; the
//! local copy means a failed durable write still results in a rotation
//! attempt at commit time.
//!
//! Only the owning unit of work ever touches its set, so no locking is needed
//! beyond what the map itself provides.

use crate::backend::TokenBackend;
use crate::identifier::{Identifier, IdentifierKind};
use crate::store::TokenStore;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Observable state of a unit of work's set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    Empty,
    Accumulating { identifiers: usize },
}

/// Identifiers taken out of a set for rotation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Drained {
    pub identifiers: BTreeSet<Identifier>,
    /// False when the durable copy could not be read; only local records are included.
    pub durable_read: bool,
}

/// In-process copy of one unit of work's set; expires like the durable one.
#[derive(Debug, Default)]
struct LocalSet {
    identifiers: BTreeSet<Identifier>,
    touched: Option<Instant>,
}

impl LocalSet {
    fn is_live(&self, ttl: Duration) -> bool {
        self.touched.is_some_and(|at| at.elapsed() < ttl)
    }
}

pub struct PendingChangeSet<B: TokenBackend> {
    store: Arc<TokenStore<B>>,
    prefix: String,
    ttl: Duration,
    local: DashMap<String, LocalSet>,
}

impl<B: TokenBackend> PendingChangeSet<B> {
    pub fn new(store: Arc<TokenStore<B>>, prefix: impl Into<String>, ttl: Duration) -> Self {
        PendingChangeSet {
            store,
            prefix: prefix.into(),
            ttl,
            local: DashMap::new(),
        }
    }

    /// Store key of the durable set for `unit_of_work`.
    pub fn set_key(&self, unit_of_work: &str) -> String {
        format!("{}:{}", self.prefix, unit_of_work)
    }

    pub fn state(&self, unit_of_work: &str) -> PendingState {
        match self.local.get(unit_of_work) {
            Some(set) if set.is_live(self.ttl) && !set.identifiers.is_empty() => {
                PendingState::Accumulating {
                    identifiers: set.identifiers.len(),
                }
            }
            _ => PendingState::Empty,
        }
    }

    /// Record `identifier` and its collection wildcard as changed.
    ///
    /// Durable write failures are logged, not returned; the local record
    /// still drives rotation on commit.
    pub async fn record(&self, unit_of_work: &str, identifier: &Identifier) {
        self.record_many(unit_of_work, std::iter::once(identifier))
            .await
    }

    pub async fn record_many<'a, I>(&self, unit_of_work: &str, identifiers: I)
    where
        I: IntoIterator<Item = &'a Identifier>,
    {
        let mut added = BTreeSet::new();
        for identifier in identifiers {
            if identifier.kind() == IdentifierKind::Global {
                // Added once per set at commit time.
                continue;
            }
            added.insert(identifier.clone());
            added.insert(identifier.collection_wildcard());
        }
        if added.is_empty() {
            return;
        }

        // Units of work that never commit nor roll back age out with their durable set.
        let ttl = self.ttl;
        self.local
            .retain(|uow, set| uow == unit_of_work || set.is_live(ttl));
        {
            let mut set = self.local.entry(unit_of_work.to_string()).or_default();
            if !set.is_live(ttl) {
                set.identifiers.clear();
            }
            set.identifiers.extend(added.iter().cloned());
            set.touched = Some(Instant::now());
        }

        let key = self.set_key(unit_of_work);
        let members: Vec<String> = added.iter().map(Identifier::store_key).collect();
        let (key_ref, members_ref, ttl, backend) =
            (key.as_str(), members.as_slice(), self.ttl, self.store.backend());

        match self
            .store
            .resiliently("record", || async move {
                backend.add_members(key_ref, members_ref, ttl).await
            })
            .await
        {
            Ok(()) => debug!("» Recorded {} pending identifiers in {}", members.len(), key),
            Err(e) => warn!(
                "⚠ Pending set {} kept in process only ({} identifiers): {}",
                key,
                members.len(),
                e
            ),
        }
    }

    /// Take every pending identifier for `unit_of_work` out of the local mirror
    /// and merge in the durable copy.
    ///
    /// The durable set is left in place; call [`clear`](Self::clear) once the
    /// identifiers have been rotated.
    pub async fn drain(&self, unit_of_work: &str) -> Drained {
        let mut identifiers = self
            .local
            .remove(unit_of_work)
            .filter(|(_, set)| set.is_live(self.ttl))
            .map(|(_, set)| set.identifiers)
            .unwrap_or_default();

        let key = self.set_key(unit_of_work);
        let (key_ref, backend) = (key.as_str(), self.store.backend());
        let durable = self
            .store
            .resiliently("drain", || async move { backend.members(key_ref).await })
            .await;

        let durable_read = match durable {
            Ok(members) => {
                for member in members {
                    match member.parse::<Identifier>() {
                        Ok(identifier) => {
                            identifiers.insert(identifier.collection_wildcard());
                            identifiers.insert(identifier);
                        }
                        Err(e) => warn!("Skipping malformed pending member {:?}: {}", member, e),
                    }
                }
                true
            }
            Err(e) => {
                warn!("⚠ Could not read pending set {}: {}", key, e);
                false
            }
        };

        Drained {
            identifiers,
            durable_read,
        }
    }

    /// Delete the durable set. Failures are logged; the set expires on its own.
    pub async fn clear(&self, unit_of_work: &str) {
        let key = self.set_key(unit_of_work);
        let (key_ref, backend) = (key.as_str(), self.store.backend());
        if let Err(e) = self
            .store
            .resiliently("clear", || async move { backend.delete(key_ref).await })
            .await
        {
            warn!("⚠ Could not clear pending set {}: {}", key, e);
        }
    }

    /// Forget everything recorded for `unit_of_work` without rotating.
    ///
    /// Returns the number of identifiers that were pending locally.
    pub async fn discard(&self, unit_of_work: &str) -> usize {
        let discarded = self
            .local
            .remove(unit_of_work)
            .filter(|(_, set)| set.is_live(self.ttl))
            .map(|(_, set)| set.identifiers.len())
            .unwrap_or(0);
        self.clear(unit_of_work).await;
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::config::DEFAULT_PENDING_TTL;
    use crate::store::tests::FlakyBackend;

    fn id(s: &str) -> Identifier {
        s.parse().unwrap()
    }

    fn pending<B: TokenBackend>(backend: B) -> PendingChangeSet<B> {
        PendingChangeSet::new(
            Arc::new(TokenStore::new(backend)),
            "tokens.pending",
            DEFAULT_PENDING_TTL,
        )
    }

    #[tokio::test]
    async fn test_record_adds_collection_wildcard() {
        let backend = InMemoryBackend::new();
        let set = pending(backend.clone());
        assert_eq!(set.state("uow-1"), PendingState::Empty);

        set.record("uow-1", &id("tokens:users#1")).await;
        set.record("uow-1", &id("tokens:users#2")).await;
        assert_eq!(
            set.state("uow-1"),
            PendingState::Accumulating { identifiers: 3 }
        );

        let durable = backend.members("tokens.pending:uow-1").await.unwrap();
        assert_eq!(
            durable,
            vec!["tokens:users#*", "tokens:users#1", "tokens:users#2"]
        );
    }

    #[tokio::test]
    async fn test_global_is_not_recorded() {
        let set = pending(InMemoryBackend::new());
        set.record("uow", &id("tokens:*#*")).await;
        assert_eq!(set.state("uow"), PendingState::Empty);
    }

    #[tokio::test]
    async fn test_sets_are_per_unit_of_work() {
        let set = pending(InMemoryBackend::new());
        set.record("a", &id("tokens:users#1")).await;
        set.record("b", &id("tokens:posts#1")).await;

        let drained = set.drain("a").await;
        assert!(drained.durable_read);
        assert!(drained.identifiers.contains(&id("tokens:users#1")));
        assert!(!drained.identifiers.contains(&id("tokens:posts#1")));
        assert_eq!(set.state("a"), PendingState::Empty);
        assert!(matches!(set.state("b"), PendingState::Accumulating { .. }));
    }

    #[tokio::test]
    async fn test_drain_reads_durable_set_from_another_process() {
        let backend = InMemoryBackend::new();
        let flushing = pending(backend.clone());
        let committing = pending(backend.clone());

        flushing.record("uow", &id("tokens:users#1")).await;
        let drained = committing.drain("uow").await;
        assert_eq!(drained.identifiers.len(), 2);

        committing.clear("uow").await;
        assert!(backend.members("tokens.pending:uow").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_mirror_survives_store_outage() {
        let backend = FlakyBackend::default();
        let set = pending(backend.clone());
        backend.set_offline(true);

        set.record("uow", &id("tokens:users#1")).await;
        let drained = set.drain("uow").await;
        assert!(!drained.durable_read);
        assert_eq!(drained.identifiers.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_durable_set_expires_after_last_record() {
        let backend = InMemoryBackend::new();
        let set = pending(backend.clone());
        let key = set.set_key("uow");

        set.record("uow", &id("tokens:users#1")).await;
        tokio::time::advance(DEFAULT_PENDING_TTL + Duration::from_secs(1)).await;
        assert!(backend.members(&key).await.unwrap().is_empty());
        assert_eq!(set.state("uow"), PendingState::Empty);
        assert!(set.drain("uow").await.identifiers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_record_rearms_expiry() {
        let backend = InMemoryBackend::new();
        let set = pending(backend.clone());
        let key = set.set_key("uow");
        let two_thirds = DEFAULT_PENDING_TTL * 2 / 3;

        set.record("uow", &id("tokens:users#1")).await;
        tokio::time::advance(two_thirds).await;
        set.record("uow", &id("tokens:users#2")).await;
        tokio::time::advance(two_thirds).await;

        assert_eq!(backend.members(&key).await.unwrap().len(), 3);
        assert_eq!(
            set.state("uow"),
            PendingState::Accumulating { identifiers: 3 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_local_sets_are_pruned() {
        let set = pending(InMemoryBackend::new());
        set.record("abandoned", &id("tokens:users#1")).await;
        tokio::time::advance(DEFAULT_PENDING_TTL + Duration::from_secs(1)).await;

        set.record("active", &id("tokens:posts#1")).await;
        assert_eq!(set.local.len(), 1);
        assert!(set.local.contains_key("active"));
    }

    #[tokio::test]
    async fn test_discard() {
        let backend = InMemoryBackend::new();
        let set = pending(backend.clone());
        set.record("uow", &id("tokens:users#1")).await;

        assert_eq!(set.discard("uow").await, 2);
        assert_eq!(set.state("uow"), PendingState::Empty);
        assert!(backend.is_empty());
        assert_eq!(set.discard("uow").await, 0);
    }
}
