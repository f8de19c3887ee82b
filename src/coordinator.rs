//! Turns committed changes into token rotations.
//!
//! ```text
//! EMPTY ──record──▶ ACCUMULATING ──record──▶ ACCUMULATING
//!                        │
//!                        ├──commit────────────▶ rotate pending ∪ {global} ──▶ EMPTY
//!                        └──rollback (outer)──▶ discard ──────────────────▶ EMPTY
//! ```
//!
//! A nested rollback leaves the set alone: its changes collapse into the
//! parent, which still decides. If an outer unit of work rolls back after an
//! inner one committed, tokens may already have been rotated for changes that
//! were undone. That only causes extra misses and is accepted.

use crate::backend::TokenBackend;
use crate::cascade::{EntityChange, RelationMap};
use crate::error::Error;
use crate::events::{ChangeListener, SessionFactory};
use crate::identifier::Identifier;
use crate::pending::{PendingChangeSet, PendingState};
use crate::store::{RotationOutcome, TokenStore};
use std::sync::Arc;
use std::time::Duration;

/// What a commit notification did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitReport {
    /// No changes were pending; nothing was written.
    NothingPending,
    /// Tokens rotated for every identifier in the closure (global included).
    Rotated { identifiers: usize },
    /// Rotation was abandoned; the identifiers stay pending for the next commit.
    RotationFailed { identifiers: usize, error: Error },
}

/// What a rollback notification did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackReport {
    NothingPending,
    Discarded { identifiers: usize },
    /// Nested rollback; the parent's set is untouched.
    Nested,
}

/// Receives unit-of-work notifications and rotates tokens on commit.
pub struct CommitCoordinator<B: TokenBackend> {
    store: Arc<TokenStore<B>>,
    pending: PendingChangeSet<B>,
    relations: RelationMap,
    namespace: String,
}

impl<B: TokenBackend> CommitCoordinator<B> {
    pub fn new(
        store: Arc<TokenStore<B>>,
        namespace: impl Into<String>,
        pending_prefix: impl Into<String>,
        pending_ttl: Duration,
    ) -> Self {
        CommitCoordinator {
            pending: PendingChangeSet::new(Arc::clone(&store), pending_prefix, pending_ttl),
            store,
            relations: RelationMap::new(),
            namespace: namespace.into(),
        }
    }

    /// Also invalidate owners declared in `relations`.
    pub fn with_relations(mut self, relations: RelationMap) -> Self {
        self.relations = relations;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn pending(&self) -> &PendingChangeSet<B> {
        &self.pending
    }

    pub fn state(&self, unit_of_work: &str) -> PendingState {
        self.pending.state(unit_of_work)
    }

    /// Subscribe this coordinator to every session `factory` creates.
    pub fn bind<F: SessionFactory<Self>>(self: &Arc<Self>, factory: &mut F) {
        crate::events::bind(Arc::clone(self), factory);
    }

    /// Record an explicit identifier, e.g. one built outside any entity type.
    pub async fn record(&self, unit_of_work: &str, identifier: &Identifier) {
        self.pending.record(unit_of_work, identifier).await;
    }

    /// Identifiers to record for `change`: the entity itself and its owners.
    fn identifiers_for(&self, change: &EntityChange) -> Vec<Identifier> {
        let mut identifiers = Vec::with_capacity(1);
        match Identifier::entity(
            self.namespace.as_str(),
            change.collection.as_str(),
            &change.entity_id,
        ) {
            Ok(identifier) => identifiers.push(identifier),
            Err(e) => {
                // An id we cannot address still invalidates its collection.
                match Identifier::collection(self.namespace.as_str(), change.collection.as_str()) {
                    Ok(collection) => {
                        warn!(
                            "Recording {} for unaddressable id {:?}: {}",
                            collection, change.entity_id, e
                        );
                        identifiers.push(collection);
                    }
                    Err(e) => {
                        error!("✗ Dropping change to {:?}: {}", change.collection, e);
                    }
                }
            }
        }
        identifiers.extend(self.relations.owners_of(&self.namespace, change));
        identifiers
    }

    async fn commit(&self, unit_of_work: &str) -> CommitReport {
        let drained = self.pending.drain(unit_of_work).await;
        if drained.identifiers.is_empty() {
            if drained.durable_read {
                debug!("Commit of {} with nothing pending", unit_of_work);
            } else {
                warn!(
                    "⚠ Commit of {}: nothing pending locally and the durable set is unreadable",
                    unit_of_work
                );
            }
            return CommitReport::NothingPending;
        }

        let mut closure = drained.identifiers;
        if let Some(global) = closure.iter().next().map(Identifier::global_wildcard) {
            closure.insert(global);
        }

        match self.store.rotate_many(&closure).await {
            RotationOutcome::Rotated(identifiers) => {
                self.pending.clear(unit_of_work).await;
                info!(
                    "✓ Commit of {} rotated {} tokens",
                    unit_of_work, identifiers
                );
                CommitReport::Rotated { identifiers }
            }
            RotationOutcome::Failed { attempted, error } => {
                // Put the set back so the next commit of this unit of work retries it.
                self.pending.record_many(unit_of_work, &closure).await;
                warn!(
                    "⚠ Commit of {} kept {} identifiers pending after failed rotation",
                    unit_of_work, attempted
                );
                CommitReport::RotationFailed {
                    identifiers: attempted,
                    error,
                }
            }
        }
    }

    async fn rollback(&self, unit_of_work: &str, is_nested: bool) -> RollbackReport {
        if is_nested {
            debug!("Nested rollback in {}, pending set kept", unit_of_work);
            return RollbackReport::Nested;
        }

        match self.pending.discard(unit_of_work).await {
            0 => RollbackReport::NothingPending,
            identifiers => {
                debug!(
                    "Rollback of {} discarded {} pending identifiers",
                    unit_of_work, identifiers
                );
                RollbackReport::Discarded { identifiers }
            }
        }
    }
}

impl<B: TokenBackend> ChangeListener for CommitCoordinator<B> {
    async fn on_pending_change(&self, unit_of_work: &str, collection: &str, entity_id: &str) {
        self.on_entity_change(unit_of_work, &EntityChange::new(collection, entity_id))
            .await
    }

    async fn on_entity_change(&self, unit_of_work: &str, change: &EntityChange) {
        let identifiers = self.identifiers_for(change);
        self.pending.record_many(unit_of_work, &identifiers).await;
    }

    async fn on_commit(&self, unit_of_work: &str) -> CommitReport {
        self.commit(unit_of_work).await
    }

    async fn on_rollback(&self, unit_of_work: &str, is_nested: bool) -> RollbackReport {
        self.rollback(unit_of_work, is_nested).await
    }
}
