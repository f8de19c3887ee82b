//! Notification interface between a unit-of-work system and the engine.
//!
//! The unit-of-work system (an ORM session, a transaction manager) decides
//! what changed; the engine only consumes the notifications:
//!
//! 1. `on_pending_change` for every new, modified or deleted entity during flush
//! 2. `on_commit` after a successful top-level commit
//! 3. `on_rollback` after any rollback, flagged when it is a nested one

use crate::cascade::EntityChange;
use crate::coordinator::{CommitReport, RollbackReport};
use std::future::Future;
use std::sync::Arc;

/// Receiver of unit-of-work notifications.
pub trait ChangeListener: Send + Sync {
    /// An entity of `collection` with id `entity_id` was written during flush.
    fn on_pending_change(
        &self,
        unit_of_work: &str,
        collection: &str,
        entity_id: &str,
    ) -> impl Future<Output = ()> + Send;

    /// An entity was written, with foreign key values for relation cascading.
    fn on_entity_change(
        &self,
        unit_of_work: &str,
        change: &EntityChange,
    ) -> impl Future<Output = ()> + Send {
        self.on_pending_change(unit_of_work, &change.collection, &change.entity_id)
    }

    /// The unit of work committed at the top level.
    fn on_commit(&self, unit_of_work: &str) -> impl Future<Output = CommitReport> + Send;

    /// The unit of work, or a nested sub-unit of it, rolled back.
    fn on_rollback(
        &self,
        unit_of_work: &str,
        is_nested: bool,
    ) -> impl Future<Output = RollbackReport> + Send;
}

/// A unit-of-work factory whose sessions can notify listeners.
pub trait SessionFactory<L: ChangeListener> {
    fn subscribe(&mut self, listener: Arc<L>);
}

/// Wire `listener` into every session `factory` creates.
pub fn bind<L, F>(listener: Arc<L>, factory: &mut F)
where
    L: ChangeListener,
    F: SessionFactory<L>,
{
    factory.subscribe(listener);
    debug!("✓ Change listener bound to session factory");
}
