//! # cache-tokens
//!
//! Transactional, token-based cache key invalidation.
//!
//! ## Features
//!
//! - **Versioned keys:** every entity, collection and the namespace as a whole has a token;
//!   cache keys embed the tokens they depend on, so stale entries simply stop being addressed
//! - **Transactional:** changes recorded during a unit of work rotate tokens only on commit,
//!   and are dropped on rollback
//! - **Backend Agnostic:** in-memory and Redis backends, or implement `TokenBackend`
//! - **Fail-safe:** store outages degrade into extra cache misses, never stale hits and never
//!   failed commits
//! - **Production Ready:** built-in logging, metrics hooks and bounded retries
//!
//! ## Quick Start
//!
//! ```ignore
//! use cache_tokens::{
//!     backend::InMemoryBackend, ChangeListener, Fragment, InvalidationEngine, StoreConfig,
//!     TrackedEntity,
//! };
//!
//! // 1. Define your entity
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! // 2. Implement TrackedEntity
//! impl TrackedEntity for User {
//!     type Key = u64;
//!
//!     fn entity_id(&self) -> Self::Key {
//!         self.id
//!     }
//!
//!     fn collection() -> &'static str {
//!         "users"
//!     }
//! }
//!
//! // 3. Build the engine once per process
//! let engine = InvalidationEngine::builder(InMemoryBackend::new(), StoreConfig::default())
//!     .build()?;
//!
//! // 4. Build keys per request
//! let key = engine
//!     .key_generator()
//!     .build(&[Fragment::entity(&user), Fragment::literal("profile")])
//!     .await?;
//!
//! // 5. Report changes from your unit of work
//! engine.coordinator().on_pending_change("session-1", "users", "1").await;
//! engine.coordinator().on_commit("session-1").await;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod cascade;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod entity;
pub mod error;
pub mod events;
pub mod identifier;
pub mod key;
pub mod observability;
pub mod pending;
pub mod store;
pub mod token;

// Re-exports for convenience
pub use backend::TokenBackend;
pub use cascade::{EntityChange, RelationMap};
pub use config::{RetryPolicy, StoreConfig};
pub use coordinator::{CommitCoordinator, CommitReport, RollbackReport};
pub use engine::InvalidationEngine;
pub use entity::TrackedEntity;
pub use error::{Error, Result};
pub use events::{ChangeListener, SessionFactory};
pub use identifier::Identifier;
pub use key::{CacheKey, CacheKeyGenerator, Fragment, Literal};
pub use store::{RotationOutcome, TokenStore};
pub use token::Token;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
