//! Process-wide entry point tying the store, coordinator and key generator together.

use crate::backend::TokenBackend;
use crate::cascade::RelationMap;
use crate::config::StoreConfig;
use crate::coordinator::CommitCoordinator;
use crate::error::Result;
use crate::events::SessionFactory;
use crate::identifier::Identifier;
use crate::key::CacheKeyGenerator;
use crate::observability::StoreMetrics;
use crate::store::TokenStore;
use std::sync::Arc;

/// Built once at process start and shared by reference.
///
/// # Example
///
/// ```
/// use cache_tokens::{ChangeListener, Fragment, InvalidationEngine, StoreConfig};
/// use cache_tokens::backend::InMemoryBackend;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> cache_tokens::Result<()> {
/// let engine = InvalidationEngine::builder(InMemoryBackend::new(), StoreConfig::default())
///     .build()?;
///
/// let keys = engine.key_generator();
/// let before = keys.build(&[Fragment::collection("users")]).await?;
///
/// let coordinator = engine.coordinator();
/// coordinator.on_pending_change("session-1", "users", "1").await;
/// coordinator.on_commit("session-1").await;
///
/// assert_ne!(before, keys.build(&[Fragment::collection("users")]).await?);
/// # Ok(())
/// # }
/// ```
pub struct InvalidationEngine<B: TokenBackend> {
    store: Arc<TokenStore<B>>,
    coordinator: Arc<CommitCoordinator<B>>,
    config: StoreConfig,
}

/// Builder for [`InvalidationEngine`].
pub struct EngineBuilder<B: TokenBackend> {
    backend: B,
    config: StoreConfig,
    relations: RelationMap,
    metrics: Option<Box<dyn StoreMetrics>>,
}

impl<B: TokenBackend> EngineBuilder<B> {
    /// Owner relations to cascade invalidation through.
    pub fn with_relations(mut self, relations: RelationMap) -> Self {
        self.relations = relations;
        self
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Box<dyn StoreMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// # Errors
    /// Returns `Error::InvalidIdentifier` if the configured namespace is not
    /// usable in identifiers.
    pub fn build(self) -> Result<InvalidationEngine<B>> {
        Identifier::global(self.config.namespace.as_str())?;

        let mut store = TokenStore::from_config(self.backend, &self.config);
        if let Some(metrics) = self.metrics {
            store = store.with_metrics(metrics);
        }
        let store = Arc::new(store);

        let coordinator = CommitCoordinator::new(
            Arc::clone(&store),
            self.config.namespace.as_str(),
            self.config.pending_prefix.as_str(),
            self.config.pending_ttl,
        )
        .with_relations(self.relations);

        info!(
            "✓ Invalidation engine ready (namespace: {}, retries: {}, fail open: {})",
            self.config.namespace, self.config.retry.max_retries, self.config.retry.fail_open
        );

        Ok(InvalidationEngine {
            store,
            coordinator: Arc::new(coordinator),
            config: self.config,
        })
    }
}

impl<B: TokenBackend> InvalidationEngine<B> {
    pub fn builder(backend: B, config: StoreConfig) -> EngineBuilder<B> {
        EngineBuilder {
            backend,
            config,
            relations: RelationMap::new(),
            metrics: None,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<TokenStore<B>> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<CommitCoordinator<B>> {
        &self.coordinator
    }

    /// Whether the store answers within one attempt timeout.
    pub async fn health_check(&self) -> bool {
        self.store.health_check().await
    }

    /// A key generator for one request, sharing the process's store.
    pub fn key_generator(&self) -> CacheKeyGenerator<B> {
        CacheKeyGenerator::new(Arc::clone(&self.store), self.config.namespace.as_str())
    }

    /// Subscribe the commit coordinator to `factory`'s sessions.
    pub fn bind<F: SessionFactory<CommitCoordinator<B>>>(&self, factory: &mut F) {
        self.coordinator.bind(factory);
    }
}

#[cfg(feature = "redis")]
impl InvalidationEngine<crate::backend::RedisBackend> {
    /// Build a Redis-backed engine from the process environment.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if no Redis URL is configured.
    pub fn from_env(relations: RelationMap) -> Result<Self> {
        use crate::backend::{RedisBackend, RedisConfig};

        let config = StoreConfig::from_env()?;
        let backend = RedisBackend::new(RedisConfig::from(&config))?;
        Self::builder(backend, config)
            .with_relations(relations)
            .build()
    }
}
