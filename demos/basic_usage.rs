//! Basic usage example of token-based invalidation.

use cache_tokens::{
    backend::InMemoryBackend, error::Result, ChangeListener, Fragment, InvalidationEngine,
    StoreConfig, TrackedEntity,
};

/// Example entity: Employment
#[derive(Clone, Debug)]
struct Employment {
    id: u64,
    employer_name: String,
}

impl TrackedEntity for Employment {
    type Key = u64;

    fn entity_id(&self) -> Self::Key {
        self.id
    }

    fn collection() -> &'static str {
        "employment"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .try_init()
        .ok();

    println!("\n=== Cache Tokens - Basic Example ===\n");

    // 1. Build the engine once per process
    println!("1. Initializing in-memory token store...");
    let engine = InvalidationEngine::builder(
        InMemoryBackend::new(),
        StoreConfig::default().with_namespace("demo"),
    )
    .build()?;
    let keys = engine.key_generator();
    println!("   ✓ Engine ready (store healthy: {})\n", engine.health_check().await);

    let employment = Employment {
        id: 1,
        employer_name: "Acme Corp".to_string(),
    };

    // 2. Keys for the same inputs are identical
    println!("2. Building keys for {}:", employment.employer_name);
    let detail = [Fragment::entity(&employment), Fragment::literal("detail")];
    let listing = [Fragment::collection_of::<Employment>(), Fragment::literal(1_u32)];

    let detail_key = keys.build(&detail).await?;
    let listing_key = keys.build(&listing).await?;
    assert_eq!(detail_key, keys.build(&detail).await?);
    println!("   detail:  {}", detail_key);
    println!("   listing: {}\n", listing_key);

    // 3. A rolled back unit of work changes nothing
    println!("3. Rolled back update:");
    let coordinator = engine.coordinator();
    coordinator
        .on_pending_change("session-1", Employment::collection(), "1")
        .await;
    let report = coordinator.on_rollback("session-1", false).await;
    assert_eq!(detail_key, keys.build(&detail).await?);
    println!("   ✓ {:?}, keys unchanged\n", report);

    // 4. A committed unit of work rotates entity, collection and global tokens
    println!("4. Committed update:");
    coordinator
        .on_pending_change("session-2", Employment::collection(), "1")
        .await;
    let report = coordinator.on_commit("session-2").await;
    println!("   ✓ {:?}", report);
    println!("   detail:  {}", keys.build(&detail).await?);
    println!("   listing: {}\n", keys.build(&listing).await?);

    println!("=== Example Complete ===\n");

    Ok(())
}
